//! Duet Processing Core
//!
//! Turns a validated composition into a single-pass processing graph:
//! - **Layout:** Canvas ratios and anchors to absolute, even pixel rectangles
//! - **Sync:** Clip input windows placed on the output timeline
//! - **Compile:** Typed graph nodes with unique labels, in topological order
//! - **Filtergraph:** ffmpeg `-filter_complex` serialization
//!
//! This crate is pure computation: no I/O and no process spawning.
//! All inputs are data; all outputs are data.

pub mod compile;
pub mod filtergraph;
pub mod graph;
pub mod layout;
pub mod sync;

pub use compile::{compile, compile_composition, OUTPUT_PIXEL_FORMAT};
pub use graph::{
    CompiledGraph, ExtendMode, GraphNode, InputBinding, InputMode, LabelAllocator, Operation,
    StreamKind, StreamLabel,
};
pub use layout::{resolve, resolve_composition};
pub use sync::{synchronize, synchronize_cues};
