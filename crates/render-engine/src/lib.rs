//! Duet Render Engine
//!
//! Turns a compiled filter graph into a finished video file by supervising
//! one ffmpeg process, and probes source metadata with ffprobe.
//!
//! # Pipeline Architecture
//!
//! ```text
//! project.duet.json ──┐
//!                     ├── FfprobeProbe (clip metadata)
//! source files ───────┘         │
//!                               ├── layout / sync / compile (processing-core)
//!                               │
//!                               ├── EngineInvocation (-filter_complex, codecs)
//!                               │
//!                               ├── GraphExecutor (ffmpeg, timeout, cancel)
//!                               │
//!                               ▼
//!                  .reaction.partial.mp4 ──rename──▶ reaction.mp4
//!                                                        │
//!                                                        ▼
//!                                             reaction.mp4.render.json
//! ```

pub mod driver;
pub mod executor;
pub mod export;
pub mod probe;
pub mod progress;

pub use driver::*;
pub use executor::*;
pub use export::*;
pub use probe::*;
pub use progress::*;
