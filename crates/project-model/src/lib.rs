//! Duet Project Model
//!
//! Defines the core data contracts for reaction compositions:
//! - **Time:** Exact rational seconds and frame rates
//! - **Clips:** Probed source metadata with optional trim windows
//! - **Placements:** Role, anchor, scale and timing of each clip on the canvas
//! - **Geometry / Timing:** Resolved pixel rectangles and time mappings
//! - **Project:** The on-disk project file and export configuration
//!
//! Everything here is plain data validated at construction. Layout,
//! synchronization and graph compilation live in `duet-processing-core`.

pub mod clip;
pub mod geometry;
pub mod placement;
pub mod project;
pub mod time;
pub mod timing;

pub use clip::*;
pub use geometry::*;
pub use placement::*;
pub use project::*;
pub use time::*;
pub use timing::*;
