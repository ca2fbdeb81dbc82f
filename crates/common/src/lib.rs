//! Duet Common Utilities
//!
//! Shared infrastructure for all Duet crates:
//! - Error types and result aliases
//! - Render clock and duration drift measurement
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
