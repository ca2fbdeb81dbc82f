//! Error types shared across Duet crates.

use std::path::PathBuf;

/// Top-level error type for Duet operations.
///
/// Variants are grouped by layer: input errors come from probing and trim
/// validation, composition errors from layout and compilation, and
/// execution errors from the render driver.
#[derive(Debug, thiserror::Error)]
pub enum DuetError {
    #[error("Unreadable source {path}: {message}")]
    UnreadableSource { path: PathBuf, message: String },

    #[error("No video stream in {path}")]
    NoVideoStream { path: PathBuf },

    #[error("Invalid trim range [{start}, {end}] for a {duration}s clip")]
    InvalidTrimRange {
        start: String,
        end: String,
        duration: String,
    },

    #[error("Canvas too small: {message}")]
    CanvasTooSmall { message: String },

    #[error("Composition has no placements")]
    EmptyComposition,

    #[error("Invalid composition: {message}")]
    InvalidComposition { message: String },

    #[error("Incompatible frame rate: {message}")]
    IncompatibleFrameRate { message: String },

    #[error("Dangling reference to stream [{label}] in node {node}\n{graph}")]
    DanglingReference {
        label: String,
        node: String,
        graph: String,
    },

    #[error("Render engine unavailable: {message}")]
    RenderEngineUnavailable { message: String },

    #[error("Render engine failed (exit code {exit_code:?}): {diagnostic_tail}")]
    RenderEngineFailed {
        exit_code: Option<i32>,
        diagnostic_tail: String,
    },

    #[error("Render timed out after {timeout_secs:.1}s: {diagnostic_tail}")]
    RenderTimedOut {
        timeout_secs: f64,
        diagnostic_tail: String,
    },

    #[error("Render cancelled")]
    RenderCancelled,

    #[error("Engine exited successfully but produced no output at {path}")]
    OutputNotProduced { path: PathBuf },

    #[error("Output already exists: {path}")]
    OutputExists { path: PathBuf },

    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using DuetError.
pub type DuetResult<T> = Result<T, DuetError>;

impl DuetError {
    pub fn unreadable(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::UnreadableSource {
            path: path.into(),
            message: msg.into(),
        }
    }

    pub fn canvas_too_small(msg: impl Into<String>) -> Self {
        Self::CanvasTooSmall {
            message: msg.into(),
        }
    }

    pub fn invalid_composition(msg: impl Into<String>) -> Self {
        Self::InvalidComposition {
            message: msg.into(),
        }
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::RenderEngineUnavailable {
            message: msg.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Input errors never fix themselves; callers should not retry them.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::UnreadableSource { .. } | Self::NoVideoStream { .. } | Self::InvalidTrimRange { .. }
        )
    }

    /// Only a failed engine launch may be retried (process-spawn races).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RenderEngineUnavailable { .. })
    }
}
