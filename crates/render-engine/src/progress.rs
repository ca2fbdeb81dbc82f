//! Render progress reporting.
//!
//! ffmpeg writes `key=value` lines to the `-progress` pipe, one block per
//! update, each block terminated by a `progress=continue|end` line.

use duet_common::clock::{eta_from_elapsed, RenderClock};

/// Progress callback for rendering.
pub type ProgressCallback = Box<dyn Fn(RenderProgress) + Send + Sync>;

/// Render progress report.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderProgress {
    /// Current progress [0.0, 1.0].
    pub progress: f64,

    /// Frames rendered so far.
    pub frames_rendered: u64,

    /// Total frames to render.
    pub total_frames: u64,

    /// Estimated time remaining in seconds.
    pub eta_secs: f64,

    /// Current stage.
    pub stage: RenderStage,
}

impl RenderProgress {
    /// A report carrying only a stage change.
    pub fn stage(stage: RenderStage, total_frames: u64) -> Self {
        let done = matches!(stage, RenderStage::Finalizing | RenderStage::Complete);
        Self {
            progress: if done { 1.0 } else { 0.0 },
            frames_rendered: if done { total_frames } else { 0 },
            total_frames,
            eta_secs: 0.0,
            stage,
        }
    }
}

/// Stages of a render session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStage {
    Preparing,
    Rendering,
    Finalizing,
    Complete,
    Failed,
}

/// Accumulated state of the progress pipe.
#[derive(Debug, Default, Clone)]
pub struct ProgressState {
    pub out_time_secs: f64,
    pub complete: bool,
}

impl ProgressState {
    pub fn update(&mut self, key: &str, value: &str) {
        match key {
            // out_time_ms is in microseconds despite its name.
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.parse::<i64>() {
                    self.out_time_secs = RenderClock::us_to_secs(us.max(0));
                }
            }
            "progress" => {
                self.complete = value == "end";
            }
            _ => {}
        }
    }

    /// Feed one pipe line. Returns true when the line closes a block.
    pub fn feed_line(&mut self, line: &str) -> bool {
        let Some((key, value)) = line.trim().split_once('=') else {
            return false;
        };
        let key = key.trim();
        self.update(key, value.trim());
        key == "progress"
    }
}

pub fn progress_report(
    state: &ProgressState,
    total_frames: u64,
    expected_duration_secs: f64,
    elapsed_secs: f64,
) -> RenderProgress {
    let progress = if expected_duration_secs <= 0.0 {
        0.0
    } else {
        (state.out_time_secs / expected_duration_secs).clamp(0.0, 1.0)
    };

    let frames_rendered = (progress * total_frames as f64).round() as u64;

    RenderProgress {
        progress: if state.complete { 1.0 } else { progress },
        frames_rendered: if state.complete {
            total_frames
        } else {
            frames_rendered
        },
        total_frames,
        eta_secs: eta_from_elapsed(elapsed_secs, progress),
        stage: if state.complete {
            RenderStage::Finalizing
        } else {
            RenderStage::Rendering
        },
    }
}
