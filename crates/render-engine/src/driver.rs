//! Render driver.
//!
//! Runs a compiled graph through a [`GraphExecutor`] and owns the output
//! file lifecycle. The engine writes to a hidden partial file next to the
//! target; the partial is renamed into place only after a successful run and
//! removed on every failure, so the target is never left half written.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use duet_common::clock::RenderClock;
use duet_common::config::RenderDefaults;
use duet_common::error::{DuetError, DuetResult};
use duet_processing_core::CompiledGraph;
use duet_project_model::Rational;

use crate::executor::{
    CancelToken, EngineInvocation, ExecutionControl, ExecutionOutcome, GraphExecutor,
};
use crate::export::CodecSettings;
use crate::progress::{ProgressCallback, RenderProgress, RenderStage};

/// Engine launches per render; only a failed launch is retried.
pub const MAX_ATTEMPTS: u32 = 2;

const RETRY_DELAY: Duration = Duration::from_millis(250);

/// Options for one render.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub codec: CodecSettings,

    /// Replace an existing target after a successful render.
    pub overwrite: bool,

    /// Wall-clock limit for the engine.
    pub timeout: Duration,

    /// Number of stderr lines kept for failure diagnostics.
    pub diagnostic_lines: usize,

    pub cancel: CancelToken,
}

impl RenderOptions {
    pub fn new(codec: CodecSettings) -> Self {
        Self::from_defaults(&RenderDefaults::default(), codec)
    }

    pub fn from_defaults(defaults: &RenderDefaults, codec: CodecSettings) -> Self {
        Self {
            codec,
            overwrite: false,
            timeout: Duration::from_secs(defaults.timeout_secs.max(1)),
            diagnostic_lines: defaults.diagnostic_lines,
            cancel: CancelToken::never(),
        }
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn control(&self) -> ExecutionControl {
        ExecutionControl::new(self.timeout)
            .with_cancel(self.cancel.clone())
            .with_diagnostic_lines(self.diagnostic_lines)
    }
}

/// A successfully rendered output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderResult {
    pub output: PathBuf,
    pub duration: Rational,
    pub frame_rate: Rational,
    pub frames: u64,
    pub elapsed_secs: f64,
    /// Engine launches it took.
    pub attempts: u32,
    /// Wall-clock start (RFC 3339).
    pub started_at: String,
}

/// Hidden sibling the engine writes to: `dir/.name.partial.ext`.
pub fn partial_path(target: &Path, default_extension: &str) -> PathBuf {
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let extension = target
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| default_extension.to_string());
    target.with_file_name(format!(".{stem}.partial.{extension}"))
}

/// Render a compiled graph to `target`.
pub async fn render(
    graph: &CompiledGraph,
    target: &Path,
    options: &RenderOptions,
    executor: &dyn GraphExecutor,
    progress: Option<&ProgressCallback>,
) -> DuetResult<RenderResult> {
    graph.validate()?;

    if options.cancel.is_cancelled() {
        return Err(DuetError::RenderCancelled);
    }
    if target.exists() && !options.overwrite {
        return Err(DuetError::OutputExists {
            path: target.to_path_buf(),
        });
    }
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let partial = partial_path(target, options.codec.format.extension());
    discard(&partial).await;

    let invocation = EngineInvocation::new(
        graph,
        options.codec.args(graph.audio_label.is_some()),
        &partial,
    );
    let total_frames = invocation.total_frames;

    tracing::info!(
        output = %target.display(),
        engine = executor.name(),
        inputs = invocation.inputs.len(),
        nodes = graph.nodes.len(),
        duration = %graph.duration.to_secs_string(),
        frames = total_frames,
        "Starting render"
    );
    emit(progress, RenderProgress::stage(RenderStage::Preparing, total_frames));

    let clock = RenderClock::start();
    let finished = match execute_with_retry(executor, &invocation, &options.control(), progress)
        .await
    {
        Ok((outcome, attempts)) => check_outcome(outcome, &partial, target, options.timeout)
            .await
            .map(|()| attempts),
        Err(err) => Err(err),
    };

    let attempts = match finished {
        Ok(attempts) => attempts,
        Err(err) => return Err(fail(err, &partial, progress, total_frames).await),
    };

    emit(progress, RenderProgress::stage(RenderStage::Finalizing, total_frames));
    if let Err(err) = promote(&partial, target).await {
        return Err(fail(err, &partial, progress, total_frames).await);
    }
    emit(progress, RenderProgress::stage(RenderStage::Complete, total_frames));

    let result = RenderResult {
        output: target.to_path_buf(),
        duration: graph.duration,
        frame_rate: graph.frame_rate,
        frames: total_frames,
        elapsed_secs: clock.elapsed_secs(),
        attempts,
        started_at: clock.epoch_wall().to_string(),
    };
    tracing::info!(
        output = %result.output.display(),
        elapsed_secs = result.elapsed_secs,
        attempts,
        "Render finished"
    );
    Ok(result)
}

async fn execute_with_retry(
    executor: &dyn GraphExecutor,
    invocation: &EngineInvocation,
    control: &ExecutionControl,
    progress: Option<&ProgressCallback>,
) -> DuetResult<(ExecutionOutcome, u32)> {
    let mut attempt = 1;
    loop {
        match executor.execute(invocation, control, progress).await {
            Ok(outcome) => return Ok((outcome, attempt)),
            Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                tracing::warn!(error = %err, attempt, "Engine launch failed, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
                if control.cancel.is_cancelled() {
                    return Ok((ExecutionOutcome::Cancelled, attempt));
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Map an engine outcome to success or the matching error.
async fn check_outcome(
    outcome: ExecutionOutcome,
    partial: &Path,
    target: &Path,
    timeout: Duration,
) -> DuetResult<()> {
    match outcome {
        ExecutionOutcome::Exited {
            code: Some(0),
            stderr_tail,
        } => {
            let produced = tokio::fs::metadata(partial)
                .await
                .map(|m| m.is_file() && m.len() > 0)
                .unwrap_or(false);
            if produced {
                Ok(())
            } else {
                if !stderr_tail.is_empty() {
                    tracing::warn!(stderr = %stderr_tail, "Engine exited cleanly without output");
                }
                Err(DuetError::OutputNotProduced {
                    path: target.to_path_buf(),
                })
            }
        }
        ExecutionOutcome::Exited { code, stderr_tail } => Err(DuetError::RenderEngineFailed {
            exit_code: code,
            diagnostic_tail: stderr_tail,
        }),
        ExecutionOutcome::TimedOut { stderr_tail } => Err(DuetError::RenderTimedOut {
            timeout_secs: timeout.as_secs_f64(),
            diagnostic_tail: stderr_tail,
        }),
        ExecutionOutcome::Cancelled => Err(DuetError::RenderCancelled),
    }
}

async fn promote(partial: &Path, target: &Path) -> DuetResult<()> {
    // rename() does not replace an existing file on Windows.
    #[cfg(windows)]
    if target.exists() {
        tokio::fs::remove_file(target).await?;
    }
    tokio::fs::rename(partial, target).await?;
    Ok(())
}

async fn fail(
    err: DuetError,
    partial: &Path,
    progress: Option<&ProgressCallback>,
    total_frames: u64,
) -> DuetError {
    discard(partial).await;
    emit(progress, RenderProgress::stage(RenderStage::Failed, total_frames));
    tracing::error!(error = %err, "Render failed");
    err
}

async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed partial output"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "Failed to remove partial output")
        }
    }
}

fn emit(progress: Option<&ProgressCallback>, report: RenderProgress) {
    if let Some(cb) = progress {
        cb(report);
    }
}
