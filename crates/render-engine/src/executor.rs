//! Engine execution.
//!
//! A [`GraphExecutor`] runs one [`EngineInvocation`] to completion, timeout
//! or cancellation and reports how it ended. It never interprets the outcome;
//! mapping outcomes to errors and managing output files is the driver's job.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::watch;

use duet_common::clock::RenderClock;
use duet_common::error::{DuetError, DuetResult};
use duet_processing_core::{CompiledGraph, InputBinding, InputMode};
use duet_project_model::Rational;

use crate::progress::{progress_report, ProgressCallback, ProgressState};

/// Warn when the progress pipe has not advanced for this long.
const STALL_WARN_SECS: u64 = 10;

const STDERR_GRACE: Duration = Duration::from_secs(2);

/// Everything the engine needs for one render.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineInvocation {
    /// Input files, in engine input order.
    pub inputs: Vec<InputBinding>,
    pub filter_complex: String,
    pub video_label: String,
    pub audio_label: Option<String>,
    pub duration: Rational,
    pub frame_rate: Rational,
    pub total_frames: u64,
    /// Encoder and muxer arguments.
    pub codec_args: Vec<String>,
    /// Where the engine writes. The driver renames it into place.
    pub output: PathBuf,
}

impl EngineInvocation {
    pub fn new(graph: &CompiledGraph, codec_args: Vec<String>, output: impl Into<PathBuf>) -> Self {
        Self {
            inputs: graph.inputs.clone(),
            filter_complex: graph.to_filter_complex(),
            video_label: graph.video_label.to_string(),
            audio_label: graph.audio_label.as_ref().map(ToString::to_string),
            duration: graph.duration,
            frame_rate: graph.frame_rate,
            total_frames: graph.frame_count(),
            codec_args,
            output: output.into(),
        }
    }

    /// ffmpeg command-line arguments, binary excluded.
    pub fn to_args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-nostats", "-loglevel", "warning"]
            .iter()
            .map(ToString::to_string)
            .collect();

        for input in &self.inputs {
            match input.mode {
                InputMode::Once => {}
                InputMode::LoopImage => args.extend(["-loop".to_string(), "1".to_string()]),
                InputMode::LoopVideo => {
                    args.extend(["-stream_loop".to_string(), "-1".to_string()])
                }
            }
            args.push("-i".to_string());
            args.push(input.path.to_string_lossy().into_owned());
        }

        args.push("-filter_complex".to_string());
        args.push(self.filter_complex.clone());
        args.push("-map".to_string());
        args.push(format!("[{}]", self.video_label));
        match &self.audio_label {
            Some(label) => {
                args.push("-map".to_string());
                args.push(format!("[{label}]"));
            }
            None => args.push("-an".to_string()),
        }

        args.push("-r".to_string());
        args.push(self.frame_rate.to_string());
        args.push("-t".to_string());
        args.push(self.duration.to_secs_string());
        args.extend(self.codec_args.iter().cloned());

        args.push("-progress".to_string());
        args.push("pipe:1".to_string());
        args.push("-y".to_string());
        args.push(self.output.to_string_lossy().into_owned());
        args
    }
}

/// How an engine run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The process exited on its own. `code` is `None` when it was killed by a
    /// signal.
    Exited {
        code: Option<i32>,
        stderr_tail: String,
    },
    /// The wall-clock limit elapsed and the process was killed.
    TimedOut { stderr_tail: String },
    /// The session was cancelled and the process was killed.
    Cancelled,
}

impl ExecutionOutcome {
    pub fn success() -> Self {
        Self::Exited {
            code: Some(0),
            stderr_tail: String::new(),
        }
    }
}

/// Limits applied to one run.
#[derive(Debug, Clone)]
pub struct ExecutionControl {
    pub timeout: Duration,
    pub cancel: CancelToken,
    /// Number of trailing stderr lines kept for diagnostics.
    pub diagnostic_lines: usize,
}

impl ExecutionControl {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            cancel: CancelToken::never(),
            diagnostic_lines: 20,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_diagnostic_lines(mut self, lines: usize) -> Self {
        self.diagnostic_lines = lines;
        self
    }
}

/// Requests cancellation of one or more sessions.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

/// Observes a [`CancelHandle`].
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Pends forever if the handle
    /// is dropped first.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Trait for rendering engines.
#[async_trait]
pub trait GraphExecutor: Send + Sync {
    /// Run one invocation.
    ///
    /// Fails with `RenderEngineUnavailable` when the engine cannot be started.
    /// Every other ending is an [`ExecutionOutcome`].
    async fn execute(
        &self,
        invocation: &EngineInvocation,
        control: &ExecutionControl,
        progress: Option<&ProgressCallback>,
    ) -> DuetResult<ExecutionOutcome>;

    /// Check if the engine is usable on this system.
    async fn is_available(&self) -> bool;

    /// Engine name.
    fn name(&self) -> &str;
}

/// Bounded buffer of the most recent stderr lines.
#[derive(Debug, Clone)]
pub struct DiagnosticTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl DiagnosticTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(256)),
            capacity,
        }
    }

    pub fn push(&mut self, line: String) {
        if self.capacity == 0 || line.trim().is_empty() {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn joined(&self) -> String {
        self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

/// Runs invocations with an ffmpeg binary.
#[derive(Debug, Clone)]
pub struct FfmpegExecutor {
    binary: PathBuf,
}

impl Default for FfmpegExecutor {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

enum Stop {
    Finished(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

enum Ended {
    Exited(Option<i32>),
    TimedOut,
    Cancelled,
}

impl FfmpegExecutor {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

#[async_trait]
impl GraphExecutor for FfmpegExecutor {
    async fn execute(
        &self,
        invocation: &EngineInvocation,
        control: &ExecutionControl,
        progress: Option<&ProgressCallback>,
    ) -> DuetResult<ExecutionOutcome> {
        let args = invocation.to_args();
        tracing::debug!(binary = %self.binary.display(), args = ?args, "Spawning engine");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DuetError::unavailable(format!("failed to spawn {}: {e}", self.binary.display()))
            })?;

        // Drained concurrently so a full stderr pipe can never block the engine.
        let tail = Arc::new(Mutex::new(DiagnosticTail::new(control.diagnostic_lines)));
        let stderr_task = child.stderr.take().map(|stderr| {
            let tail = Arc::clone(&tail);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Ok(mut tail) = tail.lock() {
                        tail.push(line);
                    }
                }
            })
        });

        let stdout = child.stdout.take();
        let mut cancel = control.cancel.clone();
        let stop = tokio::select! {
            status = supervise(&mut child, stdout, invocation, progress) => Stop::Finished(status),
            _ = tokio::time::sleep(control.timeout) => Stop::TimedOut,
            _ = cancel.cancelled() => Stop::Cancelled,
        };

        let ended = match stop {
            Stop::Finished(Ok(status)) => Ended::Exited(status.code()),
            Stop::Finished(Err(err)) => {
                kill(&mut child).await;
                return Err(DuetError::render(format!("failed to wait on engine: {err}")));
            }
            Stop::TimedOut => {
                kill(&mut child).await;
                Ended::TimedOut
            }
            Stop::Cancelled => {
                kill(&mut child).await;
                Ended::Cancelled
            }
        };

        // A grandchild may keep stderr open after the engine is gone.
        if let Some(task) = stderr_task {
            if tokio::time::timeout(STDERR_GRACE, task).await.is_err() {
                tracing::debug!("stderr still open after engine exit");
            }
        }
        let stderr_tail = tail.lock().map(|t| t.joined()).unwrap_or_default();

        Ok(match ended {
            Ended::Exited(code) => ExecutionOutcome::Exited { code, stderr_tail },
            Ended::TimedOut => ExecutionOutcome::TimedOut { stderr_tail },
            Ended::Cancelled => ExecutionOutcome::Cancelled,
        })
    }

    async fn is_available(&self) -> bool {
        command_exists(&self.binary).await
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

/// Kill and reap the engine process.
async fn kill(child: &mut Child) {
    if let Err(err) = child.kill().await {
        tracing::warn!(error = %err, "Failed to kill engine process");
    }
}

/// Read the progress pipe until it closes, then reap the process.
async fn supervise(
    child: &mut Child,
    stdout: Option<ChildStdout>,
    invocation: &EngineInvocation,
    progress: Option<&ProgressCallback>,
) -> std::io::Result<ExitStatus> {
    if let Some(stdout) = stdout {
        let clock = RenderClock::start();
        let expected_secs = invocation.duration.to_f64();
        let mut state = ProgressState::default();
        let mut last_out_time = 0.0;
        let mut last_advance = Instant::now();
        let mut lines = BufReader::new(stdout).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            if !state.feed_line(&line) {
                continue;
            }
            if let Some(cb) = progress {
                cb(progress_report(
                    &state,
                    invocation.total_frames,
                    expected_secs,
                    clock.elapsed_secs(),
                ));
            }
            if state.out_time_secs > last_out_time {
                last_out_time = state.out_time_secs;
                last_advance = Instant::now();
            } else if last_advance.elapsed().as_secs() >= STALL_WARN_SECS {
                tracing::warn!(
                    out_time_secs = state.out_time_secs,
                    elapsed_secs = clock.elapsed_secs(),
                    "No engine progress advancement for {STALL_WARN_SECS}s"
                );
                last_advance = Instant::now();
            }
        }
    }
    child.wait().await
}

/// Check whether a binary can be launched, by path or through `PATH`.
pub async fn command_exists(binary: &Path) -> bool {
    if binary.components().count() > 1 {
        return binary.is_file();
    }
    Command::new("sh")
        .arg("-c")
        .arg(format!(
            "command -v {} >/dev/null 2>&1",
            binary.to_string_lossy()
        ))
        .stdin(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}
