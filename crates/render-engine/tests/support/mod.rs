//! Fake engine and probe shared by the render-engine integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use duet_common::error::{DuetError, DuetResult};
use duet_processing_core::{compile_composition, CompiledGraph};
use duet_project_model::{
    Anchor, AudioSource, Canvas, ClipDescriptor, Composition, FillPolicy, Margin, MediaProbe,
    PlacementSpec, Rational, ScalePolicy,
};
use duet_render_engine::{
    EngineInvocation, ExecutionControl, ExecutionOutcome, GraphExecutor, ProgressCallback,
    ProgressState, progress_report,
};

/// What the fake engine does on one call.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Write these bytes to the output and exit 0.
    Produce(&'static [u8]),
    /// Write a few bytes, then exit with this code and stderr.
    Exit(i32, &'static str),
    /// Exit 0 without writing anything.
    ExitQuietly,
    /// Write a few bytes, then report a timeout.
    TimeOut(&'static str),
    /// Write a few bytes and block until cancelled.
    WaitForCancel,
    /// Fail to launch.
    FailLaunch,
}

#[derive(Debug, Default)]
pub struct FakeExecutor {
    script: Mutex<VecDeque<Behavior>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<EngineInvocation>>,
}

impl FakeExecutor {
    pub fn new(script: impl IntoIterator<Item = Behavior>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_invocation(&self) -> Option<EngineInvocation> {
        self.seen.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl GraphExecutor for FakeExecutor {
    async fn execute(
        &self,
        invocation: &EngineInvocation,
        control: &ExecutionControl,
        progress: Option<&ProgressCallback>,
    ) -> DuetResult<ExecutionOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(invocation.clone());
        let behavior = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Behavior::Produce(b"video"));

        let partial = &invocation.output;
        match behavior {
            Behavior::Produce(bytes) => {
                tokio::fs::write(partial, bytes).await?;
                if let Some(cb) = progress {
                    let mut state = ProgressState::default();
                    state.feed_line("out_time_us=5000000");
                    state.feed_line("progress=continue");
                    cb(progress_report(&state, invocation.total_frames, invocation.duration.to_f64(), 1.0));
                }
                Ok(ExecutionOutcome::success())
            }
            Behavior::Exit(code, stderr) => {
                tokio::fs::write(partial, b"half").await?;
                Ok(ExecutionOutcome::Exited {
                    code: Some(code),
                    stderr_tail: stderr.to_string(),
                })
            }
            Behavior::ExitQuietly => Ok(ExecutionOutcome::success()),
            Behavior::TimeOut(stderr) => {
                tokio::fs::write(partial, b"half").await?;
                Ok(ExecutionOutcome::TimedOut {
                    stderr_tail: stderr.to_string(),
                })
            }
            Behavior::WaitForCancel => {
                tokio::fs::write(partial, b"half").await?;
                let mut cancel = control.cancel.clone();
                cancel.cancelled().await;
                Ok(ExecutionOutcome::Cancelled)
            }
            Behavior::FailLaunch => Err(DuetError::unavailable("spawn race")),
        }
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Probe answering from file names alone.
#[derive(Debug, Default)]
pub struct NameProbe {
    calls: AtomicUsize,
}

impl NameProbe {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MediaProbe for NameProbe {
    fn probe(&self, source: &Path) -> DuetResult<ClipDescriptor> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name.starts_with("webcam") {
            ClipDescriptor::new(source, secs(6), secs(30), 640, 480, true)
        } else {
            ClipDescriptor::new(source, secs(10), secs(30), 1920, 1080, true)
        }
    }

    fn probe_audio(&self, source: &Path) -> DuetResult<AudioSource> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(AudioSource {
            source_path: source.to_path_buf(),
            duration: secs(2),
        })
    }
}

pub fn secs(value: i64) -> Rational {
    Rational::from_int(value)
}

/// 10s screen recording with a 6s webcam held in the top-right corner.
pub fn scenario_graph() -> CompiledGraph {
    let screen = ClipDescriptor::new("screen.mp4", secs(10), secs(30), 1920, 1080, true).unwrap();
    let webcam = ClipDescriptor::new("webcam.mp4", secs(6), secs(30), 640, 480, true).unwrap();
    let composition = Composition::new(
        Canvas::new(1920, 1080),
        vec![
            PlacementSpec::primary(screen),
            PlacementSpec::overlay(webcam)
                .anchored(Anchor::TopRight)
                .scaled(ScalePolicy::width_ratio(0.05))
                .with_margin(Margin::uniform(0.05))
                .with_fill(FillPolicy::HoldLastFrame),
        ],
    )
    .unwrap();
    compile_composition(&composition).unwrap()
}
