//! Project export.
//!
//! Ties a project file to a finished video: probe sources, compile the
//! composition, render it, optionally verify the produced duration, and
//! write a render report next to the output.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use duet_common::clock::DriftMeasurement;
use duet_common::config::RenderDefaults;
use duet_common::error::{DuetError, DuetResult};
use duet_processing_core::{compile_composition, CompiledGraph, OUTPUT_PIXEL_FORMAT};
use duet_project_model::{ExportFormat, LoadedProject, MediaProbe, OutputConfig, Rational};

use crate::driver::{partial_path, render, RenderOptions, RenderResult};
use crate::executor::{CancelToken, EngineInvocation, GraphExecutor};
use crate::progress::ProgressCallback;

/// Encoder settings for one output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecSettings {
    pub format: ExportFormat,

    /// Video bitrate in kbps; 0 selects constant-quality encoding.
    pub video_bitrate_kbps: u32,

    pub audio_bitrate_kbps: u32,
}

impl Default for CodecSettings {
    fn default() -> Self {
        Self {
            format: ExportFormat::Mp4H264,
            video_bitrate_kbps: 0,
            audio_bitrate_kbps: 192,
        }
    }
}

impl CodecSettings {
    pub fn from_output(output: &OutputConfig) -> Self {
        Self {
            format: output.format,
            video_bitrate_kbps: output.video_bitrate_kbps,
            audio_bitrate_kbps: output.audio_bitrate_kbps,
        }
    }

    /// Encoder and muxer arguments. Audio arguments are omitted for a silent
    /// output.
    pub fn args(&self, has_audio: bool) -> Vec<String> {
        let video_rate = (self.video_bitrate_kbps > 0)
            .then(|| format!("{}k", self.video_bitrate_kbps.max(1000)));
        let audio_bitrate = format!("{}k", self.audio_bitrate_kbps.max(64));

        let mut args: Vec<&str> = Vec::new();
        let rate_args: Vec<String>;
        match self.format {
            ExportFormat::Mp4H264 => {
                args.extend(["-c:v", "libx264", "-preset", "medium", "-profile:v", "high"]);
                rate_args = match &video_rate {
                    Some(rate) => vec!["-b:v".into(), rate.clone()],
                    None => vec!["-crf".into(), "20".into()],
                };
            }
            ExportFormat::Mp4H265 => {
                args.extend(["-c:v", "libx265", "-preset", "medium", "-tag:v", "hvc1"]);
                rate_args = match &video_rate {
                    Some(rate) => vec!["-b:v".into(), rate.clone()],
                    None => vec!["-crf".into(), "24".into()],
                };
            }
            ExportFormat::Webm => {
                args.extend(["-c:v", "libvpx-vp9", "-row-mt", "1"]);
                rate_args = match &video_rate {
                    Some(rate) => vec!["-b:v".into(), rate.clone()],
                    None => vec!["-crf".into(), "32".into(), "-b:v".into(), "0".into()],
                };
            }
        }

        let mut out: Vec<String> = args.into_iter().map(String::from).collect();
        out.push("-pix_fmt".into());
        out.push(OUTPUT_PIXEL_FORMAT.into());
        out.extend(rate_args);

        if has_audio {
            let codec = match self.format {
                ExportFormat::Webm => "libopus",
                ExportFormat::Mp4H264 | ExportFormat::Mp4H265 => "aac",
            };
            out.extend(["-c:a".into(), codec.into(), "-b:a".into(), audio_bitrate]);
        }
        if self.format != ExportFormat::Webm {
            out.extend(["-movflags".into(), "+faststart".into()]);
        }
        out
    }
}

/// Options for exporting a project.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub overwrite: bool,
    pub timeout: Duration,
    pub diagnostic_lines: usize,
    pub cancel: CancelToken,

    /// Probe the output and compare its duration with the expected one.
    pub verify: bool,

    /// Write `<output>.render.json` after a successful render.
    pub write_report: bool,

    /// Where projects without an explicit output path render to.
    pub output_dir: PathBuf,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self::from_defaults(&RenderDefaults::default())
    }
}

impl ExportOptions {
    pub fn from_defaults(defaults: &RenderDefaults) -> Self {
        Self {
            overwrite: false,
            timeout: Duration::from_secs(defaults.timeout_secs.max(1)),
            diagnostic_lines: defaults.diagnostic_lines,
            cancel: CancelToken::never(),
            verify: true,
            write_report: true,
            output_dir: defaults.output_dir.clone(),
        }
    }

    fn render_options(&self, codec: CodecSettings) -> RenderOptions {
        let mut options = RenderOptions::new(codec)
            .with_overwrite(self.overwrite)
            .with_timeout(self.timeout)
            .with_cancel(self.cancel.clone());
        options.diagnostic_lines = self.diagnostic_lines;
        options
    }
}

/// A compiled project, ready to render or print.
#[derive(Debug, Clone)]
pub struct ExportPlan {
    pub output: PathBuf,
    pub codec: CodecSettings,
    pub graph: CompiledGraph,
    pub invocation: EngineInvocation,
}

/// Outcome of a project export.
#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub render: RenderResult,
    pub drift: Option<DriftMeasurement>,
    pub report: Option<PathBuf>,
}

/// Probe and compile a project without rendering it.
pub async fn plan_project(
    project: &LoadedProject,
    probe: Arc<dyn MediaProbe>,
    output_dir: &Path,
) -> DuetResult<ExportPlan> {
    let loaded = project.clone();
    let composition =
        tokio::task::spawn_blocking(move || loaded.build_composition(probe.as_ref()))
            .await
            .map_err(|e| DuetError::render(format!("probe task failed: {e}")))??;

    let graph = compile_composition(&composition)?;
    let output = project.output_path(output_dir);
    let codec = CodecSettings::from_output(&project.project.output);
    let invocation = EngineInvocation::new(
        &graph,
        codec.args(graph.audio_label.is_some()),
        partial_path(&output, codec.format.extension()),
    );

    Ok(ExportPlan {
        output,
        codec,
        graph,
        invocation,
    })
}

/// Export a project to its configured output file.
///
/// This is the main entry point for rendering.
pub async fn export_project(
    project: &LoadedProject,
    probe: Arc<dyn MediaProbe>,
    executor: &dyn GraphExecutor,
    options: &ExportOptions,
    progress: Option<&ProgressCallback>,
) -> DuetResult<ExportSummary> {
    let output = project.output_path(&options.output_dir);
    tracing::info!(
        project = %project.file.display(),
        output = %output.display(),
        format = ?project.project.output.format,
        "Starting export"
    );

    // Checked before probing so an existing output costs nothing.
    if output.exists() && !options.overwrite {
        return Err(DuetError::OutputExists { path: output });
    }

    let plan = plan_project(project, Arc::clone(&probe), &options.output_dir).await?;
    let result = render(
        &plan.graph,
        &plan.output,
        &options.render_options(plan.codec),
        executor,
        progress,
    )
    .await?;

    let drift = if options.verify {
        verify_duration(probe, &result.output, result.duration, result.frame_rate).await
    } else {
        None
    };

    let report = if options.write_report {
        match write_report(&result, &plan, drift).await {
            Ok(path) => Some(path),
            Err(err) => {
                tracing::warn!(error = %err, "Failed to write render report");
                None
            }
        }
    } else {
        None
    };

    Ok(ExportSummary {
        render: result,
        drift,
        report,
    })
}

/// Compare the produced duration with the expected one.
///
/// Drift beyond one frame is logged as a warning. Probe failures are logged
/// and yield `None`; the render itself already succeeded.
pub async fn verify_duration(
    probe: Arc<dyn MediaProbe>,
    output: &Path,
    expected: Rational,
    frame_rate: Rational,
) -> Option<DriftMeasurement> {
    let path = output.to_path_buf();
    let probed = tokio::task::spawn_blocking(move || probe.probe(&path)).await;
    let clip = match probed {
        Ok(Ok(clip)) => clip,
        Ok(Err(err)) => {
            tracing::warn!(output = %output.display(), error = %err, "Could not verify output");
            return None;
        }
        Err(err) => {
            tracing::warn!(error = %err, "Verification task failed");
            return None;
        }
    };

    let drift = DriftMeasurement {
        expected_us: expected.to_micros(),
        measured_us: clip.duration().to_micros(),
    };
    let frame_ms = frame_rate
        .recip()
        .map(|frame| frame.to_f64() * 1000.0)
        .unwrap_or(0.0);
    if drift.exceeds_threshold_ms(frame_ms) {
        tracing::warn!(
            output = %output.display(),
            drift_ms = drift.drift_ms(),
            frame_ms,
            "Output duration drifts by more than one frame"
        );
    } else {
        tracing::debug!(drift_ms = drift.drift_ms(), "Output duration verified");
    }
    Some(drift)
}

/// `<output>.render.json`
pub fn report_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".render.json");
    output.with_file_name(name)
}

async fn write_report(
    result: &RenderResult,
    plan: &ExportPlan,
    drift: Option<DriftMeasurement>,
) -> DuetResult<PathBuf> {
    let frame_ms = result
        .frame_rate
        .recip()
        .map(|frame| frame.to_f64() * 1000.0)
        .unwrap_or(0.0);
    let drifted = drift.is_some_and(|d| d.exceeds_threshold_ms(frame_ms));

    let report = serde_json::json!({
        "output": result.output,
        "format": plan.codec.format,
        "duration_secs": result.duration.to_f64(),
        "duration": result.duration.to_string(),
        "frame_rate": result.frame_rate.to_string(),
        "frames": result.frames,
        "canvas": { "width": plan.graph.canvas.width, "height": plan.graph.canvas.height },
        "inputs": plan.graph.inputs.iter().map(|b| &b.path).collect::<Vec<_>>(),
        "graph_nodes": plan.graph.nodes.len(),
        "filter_complex": plan.invocation.filter_complex,
        "attempts": result.attempts,
        "started_at": result.started_at,
        "elapsed_secs": result.elapsed_secs,
        "drift_ms": drift.map(|d| d.drift_ms()),
        "status": if drifted { "warn" } else { "ok" },
        "written_at": chrono::Utc::now().to_rfc3339(),
    });

    let path = report_path(&result.output);
    tokio::fs::write(&path, serde_json::to_string_pretty(&report)?).await?;
    tracing::info!(report = %path.display(), "Wrote render report");
    Ok(path)
}
