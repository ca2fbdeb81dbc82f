//! Render a project.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use duet_common::config::AppConfig;
use duet_project_model::{LoadedProject, MediaProbe};
use duet_render_engine::{
    export_project, CancelHandle, ExportOptions, FfmpegExecutor, FfprobeProbe, GraphExecutor,
};

use super::{cancel_on_ctrl_c, progress_printer};

pub async fn run(
    path: PathBuf,
    overwrite: bool,
    timeout: Option<u64>,
    verify: bool,
    config: &AppConfig,
) -> anyhow::Result<()> {
    println!("Rendering project: {}", path.display());

    let project =
        LoadedProject::load(&path).map_err(|e| anyhow::anyhow!("Failed to load project: {e}"))?;

    let issues = project.validate_sources();
    if !issues.is_empty() {
        for issue in &issues {
            println!("  - {issue}");
        }
        anyhow::bail!("{} source issue(s) found", issues.len());
    }

    let executor = FfmpegExecutor::new(&config.render.ffmpeg_binary);
    if !executor.is_available().await {
        anyhow::bail!(
            "{} not found; install ffmpeg or set render.ffmpeg_binary (see `duet check`)",
            config.render.ffmpeg_binary.display()
        );
    }
    let probe: Arc<dyn MediaProbe> = Arc::new(FfprobeProbe::new(&config.render.ffprobe_binary));

    let cancel = CancelHandle::new();
    let mut options = ExportOptions::from_defaults(&config.render);
    options.overwrite = overwrite;
    options.verify = verify;
    options.cancel = cancel.token();
    if let Some(secs) = timeout {
        options.timeout = Duration::from_secs(secs.max(1));
    }

    println!("  Output: {}", project.output_path(&options.output_dir).display());
    println!("  Format: {:?}", project.project.output.format);

    let watcher = cancel_on_ctrl_c(&cancel);
    let progress = progress_printer();
    let result = export_project(&project, probe, &executor, &options, Some(&progress)).await;
    watcher.abort();
    println!();

    let summary = result.context("Render failed")?;
    println!("Render complete: {}", summary.render.output.display());
    println!(
        "  {} frames in {:.1}s",
        summary.render.frames, summary.render.elapsed_secs
    );
    if let Some(drift) = summary.drift {
        println!("  Duration drift: {:+.1} ms", drift.drift_ms());
    }
    if let Some(report) = summary.report {
        println!("  Report: {}", report.display());
    }

    Ok(())
}
