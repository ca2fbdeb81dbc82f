//! Render several projects concurrently.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use duet_common::config::AppConfig;
use duet_project_model::{LoadedProject, MediaProbe};
use duet_render_engine::{
    export_project, CancelHandle, ExportOptions, FfmpegExecutor, FfprobeProbe, GraphExecutor,
};

use super::cancel_on_ctrl_c;

pub async fn run(
    paths: Vec<PathBuf>,
    jobs: usize,
    overwrite: bool,
    timeout: Option<u64>,
    config: &AppConfig,
) -> anyhow::Result<()> {
    let total = paths.len();
    let jobs = jobs.max(1);
    println!("Rendering {total} project(s), {jobs} at a time");

    let executor = Arc::new(FfmpegExecutor::new(&config.render.ffmpeg_binary));
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
    options.cancel = cancel.token();
    if let Some(secs) = timeout {
        options.timeout = Duration::from_secs(secs.max(1));
    }

    let watcher = cancel_on_ctrl_c(&cancel);
    let semaphore = Arc::new(Semaphore::new(jobs));
    let mut sessions = JoinSet::new();
    let mut skipped = 0usize;
    let mut failures: Vec<(PathBuf, String)> = Vec::new();

    for path in paths {
        let project = match LoadedProject::load(&path) {
            Ok(project) => project,
            Err(e) => {
                failures.push((path, e.to_string()));
                continue;
            }
        };
        let output = project.output_path(&options.output_dir);
        if !overwrite && output.exists() {
            println!(
                "  skip {} (output {} exists)",
                path.display(),
                output.display()
            );
            skipped += 1;
            continue;
        }

        let semaphore = Arc::clone(&semaphore);
        let executor = Arc::clone(&executor);
        let probe = Arc::clone(&probe);
        let options = options.clone();
        sessions.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            tracing::info!(project = %path.display(), "Render session started");
            let result = export_project(&project, probe, executor.as_ref(), &options, None).await;
            (path, result)
        });
    }

    let mut rendered = 0usize;
    while let Some(joined) = sessions.join_next().await {
        match joined {
            Ok((path, Ok(summary))) => {
                rendered += 1;
                println!(
                    "  done {} -> {} ({:.1}s)",
                    path.display(),
                    summary.render.output.display(),
                    summary.render.elapsed_secs
                );
            }
            Ok((path, Err(e))) => {
                println!("  FAIL {}: {e}", path.display());
                failures.push((path, e.to_string()));
            }
            Err(e) => failures.push((PathBuf::from("<session>"), e.to_string())),
        }
    }
    watcher.abort();

    println!();
    println!(
        "{rendered} rendered, {skipped} skipped, {} failed",
        failures.len()
    );
    if !failures.is_empty() {
        for (path, error) in &failures {
            println!("  - {}: {error}", path.display());
        }
        anyhow::bail!("{} of {total} project(s) failed", failures.len());
    }

    Ok(())
}
