//! Check engine availability.

use std::path::Path;
use std::process::Stdio;

use duet_common::config::{config_file_path, AppConfig};
use duet_render_engine::{command_exists, FfmpegExecutor, GraphExecutor};

pub async fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Duet System Check");
    println!("{}", "=".repeat(50));
    println!("Config: {}", config_file_path().display());

    let ffmpeg = FfmpegExecutor::new(&config.render.ffmpeg_binary);
    let ffmpeg_ok = ffmpeg.is_available().await;
    report("Renderer", ffmpeg.binary(), ffmpeg_ok).await;

    let ffprobe = &config.render.ffprobe_binary;
    let ffprobe_ok = command_exists(ffprobe).await;
    report("Probe", ffprobe, ffprobe_ok).await;

    println!();
    if ffmpeg_ok && ffprobe_ok {
        println!("ffmpeg and ffprobe are available. Duet is ready.");
        Ok(())
    } else {
        anyhow::bail!("required tools are missing; install ffmpeg or fix the config paths")
    }
}

async fn report(label: &str, binary: &Path, available: bool) {
    if !available {
        println!("[MISSING] {label}: {}", binary.display());
        return;
    }
    let version = tokio::process::Command::new(binary)
        .arg("-version")
        .stdin(Stdio::null())
        .output()
        .await
        .ok()
        .and_then(|out| {
            String::from_utf8_lossy(&out.stdout)
                .lines()
                .next()
                .map(str::to_string)
        })
        .unwrap_or_else(|| "unknown version".to_string());
    println!("[OK] {label}: {} ({version})", binary.display());
}
