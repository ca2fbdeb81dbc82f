//! Show source metadata.

use std::path::PathBuf;

use duet_common::config::AppConfig;
use duet_project_model::MediaProbe;
use duet_render_engine::FfprobeProbe;

pub fn run(path: PathBuf, audio: bool, config: &AppConfig) -> anyhow::Result<()> {
    let probe = FfprobeProbe::new(&config.render.ffprobe_binary);

    if audio {
        let source = probe.probe_audio(&path)?;
        println!("Audio: {}", source.source_path.display());
        println!("  Duration: {}s", source.duration.to_secs_string());
        return Ok(());
    }

    let clip = probe.probe(&path)?;
    println!("Clip: {}", clip.source_path().display());
    println!(
        "  Resolution: {}x{} (aspect {:.3})",
        clip.natural_width(),
        clip.natural_height(),
        clip.aspect_ratio()
    );
    println!(
        "  Frame rate: {} ({:.3} fps)",
        clip.frame_rate(),
        clip.frame_rate().to_f64()
    );
    println!("  Duration: {}s", clip.duration().to_secs_string());
    println!("  Audio: {}", if clip.has_audio() { "yes" } else { "no" });

    Ok(())
}
