//! Write a starter project file.

use std::path::PathBuf;

use duet_common::config::AppConfig;
use duet_project_model::{LayoutTemplate, LoadedProject};

pub fn run(
    path: PathBuf,
    layout: String,
    name: Option<String>,
    config: &AppConfig,
) -> anyhow::Result<()> {
    let layout: LayoutTemplate = layout.parse()?;
    let name = name.unwrap_or_else(|| {
        path.file_name()
            .map(|n| n.to_string_lossy())
            .and_then(|n| n.split('.').next().map(str::to_string))
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "reaction".to_string())
    });

    let project = LoadedProject::create(&path, &name, layout)
        .map_err(|e| anyhow::anyhow!("Failed to create project: {e}"))?;
    let p = &project.project;

    println!("Created project '{}' at {}", p.name, project.file.display());
    println!("  Layout: {:?} ({}x{})", layout, p.canvas.width, p.canvas.height);
    for clip in &p.clips {
        println!("  {:?}: {}", clip.role, clip.source);
    }
    println!(
        "  Output: {}",
        project.output_path(&config.render.output_dir).display()
    );
    println!();
    println!("Put your recordings next to the project file, then run:");
    println!("  duet render {}", project.file.display());

    Ok(())
}
