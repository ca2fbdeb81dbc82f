//! Print the compiled graph for a project without rendering it.

use std::path::PathBuf;
use std::sync::Arc;

use duet_common::config::AppConfig;
use duet_project_model::{LoadedProject, MediaProbe};
use duet_render_engine::{plan_project, FfprobeProbe};

pub async fn run(path: PathBuf, json: bool, config: &AppConfig) -> anyhow::Result<()> {
    let project =
        LoadedProject::load(&path).map_err(|e| anyhow::anyhow!("Failed to load project: {e}"))?;
    let probe: Arc<dyn MediaProbe> = Arc::new(FfprobeProbe::new(&config.render.ffprobe_binary));
    let plan = plan_project(&project, probe, &config.render.output_dir).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan.graph)?);
        return Ok(());
    }

    let graph = &plan.graph;
    println!("Project: {}", project.project.name);
    println!(
        "  Canvas: {}x{} @ {} fps",
        graph.canvas.width, graph.canvas.height, graph.frame_rate
    );
    println!(
        "  Duration: {}s ({} frames)",
        graph.duration.to_secs_string(),
        graph.frame_count()
    );
    println!("  Output: {}", plan.output.display());
    println!();
    println!("Inputs:");
    for input in &graph.inputs {
        println!("  [{}] {}", input.index, input.path.display());
    }
    println!();
    println!("Filter graph ({} nodes):", graph.nodes.len());
    println!("{}", graph.dump());
    println!();
    println!("Command:");
    let args: Vec<String> = plan.invocation.to_args().iter().map(|a| quote(a)).collect();
    println!("  {} {}", config.render.ffmpeg_binary.display(), args.join(" "));

    Ok(())
}

fn quote(arg: &str) -> String {
    let plain = arg
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:=+@%".contains(c));
    if plain && !arg.is_empty() {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
