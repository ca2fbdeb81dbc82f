//! Duet CLI: compose reaction videos from the command line.
//!
//! Usage:
//!   duet init <FILE>            Write a starter project file
//!   duet render <FILE>          Render a project
//!   duet batch <FILE>...        Render several projects concurrently
//!   duet plan <FILE>            Print the compiled filter graph
//!   duet probe <MEDIA>          Show source metadata
//!   duet check                  Check engine availability

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use duet_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "duet",
    about = "Compose a primary video with picture-in-picture reactions in one ffmpeg pass",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter project file
    Init {
        /// Project file to create
        path: PathBuf,

        /// Starter layout: horizontal or vertical
        #[arg(short, long, default_value = "horizontal")]
        layout: String,

        /// Project name (defaults to the file name)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Render a project to its output file
    Render {
        /// Project file
        project: PathBuf,

        /// Replace an existing output
        #[arg(long)]
        overwrite: bool,

        /// Engine timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Skip probing the output duration after rendering
        #[arg(long)]
        no_verify: bool,
    },

    /// Render several projects concurrently
    Batch {
        /// Project files
        #[arg(required = true)]
        projects: Vec<PathBuf>,

        /// Maximum concurrent renders
        #[arg(short, long, default_value = "2")]
        jobs: usize,

        /// Re-render projects whose output already exists
        #[arg(long)]
        overwrite: bool,

        /// Engine timeout in seconds, per project
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Print the compiled filter graph and engine arguments
    Plan {
        /// Project file
        project: PathBuf,

        /// Print the graph as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show metadata for a media file
    Probe {
        /// Media file
        path: PathBuf,

        /// Probe as an audio cue
        #[arg(long)]
        audio: bool,
    },

    /// Check that the rendering engine is available
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };

    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    duet_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Init { path, layout, name } => commands::init::run(path, layout, name, &config),
        Commands::Render {
            project,
            overwrite,
            timeout,
            no_verify,
        } => commands::render::run(project, overwrite, timeout, !no_verify, &config).await,
        Commands::Batch {
            projects,
            jobs,
            overwrite,
            timeout,
        } => commands::batch::run(projects, jobs, overwrite, timeout, &config).await,
        Commands::Plan { project, json } => commands::plan::run(project, json, &config).await,
        Commands::Probe { path, audio } => commands::probe::run(path, audio, &config),
        Commands::Check => commands::check::run(&config).await,
    }
}
