//! agentry CLI tool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "agentry")]
#[command(about = "Run CI agent process steps", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every subprocess.exec step in a step file
    Run {
        /// Path to the step file
        #[arg(default_value = "steps.kdl")]
        path: PathBuf,
        /// Task id; generated when omitted
        #[arg(long)]
        task_id: Option<String>,
        /// Task working directory
        #[arg(long, env = "AGENTRY_WORK_DIR", default_value = ".")]
        work_dir: PathBuf,
        /// Expansion available to steps, as KEY=VALUE
        #[arg(long = "expansion", short = 'e', value_parser = commands::parse_expansion)]
        expansions: Vec<(String, String)>,
    },
    /// Validate a step file without running it
    Validate {
        /// Path to the step file
        #[arg(default_value = "steps.kdl")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    match cli.command {
        Commands::Run {
            path,
            task_id,
            work_dir,
            expansions,
        } => {
            commands::run::run_steps(&path, task_id, &work_dir, expansions).await?;
        }
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
    }

    Ok(())
}
