//! Local step execution command.

use agentry_config::{Expansions, load_steps};
use agentry_core::log::LogSinks;
use agentry_core::{ExecutionContext, TaskId};
use agentry_executor::SubprocessExec;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Run every step in `path` in order, stopping at the first failure.
pub async fn run_steps(
    path: &Path,
    task_id: Option<String>,
    work_dir: &Path,
    expansions: Vec<(String, String)>,
) -> Result<()> {
    let steps = load_steps(path)
        .with_context(|| format!("Failed to load step file: {}", path.display()))?;

    let work_dir = work_dir
        .canonicalize()
        .with_context(|| format!("Failed to resolve work dir: {}", work_dir.display()))?;
    let task_id = task_id.map(TaskId::from).unwrap_or_else(TaskId::generate);
    let expansions = Expansions::from_map(expansions.into_iter().collect());

    let ctx = ExecutionContext::new(
        task_id.clone(),
        work_dir.clone(),
        Arc::new(expansions),
        LogSinks::tracing(),
    );

    let token = ctx.cancellation_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; cancelling running step");
            token.cancel();
        }
    });

    info!(task_id = %task_id, work_dir = %work_dir.display(), steps = steps.len(), "Running steps");

    let exec = SubprocessExec::local();
    for (idx, step) in steps.into_iter().enumerate() {
        let binary = if step.command.is_empty() {
            step.binary.clone()
        } else {
            step.command.clone()
        };
        println!("▶ Step {} ({})", idx + 1, binary);

        if let Err(e) = exec.execute(&ctx, step).await {
            println!("✗ Step {} failed: {}", idx + 1, e);
            if !exec.registry().is_empty() {
                println!(
                    "  still running: {}",
                    serde_json::to_string(&exec.registry().dump_all())?
                );
            }
            return Err(e).with_context(|| format!("Step {} failed", idx + 1));
        }
        println!("✓ Step {} completed", idx + 1);
    }

    Ok(())
}
