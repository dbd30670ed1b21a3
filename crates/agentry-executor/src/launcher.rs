//! Process construction for command steps.
//!
//! A process is started under one of two cancellation tokens:
//!
//! - attached (`background = false`): the process token *is* the caller's
//!   token, so cancelling the step terminates the process.
//! - detached (`background = true`): the process gets a private token the
//!   caller cannot reach. The only thing that cancels it is the process's own
//!   completion trigger, which runs when the process exits.

use agentry_core::log::{LogLevel, LogRecord, LogSinks};
use agentry_core::process::{CreateOptions, Process, ProcessManager, ProcessTrigger};
use agentry_core::{CommandSpec, Result, TaskId};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::output::route_output;
use crate::registry::ProcessRegistry;

/// Inputs that decide how a process is constructed.
#[derive(Debug, Clone)]
pub struct ProcessConstructionParams {
    pub task_id: TaskId,
    pub caller_token: CancellationToken,
    pub sinks: LogSinks,
    pub background: bool,
}

/// The caller's token and the token the process runs under.
#[derive(Debug, Clone)]
pub struct CancellationTokens {
    pub caller_token: CancellationToken,
    pub process_token: CancellationToken,
}

impl ProcessConstructionParams {
    /// Tokens for this launch: aliased when attached, distinct when detached.
    pub fn tokens(&self) -> CancellationTokens {
        let process_token = if self.background {
            CancellationToken::new()
        } else {
            self.caller_token.clone()
        };
        CancellationTokens {
            caller_token: self.caller_token.clone(),
            process_token,
        }
    }
}

/// A started process, tracked and with its output bound.
pub struct LaunchedProcess {
    pub process: Arc<dyn Process>,
    pub pid: u32,
    pub tokens: CancellationTokens,
}

/// Build the process request for a fully composed command.
pub fn build_create_options(
    spec: &CommandSpec,
    environment: HashMap<String, String>,
    working_dir: PathBuf,
    sinks: &LogSinks,
) -> CreateOptions {
    CreateOptions {
        args: spec.argv(),
        environment,
        working_directory: Some(working_dir),
        output: route_output(spec, sinks),
    }
}

/// Start a process under `tokens` and wire up its cancellation and tracking.
///
/// `tokens` come from [`ProcessConstructionParams::tokens`]. The pid is
/// registered before this returns. On launch failure any private token is
/// cancelled before the error is returned.
pub async fn construct_process(
    manager: &dyn ProcessManager,
    registry: &Arc<ProcessRegistry>,
    params: &ProcessConstructionParams,
    tokens: CancellationTokens,
    options: CreateOptions,
) -> Result<LaunchedProcess> {
    let process = match manager
        .create_process(tokens.process_token.clone(), options)
        .await
    {
        Ok(process) => process,
        Err(e) => {
            if params.background {
                tokens.process_token.cancel();
            }
            return Err(e);
        }
    };

    let pid = process.info().pid;
    registry.track(&params.task_id, pid, params.sinks.system.as_ref());

    let registry_ref = Arc::clone(registry);
    let private_token = params.background.then(|| tokens.process_token.clone());
    let trigger: ProcessTrigger = Box::new(move |info| {
        if let Some(token) = private_token {
            token.cancel();
        }
        registry_ref.untrack(info.pid);
    });
    if let Err(e) = process.register_trigger(trigger) {
        warn!(pid, error = %e, "Problem registering cancellation for process");
        params.sinks.system.send(
            LogRecord::new(LogLevel::Warning, "problem registering cancellation for process")
                .with_field("pid", pid)
                .with_field("error", e.to_string()),
        );
    }

    if params.background {
        debug!(task_id = %params.task_id, pid, "Running command in the background");
        params.sinks.task.log(
            LogLevel::Debug,
            &format!("running command in the background [pid={}]", pid),
        );
    } else {
        debug!(task_id = %params.task_id, pid, "Started process");
        params
            .sinks
            .task
            .log(LogLevel::Info, &format!("started process with pid '{}'", pid));
    }

    Ok(LaunchedProcess {
        process,
        pid,
        tokens,
    })
}
