//! Per-step execution context.

use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::TaskId;
use crate::expansion::Expander;
use crate::log::LogSinks;

/// Runtime identity and collaborators for one step invocation.
///
/// Owned by the caller; the engine only reads it and registers work against
/// the cancellation token.
#[derive(Clone)]
pub struct ExecutionContext {
    pub task_id: TaskId,
    /// Process id of the agent running the step.
    pub agent_pid: u32,
    /// Root directory of the task; relative working directories resolve here.
    pub work_dir: PathBuf,
    pub expansions: Arc<dyn Expander>,
    /// Cancelled when the caller aborts the step or its deadline passes.
    pub cancellation_token: CancellationToken,
    pub sinks: LogSinks,
}

impl ExecutionContext {
    pub fn new(
        task_id: impl Into<TaskId>,
        work_dir: impl Into<PathBuf>,
        expansions: Arc<dyn Expander>,
        sinks: LogSinks,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            agent_pid: std::process::id(),
            work_dir: work_dir.into(),
            expansions,
            cancellation_token: CancellationToken::new(),
            sinks,
        }
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("task_id", &self.task_id)
            .field("agent_pid", &self.agent_pid)
            .field("work_dir", &self.work_dir)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
