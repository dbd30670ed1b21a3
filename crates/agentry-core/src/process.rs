//! Process manager traits and construction types.
//!
//! Process managers start OS processes under a cancellation token and stream
//! their output into log sinks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::log::{LogLevel, LogSink};

/// A sink and the level every line of a stream is logged at.
#[derive(Clone)]
pub struct OutputSender {
    pub sink: Arc<dyn LogSink>,
    pub level: LogLevel,
}

impl OutputSender {
    pub fn new(sink: Arc<dyn LogSink>, level: LogLevel) -> Self {
        Self { sink, level }
    }
}

impl std::fmt::Debug for OutputSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSender")
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

/// Where a process's output goes. `None` discards the stream.
#[derive(Debug, Clone, Default)]
pub struct OutputOptions {
    pub stdout: Option<OutputSender>,
    pub stderr: Option<OutputSender>,
    /// Write stderr into the same pipe as stdout, so both reach the stdout
    /// sender in the order the process wrote them. `stderr` is unused.
    pub merge_stderr: bool,
}

/// Everything needed to start a process.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Program followed by its arguments.
    pub args: Vec<String>,
    /// Variables set on top of the agent's own environment.
    pub environment: HashMap<String, String>,
    pub working_directory: Option<PathBuf>,
    pub output: OutputOptions,
}

impl CreateOptions {
    pub fn binary(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or_default()
    }
}

/// Snapshot of a process's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub args: Vec<String>,
    pub is_running: bool,
    pub complete: bool,
    pub successful: bool,
    /// Terminated because its cancellation token fired.
    pub cancelled: bool,
    pub exit_code: Option<i32>,
    pub start_at: DateTime<Utc>,
    pub end_at: Option<DateTime<Utc>>,
}

/// Callback run once when a process exits.
pub type ProcessTrigger = Box<dyn FnOnce(&ProcessInfo) + Send + 'static>;

/// A started OS process.
#[async_trait]
pub trait Process: Send + Sync {
    fn info(&self) -> ProcessInfo;

    /// Wait for the process to exit, including draining its output.
    async fn wait(&self) -> Result<ProcessInfo>;

    /// Run `trigger` when the process exits.
    ///
    /// If the process has already exited the trigger runs immediately.
    fn register_trigger(&self, trigger: ProcessTrigger) -> Result<()>;
}

/// Starts processes.
#[async_trait]
pub trait ProcessManager: Send + Sync {
    /// Start a process that is terminated when `token` is cancelled.
    ///
    /// Returns once the process has been spawned and its output is bound.
    async fn create_process(
        &self,
        token: CancellationToken,
        options: CreateOptions,
    ) -> Result<Arc<dyn Process>>;
}
