//! Process execution engine for agentry.
//!
//! Runs `subprocess.exec` steps:
//! - normalization and expansion of the command
//! - environment composition and working directory resolution
//! - process launch with attached or detached cancellation
//! - output routing into task and system logs
//! - supervision, continue-on-error and abort reporting

pub mod environment;
pub mod exec;
pub mod launcher;
pub mod local;
pub mod output;
pub mod registry;

pub use environment::{AGENT_PID_VAR, AmbientEnvironment, TASK_ID_VAR};
pub use exec::SubprocessExec;
pub use launcher::{CancellationTokens, LaunchedProcess, ProcessConstructionParams};
pub use local::LocalProcessManager;
pub use registry::{ProcessRegistry, TrackedProcess};
