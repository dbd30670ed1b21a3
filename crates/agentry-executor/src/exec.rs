//! The `subprocess.exec` step: run a configured process to completion.

use agentry_core::log::{LogLevel, LogRecord};
use agentry_core::process::ProcessManager;
use agentry_core::{CommandSpec, Error, ExecutionContext, Result, STEP_NAME};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::environment::{
    AmbientEnvironment, add_derived_vars, add_temp_dirs, expand_command, resolve_working_dir,
    strip_empty_args,
};
use crate::launcher::{ProcessConstructionParams, build_create_options, construct_process};
use crate::local::LocalProcessManager;
use crate::registry::ProcessRegistry;

/// Runs command steps through a [`ProcessManager`], tracking every process it
/// starts in a shared [`ProcessRegistry`].
#[derive(Clone)]
pub struct SubprocessExec {
    manager: Arc<dyn ProcessManager>,
    registry: Arc<ProcessRegistry>,
    ambient: AmbientEnvironment,
}

impl SubprocessExec {
    pub fn new(manager: Arc<dyn ProcessManager>, registry: Arc<ProcessRegistry>) -> Self {
        Self {
            manager,
            registry,
            ambient: AmbientEnvironment::from_process(),
        }
    }

    /// Run processes on this host with a fresh registry.
    pub fn local() -> Self {
        Self::new(
            Arc::new(LocalProcessManager::new()),
            Arc::new(ProcessRegistry::new()),
        )
    }

    pub fn with_ambient(mut self, ambient: AmbientEnvironment) -> Self {
        self.ambient = ambient;
        self
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    pub fn name(&self) -> &'static str {
        STEP_NAME
    }

    /// Execute one command step.
    ///
    /// Returns once the process exits, or once it has started when the step
    /// runs in the background.
    pub async fn execute(&self, ctx: &ExecutionContext, mut spec: CommandSpec) -> Result<()> {
        spec.normalize()?;

        if let Err(e) = expand_command(&mut spec, ctx.expansions.as_ref(), &self.ambient) {
            ctx.sinks.task.send(
                LogRecord::new(LogLevel::Error, "problem expanding command values")
                    .with_field("error", e.to_string()),
            );
            return Err(e);
        }

        let requested = Path::new(&spec.working_dir);
        if requested.is_absolute() && !requested.starts_with(&ctx.work_dir) {
            ctx.sinks.task.send(
                LogRecord::new(
                    LogLevel::Warning,
                    "working directory is not a child of the task directory",
                )
                .with_field("path", spec.working_dir.clone())
                .with_field("required_prefix", ctx.work_dir.display().to_string()),
            );
        }
        let working_dir = resolve_working_dir(&ctx.work_dir, &spec.working_dir)?;

        let tmp_dir = self.task_tmp_dir(ctx);
        add_temp_dirs(&mut spec.env, &tmp_dir);
        add_derived_vars(&mut spec.env, &ctx.task_id, ctx.agent_pid, &working_dir);

        if !spec.keep_empty_args {
            strip_empty_args(&mut spec.args);
        }

        ctx.sinks.task.send(
            LogRecord::new(LogLevel::Debug, "running command")
                .with_field("working_directory", working_dir.display().to_string())
                .with_field("background", spec.background)
                .with_field("binary", spec.binary.clone()),
        );

        let result = self.run_command(ctx, &spec, working_dir).await;

        if ctx.is_cancelled() && !spec.background {
            return Err(self.abort(ctx, result.err()));
        }

        result
    }

    async fn run_command(
        &self,
        ctx: &ExecutionContext,
        spec: &CommandSpec,
        working_dir: PathBuf,
    ) -> Result<()> {
        if spec.silent {
            ctx.sinks
                .task
                .log(LogLevel::Info, "executing command in silent mode");
        }

        let err = match self.launch_and_wait(ctx, spec, working_dir).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        let failed_run = matches!(err, Error::Launch { .. } | Error::ProcessFailure { .. });
        let aborted = ctx.is_cancelled() && !spec.background;
        if !failed_run || aborted {
            return Err(err);
        }

        if spec.continue_on_error {
            info!(task_id = %ctx.task_id, error = %err, "Continuing after command failure");
            ctx.sinks.task.send(failure_record(
                LogLevel::Notice,
                format!("script errored, but continue on error is set: {}", err),
                ctx,
                spec,
            ));
            return Ok(());
        }

        ctx.sinks.task.send(failure_record(
            LogLevel::Error,
            format!("command failed: {}", err),
            ctx,
            spec,
        ));
        Err(err)
    }

    async fn launch_and_wait(
        &self,
        ctx: &ExecutionContext,
        spec: &CommandSpec,
        working_dir: PathBuf,
    ) -> Result<()> {
        let params = ProcessConstructionParams {
            task_id: ctx.task_id.clone(),
            caller_token: ctx.cancellation_token.clone(),
            sinks: ctx.sinks.clone(),
            background: spec.background,
        };
        let options = build_create_options(spec, spec.env.clone(), working_dir, &ctx.sinks);
        let launched = construct_process(
            self.manager.as_ref(),
            &self.registry,
            &params,
            params.tokens(),
            options,
        )
        .await?;

        if spec.background {
            return Ok(());
        }

        let info = launched.process.wait().await?;
        if info.successful {
            debug!(task_id = %ctx.task_id, pid = launched.pid, "Process completed");
            return Ok(());
        }

        let reason = if info.cancelled {
            "terminated by cancellation".to_string()
        } else if let Some(code) = info.exit_code {
            format!("exit code {}", code)
        } else {
            "terminated by signal".to_string()
        };
        Err(Error::ProcessFailure {
            binary: spec.binary.clone(),
            exit_code: info.exit_code,
            reason,
        })
    }

    /// Report every process still running and turn the outcome into an abort.
    fn abort(&self, ctx: &ExecutionContext, cause: Option<Error>) -> Error {
        warn!(task_id = %ctx.task_id, "Command aborted by caller");

        ctx.sinks
            .system
            .log(LogLevel::Debug, "dumping running processes");
        ctx.sinks.system.send(
            LogRecord::new(LogLevel::Info, "running processes")
                .with_field("task", ctx.task_id.as_str())
                .with_field("processes", self.registry.dump_all()),
        );

        let message = match &cause {
            Some(e) => e.to_string(),
            None => "context canceled".to_string(),
        };
        ctx.sinks.task.log(LogLevel::Notice, &message);

        Error::Aborted {
            step: STEP_NAME.to_string(),
        }
    }

    fn task_tmp_dir(&self, ctx: &ExecutionContext) -> PathBuf {
        let dir = ctx.work_dir.join("tmp");
        match std::fs::create_dir_all(&dir) {
            Ok(()) => dir,
            Err(e) => {
                ctx.sinks.task.send(
                    LogRecord::new(LogLevel::Notice, "problem getting task temp directory")
                        .with_field("path", dir.display().to_string())
                        .with_field("error", e.to_string()),
                );
                std::env::temp_dir()
            }
        }
    }
}

/// A record describing a failed run with the step's identifying flags.
fn failure_record(
    level: LogLevel,
    message: String,
    ctx: &ExecutionContext,
    spec: &CommandSpec,
) -> LogRecord {
    LogRecord::new(level, message)
        .with_field("task", ctx.task_id.as_str())
        .with_field("binary", spec.binary.clone())
        .with_field("background", spec.background)
        .with_field("silent", spec.silent)
        .with_field("continue", spec.continue_on_error)
}

impl std::fmt::Debug for SubprocessExec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubprocessExec")
            .field("registry", &self.registry)
            .field("ambient", &self.ambient)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentry_config::Expansions;
    use agentry_core::log::{LogSinks, MemorySink};

    fn context(dir: &Path) -> (ExecutionContext, Arc<MemorySink>) {
        let task = Arc::new(MemorySink::new());
        let system = Arc::new(MemorySink::new());
        let ctx = ExecutionContext::new(
            "task-1",
            dir,
            Arc::new(Expansions::new().with("greeting", "hi")),
            LogSinks::new(task.clone(), system),
        );
        (ctx, task)
    }

    #[tokio::test]
    async fn test_conflicting_spec_fails_before_launch() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, task) = context(dir.path());
        let exec = SubprocessExec::local();

        let mut spec = CommandSpec::new("echo", vec!["x"]);
        spec.command = "echo y".to_string();

        let err = exec.execute(&ctx, spec).await.unwrap_err();
        assert!(matches!(err, Error::ConfigurationConflict(_)));
        assert!(task.records().is_empty());
        assert!(exec.registry().is_empty());
    }

    #[tokio::test]
    async fn test_expansion_failure_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, task) = context(dir.path());
        let exec = SubprocessExec::local();

        let spec = CommandSpec::new("echo", vec!["${greeting"]);
        let err = exec.execute(&ctx, spec).await.unwrap_err();

        assert!(matches!(err, Error::Expansion(_)));
        assert!(task.contains(LogLevel::Error, "problem expanding command values"));
    }

    #[tokio::test]
    async fn test_missing_working_dir_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _task) = context(dir.path());
        let exec = SubprocessExec::local();

        let mut spec = CommandSpec::new("true", Vec::<String>::new());
        spec.working_dir = "does/not/exist".to_string();

        let err = exec.execute(&ctx, spec).await.unwrap_err();
        assert!(matches!(err, Error::InvalidWorkingDirectory(_)));
    }

    #[tokio::test]
    async fn test_outside_working_dir_warns() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, task) = context(dir.path());
        let exec = SubprocessExec::local();

        let mut spec = CommandSpec::new("true", Vec::<String>::new());
        spec.working_dir = "/definitely/elsewhere".to_string();

        let _ = exec.execute(&ctx, spec).await;
        let warning = task
            .at_level(LogLevel::Warning)
            .into_iter()
            .next()
            .expect("warning record");
        assert_eq!(
            warning.field("path").and_then(|v| v.as_str()),
            Some("/definitely/elsewhere")
        );
        assert!(warning.field("required_prefix").is_some());
    }

    #[tokio::test]
    async fn test_process_failure_propagates_with_context() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, task) = context(dir.path());
        let exec = SubprocessExec::local();

        let spec = CommandSpec::from_command(r#"sh -c "'exit 4'""#);
        match exec.execute(&ctx, spec).await {
            Err(Error::ProcessFailure {
                binary,
                exit_code,
                reason,
            }) => {
                assert_eq!(binary, "sh");
                assert_eq!(exit_code, Some(4));
                assert_eq!(reason, "exit code 4");
            }
            other => panic!("expected process failure, got {:?}", other),
        }

        let record = task
            .at_level(LogLevel::Error)
            .into_iter()
            .find(|r| r.message.starts_with("command failed"))
            .expect("failure record");
        assert_eq!(
            record.field("task").and_then(|v| v.as_str()),
            Some("task-1")
        );
        assert_eq!(
            record.field("background").and_then(|v| v.as_bool()),
            Some(false)
        );
        assert_eq!(
            record.field("silent").and_then(|v| v.as_bool()),
            Some(false)
        );
        assert_eq!(
            record.field("continue").and_then(|v| v.as_bool()),
            Some(false)
        );
    }

    #[tokio::test]
    async fn test_launch_error_propagates_with_context() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, task) = context(dir.path());
        let exec = SubprocessExec::local();

        let spec = CommandSpec::new("definitely-not-a-real-binary-xyz", Vec::<String>::new());
        let err = exec.execute(&ctx, spec).await.unwrap_err();

        assert!(matches!(err, Error::Launch { .. }));
        let record = task
            .at_level(LogLevel::Error)
            .into_iter()
            .find(|r| r.message.starts_with("command failed"))
            .expect("failure record");
        assert_eq!(
            record.field("binary").and_then(|v| v.as_str()),
            Some("definitely-not-a-real-binary-xyz")
        );
    }

    #[tokio::test]
    async fn test_continue_on_error_suppresses_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, task) = context(dir.path());
        let exec = SubprocessExec::local();

        let mut spec = CommandSpec::new("definitely-not-a-real-binary-xyz", Vec::<String>::new());
        spec.continue_on_error = true;

        exec.execute(&ctx, spec).await.unwrap();

        let notice = task
            .at_level(LogLevel::Notice)
            .into_iter()
            .next()
            .expect("notice record");
        assert!(notice.message.contains("failed to launch"));
        assert_eq!(
            notice.field("task").and_then(|v| v.as_str()),
            Some("task-1")
        );
        assert_eq!(
            notice.field("binary").and_then(|v| v.as_str()),
            Some("definitely-not-a-real-binary-xyz")
        );
        assert_eq!(
            notice.field("continue").and_then(|v| v.as_bool()),
            Some(true)
        );
        assert!(exec.registry().is_empty());
    }

    #[tokio::test]
    async fn test_silent_mode_is_announced() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, task) = context(dir.path());
        let exec = SubprocessExec::local();

        let mut spec = CommandSpec::from_command("echo hidden");
        spec.silent = true;

        exec.execute(&ctx, spec).await.unwrap();
        assert!(task.contains(LogLevel::Info, "executing command in silent mode"));
        assert!(!task.contains(LogLevel::Info, "hidden"));
    }

    #[tokio::test]
    async fn test_debug_record_describes_launch() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, task) = context(dir.path());
        let exec = SubprocessExec::local();

        exec.execute(&ctx, CommandSpec::from_command("true"))
            .await
            .unwrap();

        let record = task
            .at_level(LogLevel::Debug)
            .into_iter()
            .find(|r| r.message == "running command")
            .expect("debug record");
        assert_eq!(record.field("binary").and_then(|v| v.as_str()), Some("true"));
        assert_eq!(
            record.field("background").and_then(|v| v.as_bool()),
            Some(false)
        );
        assert!(record.field("working_directory").is_some());
    }
}
