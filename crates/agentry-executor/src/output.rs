//! Output routing for command processes.

use agentry_core::CommandSpec;
use agentry_core::log::{LogLevel, LogSinks};
use agentry_core::process::{OutputOptions, OutputSender};

/// Decide where a command's stdout and stderr are logged.
///
/// Output goes to the system log when `system_log` is set, otherwise to the
/// task log. stdout lines are logged at info and stderr lines at error,
/// except that redirected stderr is merged into the stdout stream.
pub fn route_output(spec: &CommandSpec, sinks: &LogSinks) -> OutputOptions {
    let sink = if spec.system_log {
        &sinks.system
    } else {
        &sinks.task
    };

    let stdout =
        (!spec.ignore_stdout).then(|| OutputSender::new(sink.clone(), LogLevel::Info));

    let merge_stderr = spec.redirect_stderr_to_stdout && !spec.ignore_stderr;
    let stderr = (!spec.ignore_stderr && !merge_stderr)
        .then(|| OutputSender::new(sink.clone(), LogLevel::Error));

    OutputOptions {
        stdout,
        stderr,
        merge_stderr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentry_core::log::{LogSink, MemorySink};
    use std::sync::Arc;

    struct Sinks {
        task: Arc<MemorySink>,
        system: Arc<MemorySink>,
        pair: LogSinks,
    }

    fn sinks() -> Sinks {
        let task = Arc::new(MemorySink::new());
        let system = Arc::new(MemorySink::new());
        let pair = LogSinks::new(task.clone(), system.clone());
        Sinks { task, system, pair }
    }

    fn emit(sender: &Option<OutputSender>, line: &str) {
        let sender = sender.as_ref().expect("stream should be routed");
        sender.sink.log(sender.level, line);
    }

    #[test]
    fn test_default_routes_to_task_log() {
        let s = sinks();
        let spec = CommandSpec::new("ls", Vec::<String>::new());
        let output = route_output(&spec, &s.pair);

        emit(&output.stdout, "out");
        emit(&output.stderr, "err");

        assert!(s.task.contains(LogLevel::Info, "out"));
        assert!(s.task.contains(LogLevel::Error, "err"));
        assert!(s.system.records().is_empty());
    }

    #[test]
    fn test_system_log_routes_to_system_sink() {
        let s = sinks();
        let mut spec = CommandSpec::new("ls", Vec::<String>::new());
        spec.system_log = true;
        let output = route_output(&spec, &s.pair);

        emit(&output.stdout, "out");
        emit(&output.stderr, "err");

        assert!(s.system.contains(LogLevel::Info, "out"));
        assert!(s.system.contains(LogLevel::Error, "err"));
        assert!(s.task.records().is_empty());
    }

    #[test]
    fn test_ignore_flags_discard_streams() {
        let s = sinks();
        let mut spec = CommandSpec::new("ls", Vec::<String>::new());
        spec.ignore_stdout = true;
        let output = route_output(&spec, &s.pair);
        assert!(output.stdout.is_none());
        assert!(output.stderr.is_some());

        spec.ignore_stdout = false;
        spec.ignore_stderr = true;
        let output = route_output(&spec, &s.pair);
        assert!(output.stdout.is_some());
        assert!(output.stderr.is_none());
    }

    #[test]
    fn test_redirect_merges_stderr_into_stdout() {
        let s = sinks();
        let mut spec = CommandSpec::new("ls", Vec::<String>::new());
        spec.redirect_stderr_to_stdout = true;
        let output = route_output(&spec, &s.pair);

        assert!(output.merge_stderr);
        assert!(output.stderr.is_none());
        emit(&output.stdout, "err");
        assert!(s.task.contains(LogLevel::Info, "err"));
    }

    #[test]
    fn test_ignored_stderr_is_not_merged() {
        let s = sinks();
        let mut spec = CommandSpec::new("ls", Vec::<String>::new());
        spec.redirect_stderr_to_stdout = true;
        spec.ignore_stderr = true;
        let output = route_output(&spec, &s.pair);

        assert!(!output.merge_stderr);
        assert!(output.stderr.is_none());
        assert!(output.stdout.is_some());
    }
}
