//! Local process manager backed by `tokio::process`.

use agentry_core::log::{LogRecord, LogSink};
use agentry_core::process::{
    CreateOptions, OutputSender, Process, ProcessInfo, ProcessManager, ProcessTrigger,
};
use agentry_core::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Starts processes on the agent's own host.
#[derive(Debug, Clone, Default)]
pub struct LocalProcessManager;

impl LocalProcessManager {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessManager for LocalProcessManager {
    async fn create_process(
        &self,
        token: CancellationToken,
        options: CreateOptions,
    ) -> Result<Arc<dyn Process>> {
        let binary = options.binary().to_string();
        if binary.is_empty() {
            return Err(Error::Launch {
                binary,
                message: "no binary specified".to_string(),
            });
        }

        let launch_error = |e: std::io::Error| Error::Launch {
            binary: binary.clone(),
            message: e.to_string(),
        };

        let mut cmd = Command::new(&binary);
        cmd.args(&options.args[1..])
            .envs(&options.environment)
            .stdin(Stdio::null());
        if let Some(dir) = &options.working_directory {
            cmd.current_dir(dir);
        }

        let output = options.output;
        let merged = match (&output.stdout, output.merge_stderr) {
            (Some(_), true) => {
                let (reader, writer) = std::io::pipe().map_err(launch_error)?;
                cmd.stdout(writer.try_clone().map_err(launch_error)?)
                    .stderr(writer);
                Some(reader)
            }
            _ => {
                cmd.stdout(stdio_for(&output.stdout))
                    .stderr(stdio_for(&output.stderr));
                None
            }
        };

        let mut child = cmd.spawn().map_err(launch_error)?;
        // Close the parent's copies of the merged write end so the reader sees EOF.
        drop(cmd);

        // Readers start before anything else can observe the process.
        let mut readers = Vec::new();
        match (merged, output.stdout) {
            (Some(reader), Some(sender)) => {
                let stream = match async_reader(reader) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = child.start_kill();
                        return Err(launch_error(e));
                    }
                };
                readers.push(tokio::spawn(forward_lines(stream, sender)));
            }
            (_, stdout_sender) => {
                if let (Some(stdout), Some(sender)) = (child.stdout.take(), stdout_sender) {
                    readers.push(tokio::spawn(forward_lines(stdout, sender)));
                }
                if let (Some(stderr), Some(sender)) = (child.stderr.take(), output.stderr) {
                    readers.push(tokio::spawn(forward_lines(stderr, sender)));
                }
            }
        }

        let pid = child.id().unwrap_or_default();
        debug!(pid, binary = %binary, "Spawned process");

        let (done_tx, done_rx) = watch::channel(None);
        let process = Arc::new(LocalProcess {
            pid,
            args: options.args,
            start_at: Utc::now(),
            state: Arc::new(Mutex::new(ProcessState::default())),
            done: done_rx,
        });

        tokio::spawn(supervise(
            child,
            token,
            readers,
            process.running_info(),
            Arc::clone(&process.state),
            done_tx,
        ));

        Ok(process)
    }
}

fn stdio_for(sender: &Option<OutputSender>) -> Stdio {
    if sender.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    }
}

#[cfg(unix)]
fn async_reader(
    reader: std::io::PipeReader,
) -> std::io::Result<tokio::net::unix::pipe::Receiver> {
    tokio::net::unix::pipe::Receiver::from_owned_fd(reader.into())
}

#[cfg(not(unix))]
fn async_reader(reader: std::io::PipeReader) -> std::io::Result<tokio::fs::File> {
    let handle: std::os::windows::io::OwnedHandle = reader.into();
    Ok(tokio::fs::File::from_std(std::fs::File::from(handle)))
}

async fn forward_lines<R>(reader: R, sender: OutputSender)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                sender.sink.send(LogRecord::new(sender.level, line));
            }
            Err(e) => {
                warn!(error = %e, "Output stream error");
                break;
            }
        }
    }
}

/// Wait for exit (or kill on cancellation), drain output, then fire triggers.
async fn supervise(
    mut child: Child,
    token: CancellationToken,
    readers: Vec<JoinHandle<()>>,
    running: ProcessInfo,
    state: Arc<Mutex<ProcessState>>,
    done: watch::Sender<Option<ProcessInfo>>,
) {
    let (status, cancelled) = tokio::select! {
        status = child.wait() => (status, false),
        () = token.cancelled() => {
            debug!(pid = running.pid, "Cancellation requested; killing process");
            if let Err(e) = child.start_kill() {
                warn!(pid = running.pid, error = %e, "Failed to kill cancelled process");
            }
            (child.wait().await, true)
        }
    };

    for result in join_all(readers).await {
        if let Err(e) = result {
            warn!(pid = running.pid, error = %e, "Output reader task failed");
        }
    }

    let info = finished_info(running, status, cancelled, Utc::now());

    let triggers = match state.lock() {
        Ok(mut state) => {
            state.exited = Some(info.clone());
            std::mem::take(&mut state.triggers)
        }
        Err(_) => Vec::new(),
    };

    done.send_replace(Some(info.clone()));

    for trigger in triggers {
        trigger(&info);
    }
}

fn finished_info(
    mut info: ProcessInfo,
    status: std::io::Result<ExitStatus>,
    cancelled: bool,
    end_at: DateTime<Utc>,
) -> ProcessInfo {
    info.is_running = false;
    info.complete = true;
    info.cancelled = cancelled;
    info.end_at = Some(end_at);

    match status {
        Ok(status) => {
            info.exit_code = status.code();
            info.successful = status.success() && !cancelled;
        }
        Err(e) => {
            warn!(pid = info.pid, error = %e, "Failed to wait for process");
            info.successful = false;
        }
    }
    info
}

#[derive(Default)]
struct ProcessState {
    exited: Option<ProcessInfo>,
    triggers: Vec<ProcessTrigger>,
}

/// A process started by [`LocalProcessManager`].
pub struct LocalProcess {
    pid: u32,
    args: Vec<String>,
    start_at: DateTime<Utc>,
    state: Arc<Mutex<ProcessState>>,
    done: watch::Receiver<Option<ProcessInfo>>,
}

impl LocalProcess {
    fn running_info(&self) -> ProcessInfo {
        ProcessInfo {
            pid: self.pid,
            args: self.args.clone(),
            is_running: true,
            complete: false,
            successful: false,
            cancelled: false,
            exit_code: None,
            start_at: self.start_at,
            end_at: None,
        }
    }
}

#[async_trait]
impl Process for LocalProcess {
    fn info(&self) -> ProcessInfo {
        self.done
            .borrow()
            .clone()
            .unwrap_or_else(|| self.running_info())
    }

    async fn wait(&self) -> Result<ProcessInfo> {
        let mut done = self.done.clone();
        let info = done
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::Internal(format!("lost track of process {}", self.pid)))?;
        info.clone()
            .ok_or_else(|| Error::Internal(format!("lost track of process {}", self.pid)))
    }

    fn register_trigger(&self, trigger: ProcessTrigger) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::Internal("process state lock poisoned".to_string()))?;

        if let Some(info) = state.exited.clone() {
            drop(state);
            trigger(&info);
            return Ok(());
        }

        state.triggers.push(trigger);
        Ok(())
    }
}
