//! Command specification for process-execution steps.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{Error, Result};

/// Name under which the process-execution step is registered.
pub const STEP_NAME: &str = "subprocess.exec";

/// Declarative definition of a process to run for a step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Program to execute.
    pub binary: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Shell-style command line; mutually exclusive with `binary`/`args`.
    pub command: String,
    /// Explicit environment for the process.
    pub env: HashMap<String, String>,
    /// Segments prepended to the inherited PATH.
    pub add_to_path: Vec<String>,
    /// Copy every known expansion into the environment.
    pub add_expansions_to_env: bool,
    /// Expansions copied into the environment when defined.
    pub include_expansions_in_env: Vec<String>,
    /// Return as soon as the process has started.
    pub background: bool,
    /// Suppress all output; implies both ignore flags.
    pub silent: bool,
    /// Send output to the system log instead of the task log.
    pub system_log: bool,
    pub working_dir: String,
    pub ignore_stdout: bool,
    pub ignore_stderr: bool,
    pub redirect_stderr_to_stdout: bool,
    /// Log a failed exit instead of failing the step.
    pub continue_on_error: bool,
    /// Keep arguments that are exactly the empty string.
    pub keep_empty_args: bool,
}

impl CommandSpec {
    /// Build a spec that runs `binary` with `args`.
    pub fn new<I, S>(binary: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            binary: binary.into(),
            args: args.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Build a spec from a shell-style command line.
    pub fn from_command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    /// Validate the spec and resolve `command` into `binary` and `args`.
    ///
    /// After a successful call `command` is empty, so normalizing again is a no-op.
    pub fn normalize(&mut self) -> Result<()> {
        self.split_command()?;

        if self.silent {
            self.ignore_stdout = true;
            self.ignore_stderr = true;
        }

        if self.ignore_stdout && self.redirect_stderr_to_stdout {
            return Err(Error::conflict(
                "cannot ignore standard out and redirect standard error to it",
            ));
        }

        Ok(())
    }

    fn split_command(&mut self) -> Result<()> {
        if self.command.is_empty() {
            return Ok(());
        }

        if !self.binary.is_empty() || !self.args.is_empty() {
            return Err(Error::conflict(
                "must specify command as either arguments or a command string but not both",
            ));
        }

        let mut words = split_words(&self.command)
            .map_err(|e| Error::conflict(format!("problem parsing {} command: {}", STEP_NAME, e)))?
            .into_iter();

        let Some(binary) = words.next() else {
            return Err(Error::conflict(format!("no arguments for command {}", STEP_NAME)));
        };

        self.binary = binary;
        self.args = words.collect();
        self.command.clear();
        Ok(())
    }

    /// The full argv: binary followed by arguments.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.binary.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

/// Split a string into words using POSIX shell quoting rules.
///
/// No variable substitution is performed.
pub fn split_words(input: &str) -> std::result::Result<Vec<String>, shell_words::ParseError> {
    shell_words::split(input)
}
