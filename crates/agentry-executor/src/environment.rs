//! Expansion and environment composition for a command.

use agentry_core::command::split_words;
use agentry_core::expansion::Expander;
use agentry_core::{CommandSpec, Error, ExpansionFailure, Result, TaskId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Environment variable carrying the task id.
pub const TASK_ID_VAR: &str = "AGENTRY_TASK_ID";
/// Environment variable carrying the agent's process id.
pub const AGENT_PID_VAR: &str = "AGENTRY_AGENT_PID";

const TEMP_DIR_VARS: [&str; 3] = ["TMP", "TMPDIR", "TEMP"];

/// The parts of the agent's own environment that feed into a command.
#[derive(Debug, Clone, Default)]
pub struct AmbientEnvironment {
    /// PATH appended after `add_to_path` segments.
    pub path: Option<String>,
}

impl AmbientEnvironment {
    /// Capture the ambient values from the running agent.
    pub fn from_process() -> Self {
        Self {
            path: std::env::var("PATH").ok(),
        }
    }

    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }
}

/// Collects failures so every field is attempted before reporting.
#[derive(Default)]
struct Catcher {
    failures: Vec<ExpansionFailure>,
}

impl Catcher {
    fn expand(&mut self, expander: &dyn Expander, field: impl Into<String>, raw: &str) -> String {
        match expander.expand_string(raw) {
            Ok(value) => value,
            Err(e) => {
                self.add(field, e.to_string());
                raw.to_string()
            }
        }
    }

    fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.failures.push(ExpansionFailure {
            field: field.into(),
            message: message.into(),
        });
    }

    fn resolve(self) -> Result<()> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Expansion(self.failures))
        }
    }
}

/// Expand every templated field of `spec` and merge expansion-sourced variables.
///
/// Runs after normalization, so `command` has already been split into
/// `binary` and `args`.
pub fn expand_command(
    spec: &mut CommandSpec,
    expander: &dyn Expander,
    ambient: &AmbientEnvironment,
) -> Result<()> {
    let mut catcher = Catcher::default();

    spec.working_dir = catcher.expand(expander, "working_dir", &spec.working_dir);
    spec.binary = catcher.expand(expander, "binary", &spec.binary);

    let mut args = Vec::with_capacity(spec.args.len());
    for (idx, raw) in spec.args.iter().enumerate() {
        let field = format!("args[{}]", idx);
        let arg = catcher.expand(expander, &field, raw);
        if arg.is_empty() {
            args.push(arg);
            continue;
        }
        // an expansion may hold several shell words
        match split_words(&arg) {
            Ok(words) => args.extend(words),
            Err(e) => catcher.add(field, e.to_string()),
        }
    }
    spec.args = args;

    let mut keys: Vec<String> = spec.env.keys().cloned().collect();
    keys.sort();
    for key in keys {
        let raw = spec.env[&key].clone();
        let value = catcher.expand(expander, format!("env.{}", key), &raw);
        spec.env.insert(key, value);
    }

    if !spec.add_to_path.is_empty() {
        let mut path: Vec<String> = spec
            .add_to_path
            .iter()
            .enumerate()
            .map(|(idx, segment)| catcher.expand(expander, format!("add_to_path[{}]", idx), segment))
            .collect();
        path.push(ambient.path.clone().unwrap_or_default());
        spec.env.insert("PATH".to_string(), join_path_list(&path));
    }

    let expansions = expander.map();
    if spec.add_expansions_to_env {
        spec.env
            .extend(expansions.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    for name in &spec.include_expansions_in_env {
        if let Some(value) = expansions.get(name) {
            spec.env.insert(name.clone(), value.clone());
        }
    }

    catcher.resolve()
}

fn join_path_list(segments: &[String]) -> String {
    let separator = if cfg!(windows) { ";" } else { ":" };
    segments.join(separator)
}

/// Add task markers and build defaults, leaving user-set values alone.
pub fn add_derived_vars(
    env: &mut HashMap<String, String>,
    task_id: &TaskId,
    agent_pid: u32,
    working_dir: &Path,
) {
    env.entry(TASK_ID_VAR.to_string())
        .or_insert_with(|| task_id.to_string());
    env.entry(AGENT_PID_VAR.to_string())
        .or_insert_with(|| agent_pid.to_string());
    env.entry("GOCACHE".to_string())
        .or_insert_with(|| working_dir.join(".gocache").display().to_string());
    env.entry("CI".to_string())
        .or_insert_with(|| "true".to_string());
}

/// Point the temp-dir variables at `dir` unless already set.
pub fn add_temp_dirs(env: &mut HashMap<String, String>, dir: &Path) {
    for key in TEMP_DIR_VARS {
        env.entry(key.to_string())
            .or_insert_with(|| dir.display().to_string());
    }
}

/// Drop arguments that are exactly empty; whitespace-only arguments stay.
pub fn strip_empty_args(args: &mut Vec<String>) {
    args.retain(|arg| !arg.is_empty());
}

/// Resolve a step's working directory against the task directory.
///
/// Empty means the task directory itself. Paths already under the task
/// directory are used as-is; anything else is placed beneath it. The result
/// must be an existing directory.
pub fn resolve_working_dir(work_dir: &Path, dir: &str) -> Result<PathBuf> {
    let resolved = if dir.is_empty() {
        work_dir.to_path_buf()
    } else if Path::new(dir).starts_with(work_dir) {
        PathBuf::from(dir)
    } else {
        work_dir.join(dir.trim_start_matches(std::path::MAIN_SEPARATOR))
    };

    match std::fs::metadata(&resolved) {
        Ok(meta) if meta.is_dir() => Ok(resolved),
        Ok(_) => Err(Error::InvalidWorkingDirectory(format!(
            "'{}' is not a directory",
            resolved.display()
        ))),
        Err(e) => Err(Error::InvalidWorkingDirectory(format!(
            "'{}': {}",
            resolved.display(),
            e
        ))),
    }
}
