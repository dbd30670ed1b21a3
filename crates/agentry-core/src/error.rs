//! Error types for agentry.

use thiserror::Error;

/// A single string substitution that could not be performed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ExpansionFailure {
    /// Which part of the command was being expanded (e.g. `args[2]`, `env.FOO`).
    pub field: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration conflict: {0}")]
    ConfigurationConflict(String),

    #[error("problem expanding strings: {}", join_failures(.0))]
    Expansion(Vec<ExpansionFailure>),

    #[error("invalid working directory: {0}")]
    InvalidWorkingDirectory(String),

    #[error("failed to launch '{binary}': {message}")]
    Launch { binary: String, message: String },

    #[error("process '{binary}' failed: {reason}")]
    ProcessFailure {
        binary: String,
        exit_code: Option<i32>,
        reason: String,
    },

    #[error("{step} aborted")]
    Aborted { step: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::ConfigurationConflict(message.into())
    }

    /// Whether this error came from caller cancellation.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Aborted { .. })
    }
}

fn join_failures(failures: &[ExpansionFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, Error>;
