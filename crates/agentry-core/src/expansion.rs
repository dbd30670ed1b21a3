//! Expansion (template substitution) seam.
//!
//! The substitution grammar is owned by the implementation; the engine only
//! calls [`Expander::expand_string`] and reads the full mapping.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} in '{input}'")]
pub struct ExpandError {
    pub input: String,
    pub message: String,
}

impl ExpandError {
    pub fn new(input: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            message: message.into(),
        }
    }
}

/// Substitutes named values into strings.
pub trait Expander: Send + Sync {
    /// Expand every reference in `raw`.
    fn expand_string(&self, raw: &str) -> Result<String, ExpandError>;

    /// All currently known expansions.
    fn map(&self) -> HashMap<String, String>;
}
