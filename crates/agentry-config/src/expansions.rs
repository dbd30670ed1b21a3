//! Expansions: named values substituted into step configuration.
//!
//! Supported forms:
//! - `${name}` - value of `name`, or empty if undefined
//! - `${name|fallback}` - literal `fallback` when `name` is undefined or empty
//! - `${name|*other}` - value of `other` when `name` is undefined or empty
//!
//! An opening `${` without a closing brace, or an invalid name, is an error.

use agentry_core::expansion::{ExpandError, Expander};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

// name, optional '*' marker, optional fallback
static EXPANSION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-zA-Z_][a-zA-Z0-9_.\-]*)(?:\|(\*)?(.*))?$").unwrap()
});

/// A set of expansions known to a task.
#[derive(Debug, Clone, Default)]
pub struct Expansions {
    values: HashMap<String, String>,
}

impl Expansions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.put(name, value);
        self
    }

    pub fn put(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Merge `other` in, overwriting existing names.
    pub fn update(&mut self, other: HashMap<String, String>) {
        self.values.extend(other);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn lookup_non_empty(&self, name: &str) -> Option<&str> {
        self.get(name).filter(|v| !v.is_empty())
    }

    fn resolve(&self, raw: &str, body: &str) -> Result<String, ExpandError> {
        let caps = EXPANSION_REGEX
            .captures(body)
            .ok_or_else(|| ExpandError::new(raw, format!("invalid expansion '{}'", body)))?;

        let name = &caps[1];
        if let Some(value) = self.lookup_non_empty(name) {
            return Ok(value.to_string());
        }

        let value = match (caps.get(2), caps.get(3)) {
            (Some(_), Some(other)) => self.get(other.as_str()).unwrap_or_default().to_string(),
            (None, Some(fallback)) => fallback.as_str().to_string(),
            _ => String::new(),
        };
        Ok(value)
    }
}

impl Expander for Expansions {
    fn expand_string(&self, raw: &str) -> Result<String, ExpandError> {
        let mut out = String::with_capacity(raw.len());
        let mut rest = raw;

        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find('}')
                .ok_or_else(|| ExpandError::new(raw, "unterminated expansion"))?;
            out.push_str(&self.resolve(raw, &after[..end])?);
            rest = &after[end + 1..];
        }
        out.push_str(rest);

        Ok(out)
    }

    fn map(&self) -> HashMap<String, String> {
        self.values.clone()
    }
}

impl From<HashMap<String, String>> for Expansions {
    fn from(values: HashMap<String, String>) -> Self {
        Self::from_map(values)
    }
}
