//! CLI command implementations.

pub mod run;

use anyhow::{Context, Result};
use std::path::Path;

/// Parse a `KEY=VALUE` expansion argument.
pub fn parse_expansion(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

pub fn validate(path: &Path) -> Result<()> {
    let steps = agentry_config::load_steps(path)
        .with_context(|| format!("Failed to load step file: {}", path.display()))?;

    for (idx, step) in steps.iter().enumerate() {
        let mut step = step.clone();
        step.normalize()
            .with_context(|| format!("Step {} is invalid", idx + 1))?;
    }

    println!("{} step(s) valid", steps.len());
    Ok(())
}
