//! Step configuration for the agentry step runner.
//!
//! This crate handles:
//! - Parsing of KDL step documents
//! - The `subprocess.exec` option schema
//! - Expansion substitution

pub mod error;
pub mod expansions;
pub mod options;
pub mod step;

pub use error::{ConfigError, ConfigResult};
pub use expansions::Expansions;
pub use options::{Params, decode_command};
pub use step::{load_steps, parse_steps};
