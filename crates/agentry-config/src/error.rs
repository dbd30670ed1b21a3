//! Configuration parsing errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("KDL parse error: {0}")]
    Parse(#[from] kdl::KdlError),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("unknown option '{0}'")]
    UnknownOption(String),

    #[error("invalid value for {field}: expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: String,
    },

    #[error("duplicate definition: {0}")]
    Duplicate(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

impl From<ConfigError> for agentry_core::Error {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Io(e) => agentry_core::Error::Internal(e.to_string()),
            other => agentry_core::Error::ConfigurationConflict(other.to_string()),
        }
    }
}
