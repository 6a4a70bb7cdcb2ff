//! Common error types

use thiserror::Error;

/// Errors from loading the service configuration.
#[derive(Error, Debug)]
pub enum Error {
    /// A key parsed but holds a value the service cannot run with.
    #[error("invalid value for `{key}`: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    pub fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidValue {
            key,
            reason: reason.into(),
        }
    }
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;
