//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Preflight check failed: {0}")]
    Preflight(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Line source error: {0}")]
    LineSource(#[from] linesource::Error),

    #[error("Metrics endpoint error: {0}")]
    Metrics(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn preflight(msg: impl Into<String>) -> Self {
        Self::Preflight(msg.into())
    }
}
