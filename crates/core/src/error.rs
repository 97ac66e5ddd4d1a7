//! Core error types

use thiserror::Error;

use crate::config::ConfigError;

/// Core error type for Lifeline
#[derive(Debug, Error)]
pub enum CoreError {
    /// Generic error
    #[error("Core error: {0}")]
    Generic(String),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias over [`CoreError`]
pub type Result<T> = std::result::Result<T, CoreError>;
