//! Domain errors
//!
//! Pure domain errors with no infrastructure dependencies

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Malformed delivery token: {0}")]
    MalformedToken(String),

    #[error("Invalid notification key: {0}")]
    InvalidKey(String),

    #[error("Document decode error: {0}")]
    DecodeError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
