//! Error types for Lattice Core

use thiserror::Error;

use crate::limits::ValidationError;

/// Result type alias using Lattice's core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("View not found: {0}")]
    ViewNotFound(String),

    #[error("Invalid view definition: {0}")]
    InvalidView(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Validation(err.to_string())
    }
}
