//! Service error types

use thiserror::Error;

/// Result type alias for service calls
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Errors reported by a service call
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Pagination error: {0}")]
    Pagination(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Injected failure: {0}")]
    Injected(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ServiceError {
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        ServiceError::Rejected {
            status,
            message: message.into(),
        }
    }
}
