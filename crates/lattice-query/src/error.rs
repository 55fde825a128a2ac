//! Query engine error types

use std::time::Duration;

use lattice_client::ServiceError;
use lattice_core::InstanceId;
use thiserror::Error;

/// Result type alias for query engine operations
pub type QueryResult<T> = std::result::Result<T, QueryError>;

/// Query engine error types
///
/// Build-time variants are raised before any network call; execution
/// variants carry the step that was running when the call failed.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Builder state error: {0}")]
    BuilderState(String),

    #[error("Unknown property '{property}' on view {view}")]
    UnknownProperty { view: String, property: String },

    #[error("Property '{property}' on view {view} is not a {expected}")]
    NotARelation {
        view: String,
        property: String,
        expected: &'static str,
    },

    #[error("Step '{step}' references unknown parent '{parent}'")]
    DanglingReference { step: String, parent: String },

    #[error("Query execution failed at step '{step}': {cause}")]
    Execution {
        step: String,
        #[source]
        cause: ServiceError,
    },

    #[error("Query execution was cancelled")]
    Cancelled,

    #[error("Query execution timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error("Row {row} in step '{step}' is not connected to any row of '{parent}'")]
    DanglingRow {
        step: String,
        row: InstanceId,
        parent: String,
    },

    #[error("Query has not been executed")]
    NotExecuted,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Core error: {0}")]
    Core(#[from] lattice_core::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl QueryError {
    pub(crate) fn execution(step: &str, cause: ServiceError) -> Self {
        QueryError::Execution {
            step: step.to_string(),
            cause,
        }
    }

    /// The caller asked for something invalid
    pub fn is_build_error(&self) -> bool {
        matches!(
            self,
            QueryError::BuilderState(_)
                | QueryError::UnknownProperty { .. }
                | QueryError::NotARelation { .. }
                | QueryError::DanglingReference { .. }
                | QueryError::Core(_)
                | QueryError::Config(_)
        )
    }

    /// The service could not satisfy a well-formed query
    pub fn is_execution_error(&self) -> bool {
        matches!(
            self,
            QueryError::Execution { .. } | QueryError::Cancelled | QueryError::Timeout { .. }
        )
    }

    /// Name of the step the error is attached to, if any
    pub fn step(&self) -> Option<&str> {
        match self {
            QueryError::Execution { step, .. }
            | QueryError::DanglingReference { step, .. }
            | QueryError::DanglingRow { step, .. } => Some(step),
            _ => None,
        }
    }
}
