//! Model-level error types.

use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Invalid settings: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Invalid job state: {0}")]
    InvalidState(String),

    #[error("Invalid identifier: {0}")]
    InvalidId(String),
}

impl ModelError {
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
