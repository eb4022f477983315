use thiserror::Error;

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Failures surfaced by secret backends. Messages are sanitised at the point
/// of construction: no token material or raw upstream bodies ever travel in
/// the `Display` output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("invalid reference or flags: {0}")]
    InvalidInput(String),
    #[error("secret not found: {0}")]
    NotFound(String),
    #[error("upstream failure: {0}")]
    Upstream(String),
}

impl BackendError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        BackendError::InvalidInput(message.into())
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        BackendError::Upstream(message.into())
    }
}

/// Session gate failures observed by the request engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session locked: {0}")]
    Locked(String),
    #[error("session management is disabled")]
    Disabled,
}
