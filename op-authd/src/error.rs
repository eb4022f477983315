//! Request-level error taxonomy and its HTTP mapping.
//!
//! Backend detail is logged where the error arises; only sanitised strings
//! reach the client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use op_authd_core::{BackendError, SessionError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    InvalidRequest(String),
    #[error("unauthorized")]
    Unauthenticated,
    #[error("session locked: {0}")]
    SessionLocked(String),
    #[error("access denied by policy")]
    Forbidden,
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        AppError::InvalidRequest(message.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::SessionLocked(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Backend(BackendError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            AppError::Backend(BackendError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Backend(BackendError::Upstream(_)) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The body text sent to the client. Distinguishable per failure class,
    /// never carrying upstream detail for 5xx-class errors.
    pub fn client_message(&self) -> String {
        match self {
            AppError::InvalidRequest(message) => message.clone(),
            AppError::Unauthenticated => "unauthorized".to_string(),
            AppError::SessionLocked(reason) => format!("session locked: {reason}"),
            AppError::Forbidden => "access denied by policy".to_string(),
            AppError::Backend(BackendError::InvalidInput(message)) => message.clone(),
            AppError::Backend(BackendError::NotFound(_)) => "secret not found".to_string(),
            AppError::Backend(BackendError::Upstream(_)) => "failed to read secret".to_string(),
            AppError::Internal(_) => "internal error".to_string(),
        }
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Locked(reason) => AppError::SessionLocked(reason),
            SessionError::Disabled => {
                AppError::invalid_request("session management is disabled")
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status(), self.client_message()).into_response()
    }
}
