//! API error handling.
//!
//! Every error leaves the API as `{"message": ...}` with a matching status code.
//! Database and I/O details are logged, never returned.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::auth::{AuthError, TokenError};
use crate::error::Error;

/// API error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub message: String,
}

/// API error type that can be converted to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Create a 400 Bad Request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// Create a 401 Unauthorized error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    /// Create a 404 Not Found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// Create a 409 Conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    /// Create a 500 Internal Server Error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound { entity_type, .. } => {
                ApiError::not_found(format!("{} not found", entity_type))
            }
            Error::Validation(msg) => ApiError::bad_request(msg),
            Error::Conflict(msg) => ApiError::conflict(msg),
            Error::InvalidStateTransition { from, to } => {
                ApiError::conflict(format!("Cannot transition from {} to {}", from, to))
            }
            Error::DatabaseSqlx(e) => {
                tracing::error!("Database error: {}", e);
                ApiError::internal("Internal Server Error")
            }
            Error::Database(msg) => {
                tracing::error!("Database error: {}", msg);
                ApiError::internal("Internal Server Error")
            }
            Error::Io(e) => {
                tracing::error!("IO error: {}", e);
                ApiError::internal("Internal Server Error")
            }
            _ => {
                tracing::error!("Unexpected error: {}", err);
                ApiError::internal("Internal Server Error")
            }
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Unauthorized => ApiError::unauthorized(err.to_string()),
            TokenError::MissingToken => ApiError::bad_request(err.to_string()),
            TokenError::Generation(msg) => {
                tracing::error!("Token generation failed: {}", msg);
                ApiError::internal("Internal Server Error")
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingCredentials | AuthError::WeakPassword(_) => {
                ApiError::bad_request(err.to_string())
            }
            AuthError::UserExists => ApiError::conflict(err.to_string()),
            AuthError::InvalidCredentials => ApiError::unauthorized(err.to_string()),
            AuthError::Token(e) => e.into(),
            AuthError::Database(msg) | AuthError::Internal(msg) => {
                tracing::error!("Auth error: {}", msg);
                ApiError::internal("Internal Server Error")
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::new(rejection.status(), rejection.body_text())
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
