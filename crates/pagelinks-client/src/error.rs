//! Client error types.

use thiserror::Error;

/// Message used when the server gives no reason for a failed refresh.
pub const SESSION_EXPIRED: &str = "Session expired, please login again";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("{message} (HTTP {status})")]
    Api { status: u16, message: String },

    /// The access token could not be refreshed; the session was cleared.
    #[error("{0}")]
    SessionExpired(String),

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Timed out waiting for page {0}")]
    PollTimeout(i64),
}

impl ClientError {
    /// HTTP status of an API error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401) || matches!(self, Self::SessionExpired(_))
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
