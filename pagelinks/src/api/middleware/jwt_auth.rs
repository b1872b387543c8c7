//! JWT authentication middleware.
//!
//! Extracts the Bearer token from the Authorization header, verifies it as an
//! access token and injects [`AuthUser`] into the request extensions.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};

use crate::api::error::ApiError;
use crate::api::server::AppState;

/// The authenticated caller of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: i64,
}

/// Extract the Bearer token from the Authorization header.
fn extract_bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Reject requests without a valid access token.
///
/// A missing or malformed header is reported as `Unauthorized`; a token that
/// fails verification as `Invalid or expired token`.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(&request).ok_or_else(|| ApiError::unauthorized("Unauthorized"))?;
    let user_id = state.tokens.verify_access_token(token)?;

    request.extensions_mut().insert(AuthUser { user_id });
    Ok(next.run(request).await)
}
