//! Authentication routes.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    routing::post,
};
use serde::Deserialize;

use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::auth::{AuthResponse, RefreshedAccessToken};

/// Register and login request body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialsRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Refresh token request body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Create the auth router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
}

/// POST /auth/register
async fn register(
    State(state): State<AppState>,
    body: Result<Json<CredentialsRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    let Json(request) = body?;
    let response = state
        .auth
        .register(
            request.email.as_deref().unwrap_or_default(),
            request.password.as_deref().unwrap_or_default(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /auth/login
async fn login(
    State(state): State<AppState>,
    body: Result<Json<CredentialsRequest>, JsonRejection>,
) -> ApiResult<Json<AuthResponse>> {
    let Json(request) = body?;
    let response = state
        .auth
        .login(
            request.email.as_deref().unwrap_or_default(),
            request.password.as_deref().unwrap_or_default(),
        )
        .await?;
    Ok(Json(response))
}

/// POST /auth/refresh
///
/// Exchange a refresh token for a new access token.
async fn refresh(
    State(state): State<AppState>,
    body: Result<Json<RefreshRequest>, JsonRejection>,
) -> ApiResult<Json<RefreshedAccessToken>> {
    // A missing or unreadable body is treated as a missing token.
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let response = state.auth.refresh(request.refresh_token.as_deref())?;
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_request_deserialize() {
        let request: RefreshRequest =
            serde_json::from_str(r#"{"refreshToken": "abc"}"#).unwrap();
        assert_eq!(request.refresh_token.as_deref(), Some("abc"));

        let empty: RefreshRequest = serde_json::from_str("{}").unwrap();
        assert!(empty.refresh_token.is_none());
    }

    #[test]
    fn test_credentials_request_missing_fields() {
        let request: CredentialsRequest =
            serde_json::from_str(r#"{"email": "a@b.c"}"#).unwrap();
        assert_eq!(request.email.as_deref(), Some("a@b.c"));
        assert!(request.password.is_none());
    }
}
