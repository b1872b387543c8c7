//! API route modules.

pub mod auth;
pub mod health;
pub mod pages;

use axum::{Router, middleware};

use crate::api::error::ApiError;
use crate::api::middleware::require_auth;
use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    let protected = pages::router().route_layer(middleware::from_fn_with_state(
        state.clone(),
        require_auth,
    ));

    Router::new()
        .nest("/auth", auth::router())
        .nest("/pages", protected)
        .merge(health::router())
        .fallback(route_not_found)
        .with_state(state)
}

async fn route_not_found() -> ApiError {
    ApiError::not_found("Route not found")
}
