//! API server setup and configuration.

use axum::Router;
use axum::extract::Request;
use axum::http::HeaderValue;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::api::routes;
use crate::auth::{AuthService, TokenService};
use crate::error::{Error, Result};
use crate::scraper::PageService;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Server bind address
    pub bind_address: String,
    /// Server port
    pub port: u16,
    /// Allowed CORS origin; any origin when unset
    pub cors_origin: Option<String>,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 3000,
            cors_origin: None,
        }
    }
}

impl ApiServerConfig {
    /// Load API server config from environment variables, falling back to defaults.
    ///
    /// Supported env vars:
    /// - `API_BIND_ADDRESS` (e.g. "0.0.0.0")
    /// - `API_PORT` (e.g. "8080")
    /// - `CORS_ORIGIN` (e.g. "http://localhost:5173")
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(bind_address) = std::env::var("API_BIND_ADDRESS")
            && !bind_address.trim().is_empty()
        {
            config.bind_address = bind_address;
        }

        if let Ok(port) = std::env::var("API_PORT")
            && let Ok(parsed) = port.parse::<u16>()
        {
            config.port = parsed;
        }

        if let Ok(origin) = std::env::var("CORS_ORIGIN")
            && !origin.trim().is_empty()
            && origin.trim() != "*"
        {
            config.cors_origin = Some(origin.trim().to_string());
        }

        config
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server start time for uptime calculation
    pub start_time: Instant,
    pub tokens: Arc<TokenService>,
    pub auth: Arc<AuthService>,
    pub pages: Arc<PageService>,
}

impl AppState {
    pub fn new(auth: Arc<AuthService>, pages: Arc<PageService>) -> Self {
        Self {
            start_time: Instant::now(),
            tokens: auth.tokens().clone(),
            auth,
            pages,
        }
    }
}

/// API server.
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, state: AppState) -> Self {
        Self {
            config,
            state,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Get the cancellation token for graceful shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Build the router with all middleware and routes.
    pub fn build_router(&self) -> Router {
        let router = routes::create_router(self.state.clone());

        let cors = match self
            .config
            .cors_origin
            .as_deref()
            .and_then(|origin| HeaderValue::from_str(origin).ok())
        {
            Some(origin) => CorsLayer::new().allow_origin(origin),
            None => CorsLayer::new().allow_origin(Any),
        }
        .allow_methods(Any)
        .allow_headers(Any);

        router.layer(cors).layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    if req.uri().path() == "/health" {
                        Span::none()
                    } else {
                        let mut make_span =
                            tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO);
                        use tower_http::trace::MakeSpan;
                        make_span.make_span(req)
                    }
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &Span| {
                        if span.is_disabled() {
                            return;
                        }
                        let on_response =
                            tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO);
                        use tower_http::trace::OnResponse;
                        on_response.on_response(res, latency, span);
                    },
                ),
        )
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| Error::config(format!("Invalid address: {}", e)))?;
        Ok(TcpListener::bind(addr).await?)
    }

    /// Serve on `listener` until the cancel token fires.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let router = self.build_router();
        if let Ok(addr) = listener.local_addr() {
            tracing::info!("API server listening on http://{}", addr);
        }

        let cancel_token = self.cancel_token.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                tracing::info!("API server shutting down...");
            })
            .await?;

        Ok(())
    }

    /// Start the server.
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ApiServerConfig::default();
        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert!(config.cors_origin.is_none());
    }
}
