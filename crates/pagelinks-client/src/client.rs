//! HTTP client for the pagelinks API.

use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{ClientError, Result, SESSION_EXPIRED};
use crate::models::{
    AuthResponse, ErrorBody, Link, Page, Paginated, RefreshResponse, ScrapeStatus,
};
use crate::refresh::{RefreshCoordinator, RefreshOutcome, RefreshPolicy, RefreshResult};
use crate::session::{Session, SessionStore};

/// Default interval of the proactive refresh, ahead of the one hour token lifetime.
pub const DEFAULT_PROACTIVE_REFRESH: Duration = Duration::from_secs(50 * 60);

/// Callback invoked after a refresh fails and the session is cleared.
pub type AuthErrorHandler = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// Base URL of the API, e.g. `http://localhost:3000`.
    pub base_url: String,
    pub refresh_policy: RefreshPolicy,
    pub proactive_refresh_interval: Duration,
    pub request_timeout: Duration,
}

impl ApiClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            refresh_policy: RefreshPolicy::default(),
            proactive_refresh_interval: DEFAULT_PROACTIVE_REFRESH,
            request_timeout: Duration::from_secs(30),
        }
    }
}

struct Inner {
    http: reqwest::Client,
    base_url: String,
    config: ApiClientConfig,
    session: SessionStore,
    coordinator: RefreshCoordinator,
    on_auth_error: Option<AuthErrorHandler>,
    cancellation_token: CancellationToken,
}

/// pagelinks API client. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

impl ApiClient {
    pub fn new(config: ApiClientConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Create a client that calls `on_auth_error` whenever the session is
    /// dropped because it could not be refreshed.
    pub fn with_auth_error_handler(
        config: ApiClientConfig,
        on_auth_error: AuthErrorHandler,
    ) -> Result<Self> {
        Self::build(config, Some(on_auth_error))
    }

    fn build(config: ApiClientConfig, on_auth_error: Option<AuthErrorHandler>) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)?
            .as_str()
            .trim_end_matches('/')
            .to_string();
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url,
                config,
                session: SessionStore::default(),
                coordinator: RefreshCoordinator::new(),
                on_auth_error,
                cancellation_token: CancellationToken::new(),
            }),
        })
    }

    pub fn session(&self) -> Option<Session> {
        self.inner.session.get()
    }

    pub fn set_session(&self, session: Session) {
        self.inner.session.set(session);
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.session.is_set()
    }

    pub fn logout(&self) {
        self.inner.session.clear();
    }

    /// Refresh calls started by this client.
    pub fn refresh_count(&self) -> u64 {
        self.inner.coordinator.refresh_count()
    }

    fn url(&self, path: &str) -> Result<Url> {
        Ok(Url::parse(&format!("{}{}", self.inner.base_url, path))?)
    }

    pub async fn register(&self, email: &str, password: &str) -> Result<AuthResponse> {
        self.authenticate("/auth/register", email, password).await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse> {
        self.authenticate("/auth/login", email, password).await
    }

    async fn authenticate(&self, path: &str, email: &str, password: &str) -> Result<AuthResponse> {
        let response = self
            .inner
            .http
            .post(self.url(path)?)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let auth: AuthResponse = decode(response).await?;
        self.inner.session.set(Session::from(auth.clone()));
        info!(user_id = auth.user.id, "Logged in");
        Ok(auth)
    }

    /// Refresh the access token now, sharing any refresh already in flight.
    pub async fn refresh_now(&self) -> Result<String> {
        match self.coordinated_refresh(RefreshPolicy::Share).await {
            RefreshOutcome::Refreshed(token) => Ok(token),
            RefreshOutcome::Failed(reason) => Err(ClientError::SessionExpired(reason)),
            RefreshOutcome::Busy => Err(ClientError::SessionExpired(SESSION_EXPIRED.to_string())),
        }
    }

    async fn coordinated_refresh(&self, policy: RefreshPolicy) -> RefreshOutcome {
        self.inner
            .coordinator
            .refresh(policy, || self.perform_refresh())
            .await
    }

    /// The refresh call itself. Runs in at most one caller at a time.
    async fn perform_refresh(&self) -> RefreshResult {
        let result = self.call_refresh().await;
        match &result {
            Ok(_) => debug!("Access token refreshed"),
            Err(reason) => {
                warn!("Token refresh failed: {}", reason);
                self.inner.session.clear();
                if let Some(on_auth_error) = &self.inner.on_auth_error {
                    on_auth_error();
                }
            }
        }
        result
    }

    async fn call_refresh(&self) -> RefreshResult {
        let Some(refresh_token) = self.inner.session.refresh_token() else {
            return Err(SESSION_EXPIRED.to_string());
        };
        let url = self.url("/auth/refresh").map_err(|e| e.to_string())?;

        let response = self
            .inner
            .http
            .post(url)
            .json(&json!({ "refreshToken": refresh_token }))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let refreshed: RefreshResponse = decode(response).await.map_err(|e| match e {
            ClientError::Api { message, .. } => message,
            other => other.to_string(),
        })?;

        if !self
            .inner
            .session
            .update_access_token(refreshed.access_token.clone())
        {
            return Err(SESSION_EXPIRED.to_string());
        }
        Ok(refreshed.access_token)
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&Value>,
        token: Option<&str>,
    ) -> Result<Response> {
        let mut request = self.inner.http.request(method.clone(), url.clone());
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    /// Send an authenticated request.
    ///
    /// On a 401 the access token is refreshed once (see [`RefreshPolicy`])
    /// and the request replayed once. The replayed response is returned as is.
    pub async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Response> {
        let url = self.url(path)?;
        let token = self.inner.session.access_token();
        let response = self
            .send_once(&method, &url, body, token.as_deref())
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        // Someone else refreshed while this request was out.
        let current = self.inner.session.access_token();
        if current.is_some() && current != token {
            debug!(%url, "Replaying with the already refreshed token");
            return self
                .send_once(&method, &url, body, current.as_deref())
                .await;
        }

        match self.coordinated_refresh(self.inner.config.refresh_policy).await {
            RefreshOutcome::Refreshed(new_token) => {
                self.send_once(&method, &url, body, Some(&new_token)).await
            }
            RefreshOutcome::Busy => Ok(response),
            RefreshOutcome::Failed(reason) => Err(ClientError::SessionExpired(reason)),
        }
    }

    /// Send an authenticated request and decode its JSON body.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        decode(self.send(method, path, body).await?).await
    }

    pub async fn create_page(&self, url: &str) -> Result<Page> {
        self.request(Method::POST, "/pages", Some(&json!({ "url": url })))
            .await
    }

    pub async fn list_pages(&self, limit: u32, offset: u32) -> Result<Paginated<Page>> {
        self.request(
            Method::GET,
            &format!("/pages?limit={}&offset={}", limit, offset),
            None,
        )
        .await
    }

    pub async fn get_page(&self, id: i64) -> Result<Page> {
        self.request(Method::GET, &format!("/pages/{}", id), None)
            .await
    }

    pub async fn list_links(&self, id: i64, limit: u32, offset: u32) -> Result<Paginated<Link>> {
        self.request(
            Method::GET,
            &format!("/pages/{}/links?limit={}&offset={}", id, limit, offset),
            None,
        )
        .await
    }

    pub async fn scrape_status(&self, id: i64) -> Result<ScrapeStatus> {
        self.request(Method::GET, &format!("/pages/{}/scrape-status", id), None)
            .await
    }

    pub async fn delete_page(&self, id: i64) -> Result<()> {
        let response = self
            .send(Method::DELETE, &format!("/pages/{}", id), None)
            .await?;
        ensure_success(response).await.map(|_| ())
    }

    /// Poll a page until it leaves `processing`.
    pub async fn poll_until_terminal(
        &self,
        id: i64,
        interval: Duration,
        timeout: Duration,
    ) -> Result<Page> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let page = self.get_page(id).await?;
            if page.status.is_terminal() {
                return Ok(page);
            }
            if tokio::time::Instant::now() + interval > deadline {
                return Err(ClientError::PollTimeout(id));
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Refresh the access token on a fixed interval until [`ApiClient::shutdown`].
    pub fn start_proactive_refresh(&self) -> JoinHandle<()> {
        let client = self.clone();
        let period = self.inner.config.proactive_refresh_interval;
        let cancellation_token = self.inner.cancellation_token.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if !client.is_authenticated() {
                    continue;
                }
                if let Err(e) = client.refresh_now().await {
                    warn!("Proactive token refresh failed: {}", e);
                }
            }
            debug!("Proactive token refresh stopped");
        })
    }

    /// Stop background tasks.
    pub fn shutdown(&self) {
        self.inner.cancellation_token.cancel();
    }
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.message)
        .unwrap_or_else(|_| {
            status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string()
        });
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = ensure_success(response).await?.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}
