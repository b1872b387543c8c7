//! HTTP API behavior, driven through the router without a socket.

mod common;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

use pagelinks::api::{ApiServer, ApiServerConfig};
use pagelinks::auth::TokenKind;
use pagelinks::services::ServiceContainer;

use common::{ScriptedFetcher, TestDb, container, test_config, test_db};

struct TestApp {
    router: Router,
    services: ServiceContainer,
    _db: TestDb,
}

async fn app() -> TestApp {
    let db = test_db().await;
    let config = test_config(&db);
    // Workers are not started: submitted pages stay in processing.
    let services = container(&db, &config, ScriptedFetcher::new(vec![]));
    let router = ApiServer::new(ApiServerConfig::default(), services.app_state()).build_router();
    TestApp {
        router,
        services,
        _db: db,
    }
}

impl TestApp {
    async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    /// Register `email` and return its access and refresh tokens.
    async fn register(&self, email: &str) -> (String, String) {
        let (status, body) = self
            .send(
                Method::POST,
                "/auth/register",
                None,
                Some(json!({"email": email, "password": "secret-password"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        (
            body["accessToken"].as_str().unwrap().to_string(),
            body["refreshToken"].as_str().unwrap().to_string(),
        )
    }

    async fn submit(&self, token: &str, url: &str) -> Value {
        let (status, body) = self
            .send(Method::POST, "/pages", Some(token), Some(json!({"url": url})))
            .await;
        assert_eq!(status, StatusCode::ACCEPTED, "{body}");
        body
    }
}

#[tokio::test]
async fn health_and_unknown_routes() {
    let app = app().await;

    let (status, body) = app.send(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Server is running");

    let (status, body) = app.send(Method::GET, "/nope", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Route not found");
}

#[tokio::test]
async fn register_and_login() {
    let app = app().await;

    let (status, body) = app
        .send(
            Method::POST,
            "/auth/register",
            None,
            Some(json!({"email": "alice@example.com", "password": "secret-password"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user"]["email"], "alice@example.com");
    assert!(body["user"].get("passwordHash").is_none());
    assert!(body["accessToken"].is_string());
    assert!(body["refreshToken"].is_string());

    let (status, body) = app
        .send(
            Method::POST,
            "/auth/register",
            None,
            Some(json!({"email": "alice@example.com", "password": "another-password"})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["message"], "User already exists");

    let (status, body) = app
        .send(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({"email": "alice@example.com", "password": "secret-password"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["email"], "alice@example.com");

    let (status, body) = app
        .send(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({"email": "alice@example.com", "password": "wrong-password"})),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid credentials");

    let (status, _) = app
        .send(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({"email": "nobody@example.com", "password": "secret-password"})),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn register_validates_input() {
    let app = app().await;

    let (status, body) = app
        .send(Method::POST, "/auth/register", None, Some(json!({"email": "a@example.com"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Email and password are required");

    let (status, body) = app
        .send(
            Method::POST,
            "/auth/register",
            None,
            Some(json!({"email": "a@example.com", "password": "123"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Password must be at least 6 characters");
}

#[tokio::test]
async fn refresh_issues_new_access_token() {
    let app = app().await;
    let (access, refresh) = app.register("refresh@example.com").await;

    let (status, body) = app.send(Method::POST, "/auth/refresh", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Refresh token is required");

    // An access token is not accepted as a refresh token.
    let (status, body) = app
        .send(
            Method::POST,
            "/auth/refresh",
            None,
            Some(json!({"refreshToken": access})),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid or expired token");

    let (status, body) = app
        .send(
            Method::POST,
            "/auth/refresh",
            None,
            Some(json!({"refreshToken": refresh})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["expiresIn"], 3600);
    let new_access = body["accessToken"].as_str().unwrap();

    let (status, _) = app.send(Method::GET, "/pages", Some(new_access), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn pages_require_a_valid_access_token() {
    let app = app().await;
    let (_, refresh) = app.register("guard@example.com").await;

    let (status, body) = app.send(Method::GET, "/pages", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Unauthorized");

    let (status, body) = app.send(Method::GET, "/pages", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid or expired token");

    let (status, _) = app.send(Method::GET, "/pages", Some(&refresh), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let expired = app
        .services
        .tokens
        .issue_token_at(TokenKind::Access, 1, (chrono::Utc::now().timestamp() - 7_200) as u64)
        .unwrap();
    let (status, _) = app.send(Method::GET, "/pages", Some(&expired), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn submit_list_and_delete_pages() {
    let app = app().await;
    let (token, _) = app.register("pages@example.com").await;

    let (status, body) = app
        .send(Method::POST, "/pages", Some(&token), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "URL is required");

    let (status, body) = app
        .send(Method::POST, "/pages", Some(&token), Some(json!({"url": "not a url"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid URL format");

    let first = app.submit(&token, "https://example.com/one").await;
    assert_eq!(first["status"], "processing");
    assert_eq!(first["title"], "Processing...");
    assert_eq!(first["linkCount"], 0);
    let second = app.submit(&token, "https://example.com/two").await;
    let _third = app.submit(&token, "https://example.com/three").await;

    let (status, body) = app
        .send(Method::GET, "/pages?limit=2&offset=0", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    assert_eq!(body["pagination"]["limit"], 2);
    assert_eq!(body["pagination"]["offset"], 0);
    assert_eq!(body["pagination"]["total"], 3);

    let (_, body) = app
        .send(Method::GET, "/pages?limit=1000&offset=-4", Some(&token), None)
        .await;
    assert_eq!(body["pagination"]["limit"], 20);
    assert_eq!(body["pagination"]["offset"], 0);

    let id = second["id"].as_i64().unwrap();
    let (status, body) = app
        .send(Method::GET, &format!("/pages/{id}"), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["url"], "https://example.com/two");

    let (status, body) = app
        .send(Method::GET, &format!("/pages/{id}/links"), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 0);
    assert_eq!(body["pagination"]["total"], 0);

    let (status, body) = app
        .send(Method::GET, &format!("/pages/{id}/scrape-status"), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["jobId"], format!("page-{id}"));
    assert_eq!(body["state"], "waiting");
    assert_eq!(body["data"]["url"], "https://example.com/two");

    let (status, body) = app
        .send(Method::DELETE, &format!("/pages/{id}"), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);
    assert!(!app.services.queue.has_live_job(id).await.unwrap());

    let (status, body) = app
        .send(Method::GET, &format!("/pages/{id}"), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Page not found");

    let (status, _) = app
        .send(Method::DELETE, &format!("/pages/{id}"), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app.send(Method::GET, "/pages/abc", Some(&token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid page ID");
}

#[tokio::test]
async fn pages_are_private_to_their_owner() {
    let app = app().await;
    let (owner, _) = app.register("owner@example.com").await;
    let (intruder, _) = app.register("intruder@example.com").await;

    let page = app.submit(&owner, "https://example.com/private").await;
    let id = page["id"].as_i64().unwrap();

    for uri in [
        format!("/pages/{id}"),
        format!("/pages/{id}/links"),
        format!("/pages/{id}/scrape-status"),
    ] {
        let (status, body) = app.send(Method::GET, &uri, Some(&intruder), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(body["message"], "Page not found");
    }

    let (status, _) = app
        .send(Method::DELETE, &format!("/pages/{id}"), Some(&intruder), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = app.send(Method::GET, "/pages", Some(&intruder), None).await;
    assert_eq!(body["pagination"]["total"], 0);
}

#[tokio::test]
async fn scrape_status_of_a_removed_job_is_not_found() {
    let app = app().await;
    let (token, _) = app.register("status@example.com").await;
    let page = app.submit(&token, "https://example.com").await;
    let id = page["id"].as_i64().unwrap();

    let job_id = format!("page-{id}");
    assert!(app.services.queue.remove(&job_id).await.unwrap());

    let (status, body) = app
        .send(Method::GET, &format!("/pages/{id}/scrape-status"), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Job not found");
}

#[tokio::test]
async fn same_url_submitted_twice_creates_two_pages_and_jobs() {
    let app = app().await;
    let (token, _) = app.register("twice@example.com").await;

    let first = app.submit(&token, "https://example.com").await;
    let second = app.submit(&token, "https://example.com").await;
    let (first_id, second_id) = (first["id"].as_i64().unwrap(), second["id"].as_i64().unwrap());
    assert_ne!(first_id, second_id);

    for id in [first_id, second_id] {
        let job = app
            .services
            .queue
            .get_job_status(&format!("page-{id}"))
            .await
            .unwrap()
            .expect("each page has its own job");
        assert_eq!(job.data.page_id, id);
        assert_eq!(job.data.url, "https://example.com");
    }
    assert_eq!(app.services.queue.counts().await.unwrap().pending, 2);

    let (status, body) = app.send(Method::GET, "/pages", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["total"], 2);
}
