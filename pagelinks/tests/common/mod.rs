//! Shared helpers for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

use pagelinks::auth::TokenConfig;
use pagelinks::config::AppConfig;
use pagelinks::database::DbPools;
use pagelinks::database::repositories::{SqlxUserRepository, UserRepository};
use pagelinks::domain::BackoffPolicy;
use pagelinks::scraper::{FetchError, FetchedLink, FetchedPage, Fetcher};
use pagelinks::services::ServiceContainer;

/// A database file in a temporary directory. Dropping it removes the file.
pub struct TestDb {
    pub pools: DbPools,
    pub url: String,
    _dir: TempDir,
}

pub async fn test_db() -> TestDb {
    let dir = TempDir::new().unwrap();
    let url = format!(
        "sqlite:{}?mode=rwc",
        dir.path()
            .join("pagelinks.db")
            .to_string_lossy()
            .replace('\\', "/")
    );
    let pools = DbPools::connect(&url).await.unwrap();
    TestDb {
        pools,
        url,
        _dir: dir,
    }
}

pub async fn create_user(db: &TestDb, email: &str) -> i64 {
    let users = SqlxUserRepository::new(db.pools.read.clone(), db.pools.write.clone());
    users.create_user(email, "not-a-real-hash").await.unwrap().id
}

/// Backoff short enough to run a full retry cycle inside a test.
pub fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy {
        max_attempts: 3,
        initial_delay_ms: 20,
        max_delay_ms: 80,
        backoff_multiplier: 2.0,
    }
}

/// Configuration tuned for tests: fast backoff, fast polling, short timeouts.
pub fn test_config(db: &TestDb) -> AppConfig {
    let mut config = AppConfig::new(
        db.url.clone(),
        TokenConfig::new(
            "integration-access-secret-0123456789",
            "integration-refresh-secret-0123456789",
        ),
    );
    config.queue.backoff = fast_backoff();
    config.queue.poll_interval_ms = 10;
    config.workers.fetch_timeout_secs = 1;
    config.workers.drain_timeout_secs = 5;
    config
}

pub fn container(db: &TestDb, config: &AppConfig, fetcher: Arc<dyn Fetcher>) -> ServiceContainer {
    ServiceContainer::new(db.pools.clone(), config, fetcher)
}

/// One scripted fetch outcome.
pub enum Scripted {
    Page(FetchedPage),
    Fail(String),
    /// Sleep before answering with an empty page.
    Hang(Duration),
}

/// A fetcher that replays scripted outcomes, repeating the last one.
pub struct ScriptedFetcher {
    script: Mutex<VecDeque<Scripted>>,
    last: Mutex<Option<Scripted>>,
    pub calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new(script: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> Scripted {
        let mut script = self.script.lock();
        let mut last = self.last.lock();
        match script.pop_front() {
            Some(item) => {
                let copy = item.duplicate();
                *last = Some(copy);
                item
            }
            None => last
                .as_ref()
                .map(Scripted::duplicate)
                .unwrap_or(Scripted::Page(FetchedPage::default())),
        }
    }
}

impl Scripted {
    fn duplicate(&self) -> Self {
        match self {
            Scripted::Page(page) => Scripted::Page(page.clone()),
            Scripted::Fail(msg) => Scripted::Fail(msg.clone()),
            Scripted::Hang(d) => Scripted::Hang(*d),
        }
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next() {
            Scripted::Page(page) => Ok(page),
            Scripted::Fail(msg) => Err(FetchError::InvalidUrl(format!("{url}: {msg}"))),
            Scripted::Hang(d) => {
                tokio::time::sleep(d).await;
                Ok(FetchedPage::default())
            }
        }
    }
}

pub fn page_with(title: Option<&str>, links: &[(&str, &str)]) -> FetchedPage {
    FetchedPage {
        title: title.map(str::to_string),
        links: links
            .iter()
            .map(|(href, text)| FetchedLink {
                href: href.to_string(),
                text: text.to_string(),
            })
            .collect(),
    }
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check().await
}
