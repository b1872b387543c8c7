//! Process configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::api::ApiServerConfig;
use crate::auth::{AuthConfig, TokenConfig};
use crate::domain::{BackoffPolicy, stale_window};
use crate::scraper::{JobQueueConfig, StaleSweeperConfig, WorkerPoolConfig};

/// Default SQLite database URL.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:pagelinks.db?mode=rwc";

/// Read and parse an environment variable, falling back to `default` when it
/// is unset or unparseable.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

/// Complete application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub api: ApiServerConfig,
    pub tokens: TokenConfig,
    pub auth: AuthConfig,
    pub queue: JobQueueConfig,
    pub workers: WorkerPoolConfig,
    pub sweeper: StaleSweeperConfig,
}

impl AppConfig {
    /// Defaults for everything except the database and the token secrets.
    pub fn new(database_url: impl Into<String>, tokens: TokenConfig) -> Self {
        let queue = JobQueueConfig::default();
        let workers = WorkerPoolConfig::default();
        let sweeper = StaleSweeperConfig {
            stale_after: stale_window(
                queue.backoff.max_attempts,
                queue.backoff.max_delay(),
                workers.fetch_timeout(),
            ),
            ..StaleSweeperConfig::default()
        };
        Self {
            database_url: database_url.into(),
            api: ApiServerConfig::default(),
            tokens,
            auth: AuthConfig::default(),
            queue,
            workers,
            sweeper,
        }
    }

    /// Load the configuration from the environment.
    ///
    /// Fails only when a required secret is missing.
    pub fn from_env() -> crate::Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

        let defaults = BackoffPolicy::default();
        let backoff = BackoffPolicy {
            max_attempts: env_or("SCRAPE_MAX_ATTEMPTS", defaults.max_attempts).max(1),
            initial_delay_ms: env_or("SCRAPE_BACKOFF_MS", defaults.initial_delay_ms),
            max_delay_ms: env_or("SCRAPE_MAX_BACKOFF_MS", defaults.max_delay_ms),
            backoff_multiplier: defaults.backoff_multiplier,
        };

        let queue = JobQueueConfig {
            remove_on_complete: env_flag("SCRAPE_REMOVE_ON_COMPLETE", true),
            backoff,
            ..JobQueueConfig::default()
        };

        let workers = WorkerPoolConfig {
            concurrency: env_or("SCRAPE_CONCURRENCY", 2usize).max(1),
            fetch_timeout_secs: env_or("SCRAPE_TIMEOUT_SECS", 12u64).max(1),
            ..WorkerPoolConfig::default()
        };

        let sweeper = StaleSweeperConfig {
            interval: Duration::from_secs(env_or("STALE_SWEEP_INTERVAL_SECS", 60u64).max(1)),
            stale_after: stale_window(
                queue.backoff.max_attempts,
                queue.backoff.max_delay(),
                workers.fetch_timeout(),
            ),
            reenqueue: env_flag("STALE_REENQUEUE", false),
            orphan_after: Duration::from_secs(env_or("ORPHAN_RECLAIM_SECS", 30u64).max(1)),
            ..StaleSweeperConfig::default()
        };

        Ok(Self {
            database_url,
            api: ApiServerConfig::from_env_or_default(),
            tokens: TokenConfig::from_env()?,
            auth: AuthConfig::from_env(),
            queue,
            workers,
            sweeper,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_stale_window() {
        let config = AppConfig::new(DEFAULT_DATABASE_URL, TokenConfig::new("a", "b"));
        // 3 × (30s max backoff + 12s fetch timeout)
        assert_eq!(config.sweeper.stale_after, Duration::from_secs(126));
        assert!(!config.sweeper.reenqueue);
    }

    #[test]
    fn test_env_or_falls_back() {
        assert_eq!(env_or("PAGELINKS_TEST_UNSET_VARIABLE", 42u32), 42);
        assert!(!env_flag("PAGELINKS_TEST_UNSET_FLAG", false));
        assert!(env_flag("PAGELINKS_TEST_UNSET_FLAG", true));
    }
}
