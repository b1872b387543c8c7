//! Single-flight access token refresh.
//!
//! However many requests hit a 401 at the same time, at most one refresh call
//! is in flight. The first caller runs it; later callers either wait for its
//! result or give up immediately, depending on [`RefreshPolicy`].

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Notify, OnceCell};
use tracing::debug;

/// What a caller does when a refresh is already running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPolicy {
    /// Wait for the running refresh and use its result.
    #[default]
    Share,
    /// Return without refreshing.
    FailFast,
}

/// Result of a refresh: the new access token, or the reason it failed.
pub type RefreshResult = std::result::Result<String, String>;

/// Outcome seen by a caller of [`RefreshCoordinator::refresh`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed(String),
    Failed(String),
    /// Another refresh was running and the policy is [`RefreshPolicy::FailFast`].
    Busy,
}

struct InFlightRefresh {
    result: OnceCell<RefreshResult>,
    notify: Notify,
}

impl InFlightRefresh {
    fn new() -> Self {
        Self {
            result: OnceCell::new(),
            notify: Notify::new(),
        }
    }

    fn set_result(&self, result: RefreshResult) {
        let _ = self.result.set(result);
        self.notify.notify_waiters();
    }

    async fn wait(&self) -> RefreshResult {
        loop {
            if let Some(result) = self.result.get() {
                return result.clone();
            }

            let notified = self.notify.notified();
            if let Some(result) = self.result.get() {
                return result.clone();
            }

            notified.await;
        }
    }
}

/// Releases the in-flight slot even when the leading caller is dropped
/// mid-refresh, so waiters never hang.
struct LeaderGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    flight: Arc<InFlightRefresh>,
}

impl LeaderGuard<'_> {
    fn complete(self, result: RefreshResult) {
        self.flight.set_result(result);
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if self.flight.result.get().is_none() {
            self.flight
                .set_result(Err("Token refresh was cancelled".to_string()));
        }
        let mut slot = self.coordinator.in_flight.lock();
        if slot
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &self.flight))
        {
            *slot = None;
        }
    }
}

/// Coordinates token refreshes across concurrent requests.
#[derive(Default)]
pub struct RefreshCoordinator {
    in_flight: Mutex<Option<Arc<InFlightRefresh>>>,
    /// Refresh calls actually started.
    started: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `refresh`, or join the one already in flight.
    pub async fn refresh<F, Fut>(&self, policy: RefreshPolicy, refresh: F) -> RefreshOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RefreshResult>,
    {
        let (flight, leader) = {
            let mut slot = self.in_flight.lock();
            match slot.as_ref() {
                Some(existing) => (existing.clone(), false),
                None => {
                    let flight = Arc::new(InFlightRefresh::new());
                    *slot = Some(flight.clone());
                    (flight, true)
                }
            }
        };

        if !leader {
            if policy == RefreshPolicy::FailFast {
                debug!("Token refresh already in flight; not waiting");
                return RefreshOutcome::Busy;
            }
            debug!("Joining in-flight token refresh");
            return outcome(flight.wait().await);
        }

        self.started.fetch_add(1, Ordering::SeqCst);
        let guard = LeaderGuard {
            coordinator: self,
            flight,
        };
        let result = refresh().await;
        guard.complete(result.clone());
        outcome(result)
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    /// Number of refresh calls started so far.
    pub fn refresh_count(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }
}

fn outcome(result: RefreshResult) -> RefreshOutcome {
    match result {
        Ok(token) => RefreshOutcome::Refreshed(token),
        Err(reason) => RefreshOutcome::Failed(reason),
    }
}
