//! Monitoring of pages stuck in `processing`.
//!
//! A page can stay in `processing` forever when its enqueue failed after the
//! page row was written, or when a job row was lost. The sweeper logs such
//! pages once they are older than the stale window and, when enabled,
//! re-enqueues the ones without a live job.
//!
//! Every sweep also returns orphaned claims to the queue: jobs still in
//! processing that no worker holds because their outcome could not be written.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::job_queue::JobQueue;
use crate::Result;
use crate::database::repositories::PageRepository;
use crate::database::time::now_ms;

/// Configuration for the stale page sweeper.
#[derive(Debug, Clone)]
pub struct StaleSweeperConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// A processing page older than this is considered stale.
    pub stale_after: Duration,
    /// Re-enqueue stale pages that have no live job.
    pub reenqueue: bool,
    /// A claim this old that no worker holds is returned to the queue.
    pub orphan_after: Duration,
    /// Maximum pages (and claims) examined per sweep.
    pub batch_size: u32,
}

impl Default for StaleSweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            // 3 × (30s max backoff + 12s fetch timeout)
            stale_after: Duration::from_secs(126),
            reenqueue: false,
            orphan_after: Duration::from_secs(30),
            batch_size: 100,
        }
    }
}

/// Counts from a single sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub stale: usize,
    pub reenqueued: usize,
    pub reclaimed: u64,
}

/// Periodic stale page sweeper.
pub struct StaleSweeper {
    config: StaleSweeperConfig,
    queue: Arc<JobQueue>,
    pages: Arc<dyn PageRepository>,
    cancellation_token: CancellationToken,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl StaleSweeper {
    pub fn new(
        config: StaleSweeperConfig,
        queue: Arc<JobQueue>,
        pages: Arc<dyn PageRepository>,
    ) -> Self {
        Self {
            config,
            queue,
            pages,
            cancellation_token: CancellationToken::new(),
            task: parking_lot::Mutex::new(None),
        }
    }

    /// Run one sweep.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        sweep(&self.config, &self.queue, self.pages.as_ref()).await
    }

    /// Start sweeping in the background until [`StaleSweeper::stop`].
    pub fn start(&self) {
        let config = self.config.clone();
        let queue = self.queue.clone();
        let pages = self.pages.clone();
        let cancellation_token = self.cancellation_token.clone();

        info!(
            "Starting stale page sweeper (interval {}s, window {}s, reenqueue {})",
            config.interval.as_secs(),
            config.stale_after.as_secs(),
            config.reenqueue
        );

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so startup recovery runs first.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if let Err(e) = sweep(&config, &queue, pages.as_ref()).await {
                    error!("Stale page sweep failed: {}", e);
                }
            }
            debug!("Stale page sweeper stopped");
        });

        *self.task.lock() = Some(handle);
    }

    pub async fn stop(&self) {
        self.cancellation_token.cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn sweep(
    config: &StaleSweeperConfig,
    queue: &JobQueue,
    pages: &dyn PageRepository,
) -> Result<SweepReport> {
    let reclaimed = queue
        .reclaim_orphaned(config.orphan_after, config.batch_size)
        .await?;

    let cutoff = now_ms() - config.stale_after.as_millis() as i64;
    let stale = pages
        .list_stale_processing(cutoff, config.batch_size)
        .await?;

    let mut report = SweepReport {
        stale: stale.len(),
        reenqueued: 0,
        reclaimed,
    };
    if stale.is_empty() {
        return Ok(report);
    }

    for page in &stale {
        warn!(
            page_id = page.id,
            url = %page.url,
            age_secs = (now_ms() - page.updated_at) / 1000,
            "Page stuck in processing"
        );

        if !config.reenqueue || queue.has_live_job(page.id).await? {
            continue;
        }

        let outcome = queue.enqueue(page.id, page.user_id, &page.url).await?;
        if outcome.is_created() {
            info!(page_id = page.id, "Re-enqueued stale page");
            report.reenqueued += 1;
        }
    }

    Ok(report)
}
