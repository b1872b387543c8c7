//! Scrape worker pool.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::fetcher::{FetchError, FetchedPage, Fetcher};
use super::job_queue::{FailOutcome, JobQueue, ScrapeJob};
use crate::database::models::{NewLink, ScrapeJobResult};
use crate::database::repositories::{PageRepository, TransitionOutcome};
use crate::domain::failure_title;
use crate::domain::page::NO_TITLE;

/// Configuration for the scrape worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Number of workers, each running one job at a time.
    pub concurrency: usize,
    /// Hard limit on a single fetch in seconds.
    pub fetch_timeout_secs: u64,
    /// How long `stop` waits for in-flight jobs before aborting them.
    pub drain_timeout_secs: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            fetch_timeout_secs: 12,
            drain_timeout_secs: 30,
        }
    }
}

impl WorkerPoolConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// Everything a worker needs to run a job.
#[derive(Clone)]
struct WorkerContext {
    queue: Arc<JobQueue>,
    pages: Arc<dyn PageRepository>,
    fetcher: Arc<dyn Fetcher>,
    fetch_timeout: Duration,
    active_jobs: Arc<AtomicUsize>,
}

/// A fixed-size pool of scrape workers pulling from a [`JobQueue`].
pub struct WorkerPool {
    config: WorkerPoolConfig,
    /// Number of jobs currently being processed.
    active_jobs: Arc<AtomicUsize>,
    cancellation_token: CancellationToken,
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::with_config(WorkerPoolConfig::default())
    }

    pub fn with_config(config: WorkerPoolConfig) -> Self {
        Self {
            config,
            active_jobs: Arc::new(AtomicUsize::new(0)),
            cancellation_token: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Some(JoinSet::new())),
        }
    }

    /// Start the workers.
    pub fn start(
        &self,
        queue: Arc<JobQueue>,
        pages: Arc<dyn PageRepository>,
        fetcher: Arc<dyn Fetcher>,
    ) {
        let concurrency = self.config.concurrency.max(1);
        info!(
            "Starting scrape worker pool with {} workers (fetch timeout {}s)",
            concurrency, self.config.fetch_timeout_secs
        );

        let ctx = WorkerContext {
            queue,
            pages,
            fetcher,
            fetch_timeout: self.config.fetch_timeout(),
            active_jobs: self.active_jobs.clone(),
        };

        let mut tasks = self.tasks.lock();
        let Some(join_set) = tasks.as_mut() else {
            warn!("Scrape worker pool already stopped; not starting workers");
            return;
        };

        for worker_id in 0..concurrency {
            let ctx = ctx.clone();
            let cancellation_token = self.cancellation_token.clone();
            join_set.spawn(run_worker(worker_id, ctx, cancellation_token));
        }
    }

    /// Stop claiming jobs and wait for in-flight ones.
    ///
    /// Workers still busy after the drain timeout are aborted; their jobs stay
    /// in processing and are recovered on the next start.
    pub async fn stop(&self) {
        info!("Stopping scrape worker pool");
        self.cancellation_token.cancel();

        let join_set = {
            let mut tasks = self.tasks.lock();
            tasks.take()
        };

        let Some(mut join_set) = join_set else {
            return;
        };

        let drained = tokio::time::timeout(self.config.drain_timeout(), async {
            while join_set.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                "Scrape workers did not drain within {}s; aborting {} in-flight jobs",
                self.config.drain_timeout_secs,
                self.active_count()
            );
            join_set.shutdown().await;
        }

        info!("Scrape worker pool stopped");
    }

    /// Get the number of jobs being processed right now.
    pub fn active_count(&self) -> usize {
        self.active_jobs.load(Ordering::SeqCst)
    }

    /// Check if the pool is running.
    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_worker(worker_id: usize, ctx: WorkerContext, cancellation_token: CancellationToken) {
    debug!("Scrape worker {} started", worker_id);
    let notifier = ctx.queue.notifier();
    let poll_interval = ctx.queue.poll_interval();

    loop {
        if cancellation_token.is_cancelled() {
            break;
        }

        match ctx.queue.dequeue().await {
            Ok(Some(job)) => {
                ctx.active_jobs.fetch_add(1, Ordering::SeqCst);
                process_job(&ctx, &job).await;
                ctx.active_jobs.fetch_sub(1, Ordering::SeqCst);
                continue;
            }
            Ok(None) => {}
            Err(e) => error!("Error dequeuing scrape job: {}", e),
        }

        tokio::select! {
            _ = cancellation_token.cancelled() => break,
            _ = notifier.notified() => {}
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }

    debug!("Scrape worker {} shutting down", worker_id);
}

/// Run one attempt of `job` and record its outcome.
async fn process_job(ctx: &WorkerContext, job: &ScrapeJob) {
    match ctx.pages.find_page(job.page_id).await {
        Ok(Some(page)) if page.status().is_terminal() => {
            debug!(job_id = %job.key, status = %page.status, "Page already terminal; dropping job");
            discard(ctx, job).await;
            return;
        }
        Ok(Some(_)) => {}
        Ok(None) => {
            info!(job_id = %job.key, "Page deleted before scrape; dropping job");
            discard(ctx, job).await;
            return;
        }
        Err(e) => {
            record_failure(ctx, job, &format!("Failed to load page: {}", e)).await;
            return;
        }
    }

    if let Err(e) = ctx.queue.update_progress(job, 10).await {
        warn!(job_id = %job.key, "Failed to update progress: {}", e);
    }

    let fetched = match tokio::time::timeout(ctx.fetch_timeout, ctx.fetcher.fetch(&job.url)).await
    {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout(ctx.fetch_timeout)),
    };

    match fetched {
        Ok(page) => record_success(ctx, job, page).await,
        Err(e) => record_failure(ctx, job, &e.to_string()).await,
    }
}

async fn record_success(ctx: &WorkerContext, job: &ScrapeJob, page: FetchedPage) {
    let title = page
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| NO_TITLE.to_string());
    let links: Vec<NewLink> = page
        .links
        .iter()
        .map(|link| NewLink::new(link.href.as_str(), &link.text))
        .collect();

    if let Err(e) = ctx.queue.update_progress(job, 80).await {
        warn!(job_id = %job.key, "Failed to update progress: {}", e);
    }

    match ctx.pages.complete_page(job.page_id, &title, &links).await {
        Ok(TransitionOutcome::Applied) => {
            let result = ScrapeJobResult {
                success: true,
                page_id: job.page_id,
                links_count: links.len(),
            };
            if let Err(e) = ctx.queue.ack(job, &result).await {
                error!(job_id = %job.key, "Failed to ack scrape job: {}", e);
            }
        }
        Ok(TransitionOutcome::Missing) => {
            info!(job_id = %job.key, "Page deleted during scrape; dropping result");
            discard(ctx, job).await;
        }
        Ok(TransitionOutcome::AlreadyTerminal(status)) => {
            debug!(job_id = %job.key, %status, "Page already terminal; dropping result");
            discard(ctx, job).await;
        }
        Err(e) => {
            record_failure(ctx, job, &format!("Failed to save scrape result: {}", e)).await;
        }
    }
}

async fn record_failure(ctx: &WorkerContext, job: &ScrapeJob, error: &str) {
    // On the last attempt the page is settled first: the job only turns
    // terminal once the page has left `processing`.
    if job.is_final_attempt() {
        match ctx.pages.fail_page(job.page_id, &failure_title(&job.url)).await {
            Ok(TransitionOutcome::Applied) => {
                info!(job_id = %job.key, page_id = job.page_id, "Page marked as failed");
            }
            Ok(other) => {
                debug!(job_id = %job.key, ?other, "Page not marked as failed");
            }
            Err(e) => {
                error!(job_id = %job.key, "Failed to mark page as failed: {}", e);
                let reason = format!("{}; failed to mark page as failed: {}", error, e);
                if let Err(e) = ctx.queue.retry(job, &reason).await {
                    error!(job_id = %job.key, "Failed to reschedule scrape job: {}", e);
                }
                return;
            }
        }
    }

    match ctx.queue.fail(job, error).await {
        Ok(FailOutcome::Exhausted) => {
            debug!(job_id = %job.key, "Scrape job exhausted");
        }
        Ok(_) => {}
        Err(e) => {
            // The claim is released; the sweeper returns it to the queue.
            error!(job_id = %job.key, "Failed to record scrape failure: {}", e);
        }
    }
}

async fn discard(ctx: &WorkerContext, job: &ScrapeJob) {
    if let Err(e) = ctx.queue.discard(job).await {
        warn!(job_id = %job.key, "Failed to discard scrape job: {}", e);
    }
}
