//! Asynchronous scrape pipeline.
//!
//! Pages are scraped out-of-band: the API enqueues a job keyed by page id,
//! a fixed pool of workers claims jobs from the durable queue, fetches the
//! page with a hard timeout and moves the page to a terminal state.

pub mod fetcher;
pub mod job_queue;
pub mod service;
pub mod sweeper;
pub mod worker_pool;

pub use fetcher::{FetchError, FetchedLink, FetchedPage, Fetcher, HttpFetcher};
pub use job_queue::{
    EnqueueOutcome, FailOutcome, JobData, JobQueue, JobQueueConfig, JobState, JobStatusView,
    ScrapeJob,
};
pub use service::{PageService, Paginated, PaginationInfo};
pub use sweeper::{StaleSweeper, StaleSweeperConfig, SweepReport};
pub use worker_pool::{WorkerPool, WorkerPoolConfig};
