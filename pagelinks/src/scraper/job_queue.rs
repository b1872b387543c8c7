//! Durable scrape job queue.
//!
//! Jobs live in the `scrape_jobs` table and survive restarts. The queue
//! guarantees at most one live (pending or processing) job per page key:
//! enqueueing a key that already has a live job returns that job unchanged.

use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::Result;
use crate::database::models::{JobCounts, JobStatus, ScrapeJobDbModel, ScrapeJobResult};
use crate::database::repositories::JobRepository;
use crate::database::time::{ms_after, now_ms};
use crate::domain::{BackoffPolicy, JobKey};

/// Configuration for the job queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobQueueConfig {
    /// Retry policy stamped on every newly enqueued job.
    pub backoff: BackoffPolicy,
    /// Delete jobs once they complete successfully.
    pub remove_on_complete: bool,
    /// Delete jobs once they fail for good.
    pub remove_on_fail: bool,
    /// Poll interval in milliseconds for workers waiting on an empty queue.
    pub poll_interval_ms: u64,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            remove_on_complete: true,
            remove_on_fail: false,
            poll_interval_ms: 250,
        }
    }
}

/// A claimed or queued scrape job.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeJob {
    pub key: JobKey,
    pub page_id: i64,
    pub owner_id: i64,
    pub url: String,
    /// Attempts started so far, including the one in progress when claimed.
    pub attempts_made: u32,
    pub backoff: BackoffPolicy,
}

impl ScrapeJob {
    pub fn id(&self) -> &str {
        self.key.as_str()
    }

    /// Whether a failure of the current attempt exhausts the job.
    pub fn is_final_attempt(&self) -> bool {
        !self.backoff.should_retry(self.attempts_made)
    }
}

impl From<&ScrapeJobDbModel> for ScrapeJob {
    fn from(model: &ScrapeJobDbModel) -> Self {
        Self {
            key: JobKey::for_page(model.page_id),
            page_id: model.page_id,
            owner_id: model.owner_id,
            url: model.target_url.clone(),
            attempts_made: model.attempts_made.clamp(0, u32::MAX as i64) as u32,
            backoff: model.backoff_policy(),
        }
    }
}

/// Result of [`JobQueue::enqueue`].
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    /// A new job was queued.
    Created(ScrapeJob),
    /// A live job with the same key already existed and was left untouched.
    AlreadyQueued(ScrapeJob),
}

impl EnqueueOutcome {
    pub fn job(&self) -> &ScrapeJob {
        match self {
            Self::Created(job) | Self::AlreadyQueued(job) => job,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Result of [`JobQueue::fail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// The job goes back to the queue and becomes claimable after `delay`.
    Retrying { attempt: u32, delay: Duration },
    /// No attempts left; the job is terminally failed.
    Exhausted,
    /// The job was no longer held by this worker; nothing was recorded.
    NotActive,
}

/// Externally visible job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobState {
    /// Pending and due.
    Waiting,
    /// Pending, waiting out a retry backoff.
    Delayed,
    /// Claimed by a worker.
    Active,
    Completed,
    Failed,
}

impl JobState {
    fn of(model: &ScrapeJobDbModel, now: i64) -> Self {
        match model.status() {
            Some(JobStatus::Pending) if model.available_at > now => Self::Delayed,
            Some(JobStatus::Pending) => Self::Waiting,
            Some(JobStatus::Processing) => Self::Active,
            Some(JobStatus::Completed) => Self::Completed,
            Some(JobStatus::Failed) | None => Self::Failed,
        }
    }
}

/// Payload a job was enqueued with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobData {
    pub page_id: i64,
    pub user_id: i64,
    pub url: String,
}

/// Status snapshot of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub job_id: String,
    pub state: JobState,
    pub progress: u8,
    pub data: JobData,
    pub result: Option<ScrapeJobResult>,
    pub attempts_made: u32,
    pub failed_reason: Option<String>,
}

impl JobStatusView {
    fn from_model(model: &ScrapeJobDbModel, now: i64) -> Self {
        Self {
            job_id: model.id.clone(),
            state: JobState::of(model, now),
            progress: model.progress.clamp(0, 100) as u8,
            data: JobData {
                page_id: model.page_id,
                user_id: model.owner_id,
                url: model.target_url.clone(),
            },
            result: model.parsed_result(),
            attempts_made: model.attempts_made.max(0) as u32,
            failed_reason: model.last_error.clone(),
        }
    }
}

/// Durable FIFO of scrape jobs with per-key exclusivity.
pub struct JobQueue {
    config: JobQueueConfig,
    repository: Arc<dyn JobRepository>,
    /// Wakes idle workers when a job is enqueued.
    notify: Arc<Notify>,
    /// Jobs a worker in this process still holds. Cleared on every settle
    /// path, including failed writes, so a claim missing from here is orphaned.
    held: DashSet<String>,
}

impl JobQueue {
    pub fn new(repository: Arc<dyn JobRepository>) -> Self {
        Self::with_config(JobQueueConfig::default(), repository)
    }

    pub fn with_config(config: JobQueueConfig, repository: Arc<dyn JobRepository>) -> Self {
        Self {
            config,
            repository,
            notify: Arc::new(Notify::new()),
            held: DashSet::new(),
        }
    }

    pub fn config(&self) -> &JobQueueConfig {
        &self.config
    }

    /// Get the notifier used to wake workers.
    pub fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Poll interval for workers waiting on an empty queue.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms)
    }

    /// Number of claimed jobs a worker in this process still holds.
    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    /// Enqueue a scrape job for `page_id`.
    pub async fn enqueue(&self, page_id: i64, owner_id: i64, url: &str) -> Result<EnqueueOutcome> {
        let model = ScrapeJobDbModel::new(page_id, owner_id, url, &self.config.backoff)?;

        // The live job may finish and be removed between the two statements,
        // in which case the insert is simply tried again.
        for _ in 0..3 {
            if self.repository.insert_or_revive(&model).await? {
                info!(job_id = %model.id, page_id, "Enqueued scrape job");
                self.notify.notify_one();
                return Ok(EnqueueOutcome::Created(ScrapeJob::from(&model)));
            }

            if let Some(existing) = self.repository.get_job(&model.id).await? {
                debug!(job_id = %existing.id, status = %existing.status, "Scrape job already queued");
                return Ok(EnqueueOutcome::AlreadyQueued(ScrapeJob::from(&existing)));
            }
        }

        Err(crate::Error::conflict(format!(
            "Job {} changed state while enqueueing",
            model.id
        )))
    }

    /// Claim the oldest due job, if any.
    pub async fn dequeue(&self) -> Result<Option<ScrapeJob>> {
        let Some(model) = self.repository.claim_next(now_ms()).await? else {
            return Ok(None);
        };

        let job = ScrapeJob::from(&model);
        self.held.insert(model.id.clone());
        debug!(
            job_id = %job.key,
            attempt = job.attempts_made,
            max_attempts = job.backoff.max_attempts,
            "Claimed scrape job"
        );
        Ok(Some(job))
    }

    /// Record a successful attempt.
    pub async fn ack(&self, job: &ScrapeJob, result: &ScrapeJobResult) -> Result<bool> {
        let applied = match serde_json::to_string(result) {
            Ok(payload) => {
                self.repository
                    .mark_completed(job.id(), &payload, self.config.remove_on_complete)
                    .await
            }
            Err(e) => Err(e.into()),
        };
        self.held.remove(job.id());
        let applied = applied?;

        if applied {
            info!(
                job_id = %job.key,
                links = result.links_count,
                "Scrape job completed"
            );
        } else {
            warn!(job_id = %job.key, "Completed job was no longer active");
        }
        Ok(applied)
    }

    /// Record a failed attempt, scheduling a retry while attempts remain.
    pub async fn fail(&self, job: &ScrapeJob, error: &str) -> Result<FailOutcome> {
        if !job.is_final_attempt() {
            return self.retry(job, error).await;
        }

        let applied = self
            .repository
            .mark_failed(job.id(), error, self.config.remove_on_fail)
            .await;
        self.held.remove(job.id());

        if applied? {
            warn!(
                job_id = %job.key,
                attempts = job.attempts_made,
                error = %error,
                "Scrape job failed, no attempts left"
            );
            Ok(FailOutcome::Exhausted)
        } else {
            warn!(job_id = %job.key, "Failed job was no longer active");
            Ok(FailOutcome::NotActive)
        }
    }

    /// Put a claimed job back with backoff, even when its attempts are spent.
    pub async fn retry(&self, job: &ScrapeJob, error: &str) -> Result<FailOutcome> {
        let delay = job.backoff.delay_after_attempt(job.attempts_made);
        let applied = self
            .repository
            .schedule_retry(job.id(), error, ms_after(delay))
            .await;
        self.held.remove(job.id());

        if applied? {
            warn!(
                job_id = %job.key,
                attempt = job.attempts_made,
                max_attempts = job.backoff.max_attempts,
                retry_in_ms = delay.as_millis() as u64,
                error = %error,
                "Scrape attempt failed, retrying"
            );
            Ok(FailOutcome::Retrying {
                attempt: job.attempts_made,
                delay,
            })
        } else {
            warn!(job_id = %job.key, "Failed job was no longer active");
            Ok(FailOutcome::NotActive)
        }
    }

    /// Drop a claimed job without recording an outcome.
    pub async fn discard(&self, job: &ScrapeJob) -> Result<bool> {
        let removed = self.repository.discard_claimed(job.id()).await;
        self.held.remove(job.id());
        let removed = removed?;
        debug!(job_id = %job.key, removed, "Discarded scrape job");
        Ok(removed)
    }

    /// Set the progress of an active job (0..=100).
    pub async fn update_progress(&self, job: &ScrapeJob, progress: u8) -> Result<bool> {
        self.repository.update_progress(job.id(), progress).await
    }

    /// Status of a job, or `None` when no row exists for `job_id`.
    pub async fn get_job_status(&self, job_id: &str) -> Result<Option<JobStatusView>> {
        let job = self.repository.get_job(job_id).await?;
        Ok(job.map(|model| JobStatusView::from_model(&model, now_ms())))
    }

    /// Remove a job that is not currently active.
    pub async fn remove(&self, job_id: &str) -> Result<bool> {
        let removed = self.repository.delete_job(job_id).await?;
        if removed {
            debug!(job_id, "Removed scrape job");
        }
        Ok(removed)
    }

    /// Whether a pending or processing job exists for `page_id`.
    pub async fn has_live_job(&self, page_id: i64) -> Result<bool> {
        let key = JobKey::for_page(page_id);
        let job = self.repository.get_job(key.as_str()).await?;
        Ok(job
            .and_then(|model| model.status())
            .is_some_and(|status| status.is_live()))
    }

    /// Return jobs interrupted by a crash or shutdown to the queue.
    ///
    /// Must run before any worker starts claiming.
    pub async fn recover(&self) -> Result<u64> {
        let reset = self.repository.reset_processing().await?;
        self.held.clear();
        if reset > 0 {
            info!("Reset {} interrupted scrape jobs to pending", reset);
            self.notify.notify_waiters();
        }
        Ok(reset)
    }

    /// Return to pending the processing jobs claimed before `older_than` ago
    /// that no worker in this process holds, such as jobs whose outcome could
    /// not be written. The lost attempt is not counted.
    pub async fn reclaim_orphaned(&self, older_than: Duration, limit: u32) -> Result<u64> {
        let started_before = now_ms() - older_than.as_millis() as i64;
        let claimed = self
            .repository
            .list_processing(started_before, limit)
            .await?;

        let mut reclaimed = 0;
        for model in claimed {
            if self.held.contains(&model.id) {
                continue;
            }
            let Some(started_at) = model.started_at else {
                continue;
            };
            if self.repository.release_claim(&model.id, started_at).await? {
                warn!(job_id = %model.id, "Reclaimed orphaned scrape job");
                reclaimed += 1;
            }
        }

        if reclaimed > 0 {
            self.notify.notify_waiters();
        }
        Ok(reclaimed)
    }

    pub async fn counts(&self) -> Result<JobCounts> {
        self.repository.count_by_status().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(status: JobStatus, available_at: i64) -> ScrapeJobDbModel {
        let mut model =
            ScrapeJobDbModel::new(7, 1, "https://example.com", &BackoffPolicy::default()).unwrap();
        model.status = status.as_str().to_string();
        model.available_at = available_at;
        model
    }

    #[test]
    fn test_job_state_mapping() {
        let now = 1_000;
        assert_eq!(
            JobState::of(&model(JobStatus::Pending, now), now),
            JobState::Waiting
        );
        assert_eq!(
            JobState::of(&model(JobStatus::Pending, now + 1), now),
            JobState::Delayed
        );
        assert_eq!(
            JobState::of(&model(JobStatus::Processing, now), now),
            JobState::Active
        );
        assert_eq!(
            JobState::of(&model(JobStatus::Completed, now), now),
            JobState::Completed
        );
        assert_eq!(
            JobState::of(&model(JobStatus::Failed, now), now),
            JobState::Failed
        );
    }

    #[test]
    fn test_status_view_serializes_camel_case() {
        let mut m = model(JobStatus::Failed, 0);
        m.attempts_made = 3;
        m.last_error = Some("Scrape timeout: exceeded 12 seconds".to_string());
        let view = JobStatusView::from_model(&m, 0);
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["jobId"], "page-7");
        assert_eq!(json["state"], "failed");
        assert_eq!(json["attemptsMade"], 3);
        assert_eq!(json["data"]["pageId"], 7);
        assert_eq!(
            json["failedReason"],
            "Scrape timeout: exceeded 12 seconds"
        );
    }

    #[test]
    fn test_scrape_job_from_model() {
        let mut m = model(JobStatus::Processing, 0);
        m.attempts_made = 2;
        let job = ScrapeJob::from(&m);
        assert_eq!(job.id(), "page-7");
        assert_eq!(job.attempts_made, 2);
        assert_eq!(job.backoff.max_attempts, 3);
    }
}
