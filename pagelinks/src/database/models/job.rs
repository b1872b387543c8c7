//! Scrape job database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::{BackoffPolicy, JobKey};

/// Scrape job database model.
/// One row per page key; the row outlives the attempt that created it.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ScrapeJobDbModel {
    /// `page-{page_id}`
    pub id: String,
    pub page_id: i64,
    pub owner_id: i64,
    pub target_url: String,
    /// Status: PENDING, PROCESSING, COMPLETED, FAILED
    pub status: String,
    pub attempts_made: i64,
    pub max_attempts: i64,
    /// JSON blob of the [`BackoffPolicy`] the job was enqueued with
    pub backoff: String,
    /// 0..=100
    pub progress: i64,
    pub last_error: Option<String>,
    /// JSON blob of the [`ScrapeJobResult`]
    pub result: Option<String>,
    pub enqueued_at: i64,
    /// The job is not claimable before this instant (backoff)
    pub available_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub updated_at: i64,
}

impl ScrapeJobDbModel {
    pub fn new(
        page_id: i64,
        owner_id: i64,
        target_url: impl Into<String>,
        backoff: &BackoffPolicy,
    ) -> crate::Result<Self> {
        let now = crate::database::time::now_ms();
        Ok(Self {
            id: JobKey::for_page(page_id).to_string(),
            page_id,
            owner_id,
            target_url: target_url.into(),
            status: JobStatus::Pending.as_str().to_string(),
            attempts_made: 0,
            max_attempts: i64::from(backoff.max_attempts),
            backoff: serde_json::to_string(backoff)?,
            progress: 0,
            last_error: None,
            result: None,
            enqueued_at: now,
            available_at: now,
            started_at: None,
            finished_at: None,
            updated_at: now,
        })
    }

    pub fn status(&self) -> Option<JobStatus> {
        JobStatus::parse(&self.status)
    }

    /// The backoff policy stored with the job, or the default one when the
    /// stored JSON is unreadable.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        match serde_json::from_str::<BackoffPolicy>(&self.backoff) {
            Ok(policy) => policy,
            Err(e) => {
                tracing::warn!(job_id = %self.id, error = %e, "Invalid backoff JSON; using defaults");
                BackoffPolicy {
                    max_attempts: self.max_attempts.clamp(1, u32::MAX as i64) as u32,
                    ..BackoffPolicy::default()
                }
            }
        }
    }

    pub fn parsed_result(&self) -> Option<ScrapeJobResult> {
        self.result
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

/// Job status values.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Waiting for a worker (possibly until `available_at`).
    Pending,
    /// Claimed by a worker.
    Processing,
    /// Finished successfully (kept only when completed jobs are retained).
    Completed,
    /// Failed after exhausting its attempts.
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "PROCESSING" => Some(Self::Processing),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Live jobs block a new enqueue for the same key.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Result recorded for a completed scrape job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeJobResult {
    pub success: bool,
    pub page_id: i64,
    pub links_count: usize,
}

/// Job counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_new() {
        let job = ScrapeJobDbModel::new(5, 1, "https://example.com", &BackoffPolicy::default())
            .unwrap();
        assert_eq!(job.id, "page-5");
        assert_eq!(job.status, "PENDING");
        assert_eq!(job.max_attempts, 3);
        assert_eq!(job.attempts_made, 0);
        assert_eq!(job.backoff_policy(), BackoffPolicy::default());
    }

    #[test]
    fn test_job_status_classes() {
        assert!(JobStatus::Pending.is_live());
        assert!(JobStatus::Processing.is_live());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Failed.is_live());
        assert_eq!(JobStatus::Processing.to_string(), "PROCESSING");
    }

    #[test]
    fn test_corrupt_backoff_falls_back() {
        let mut job =
            ScrapeJobDbModel::new(5, 1, "https://example.com", &BackoffPolicy::with_max_attempts(4))
                .unwrap();
        job.backoff = "{not json".to_string();
        assert_eq!(job.backoff_policy().max_attempts, 4);
    }
}
