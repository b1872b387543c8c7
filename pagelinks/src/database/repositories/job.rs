//! Scrape job repository.
//!
//! Backs the durable scrape queue. Every state change is a single guarded
//! statement on the write pool, so two workers can never both own a job.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{JobCounts, JobStatus, ScrapeJobDbModel};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;
use crate::{Error, Result};

/// Scrape job repository trait.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new job, or revive a terminal row with the same key.
    ///
    /// Returns `false` when a live (pending or processing) job already holds the key.
    async fn insert_or_revive(&self, job: &ScrapeJobDbModel) -> Result<bool>;
    async fn get_job(&self, id: &str) -> Result<Option<ScrapeJobDbModel>>;

    /// Atomically claim the oldest pending job that is due at `now`.
    async fn claim_next(&self, now: i64) -> Result<Option<ScrapeJobDbModel>>;

    /// Finish a claimed job. With `remove` the row is deleted outright.
    async fn mark_completed(&self, id: &str, result: &str, remove: bool) -> Result<bool>;

    /// Put a claimed job back to pending, claimable from `available_at`.
    async fn schedule_retry(&self, id: &str, error: &str, available_at: i64) -> Result<bool>;

    /// Fail a claimed job for good. With `remove` the row is deleted outright.
    async fn mark_failed(&self, id: &str, error: &str, remove: bool) -> Result<bool>;

    async fn update_progress(&self, id: &str, progress: u8) -> Result<bool>;

    /// Delete a job that is not currently being processed.
    async fn delete_job(&self, id: &str) -> Result<bool>;

    /// Delete a claimed job without recording an outcome.
    async fn discard_claimed(&self, id: &str) -> Result<bool>;

    /// Return every processing job to pending. The interrupted attempt is not counted.
    async fn reset_processing(&self) -> Result<u64>;

    /// Processing jobs claimed before `started_before`, oldest claim first.
    async fn list_processing(&self, started_before: i64, limit: u32)
    -> Result<Vec<ScrapeJobDbModel>>;

    /// Return one claim to pending if it is still the claim started at `started_at`.
    async fn release_claim(&self, id: &str, started_at: i64) -> Result<bool>;

    async fn count_by_status(&self) -> Result<JobCounts>;
}

/// SQLx implementation of JobRepository.
pub struct SqlxJobRepository {
    pool: SqlitePool,
    write_pool: SqlitePool,
}

impl SqlxJobRepository {
    pub fn new(pool: SqlitePool, write_pool: SqlitePool) -> Self {
        Self { pool, write_pool }
    }

    async fn delete_where_status(&self, id: &str, status: JobStatus) -> Result<bool> {
        let result = sqlx::query("DELETE FROM scrape_jobs WHERE id = ? AND status = ?")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.write_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl JobRepository for SqlxJobRepository {
    async fn insert_or_revive(&self, job: &ScrapeJobDbModel) -> Result<bool> {
        let pool = &self.write_pool;
        let result = retry_on_sqlite_busy("insert_or_revive", || async move {
            sqlx::query(
                r#"
                INSERT INTO scrape_jobs (
                    id, page_id, owner_id, target_url, status, attempts_made, max_attempts,
                    backoff, progress, last_error, result, enqueued_at, available_at,
                    started_at, finished_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, 0, ?, ?, 0, NULL, NULL, ?, ?, NULL, NULL, ?)
                ON CONFLICT(id) DO UPDATE SET
                    page_id = excluded.page_id,
                    owner_id = excluded.owner_id,
                    target_url = excluded.target_url,
                    status = excluded.status,
                    attempts_made = 0,
                    max_attempts = excluded.max_attempts,
                    backoff = excluded.backoff,
                    progress = 0,
                    last_error = NULL,
                    result = NULL,
                    enqueued_at = excluded.enqueued_at,
                    available_at = excluded.available_at,
                    started_at = NULL,
                    finished_at = NULL,
                    updated_at = excluded.updated_at
                WHERE scrape_jobs.status IN ('COMPLETED', 'FAILED')
                "#,
            )
            .bind(&job.id)
            .bind(job.page_id)
            .bind(job.owner_id)
            .bind(&job.target_url)
            .bind(JobStatus::Pending.as_str())
            .bind(job.max_attempts)
            .bind(&job.backoff)
            .bind(job.enqueued_at)
            .bind(job.available_at)
            .bind(job.updated_at)
            .execute(pool)
            .await
            .map_err(Error::from)
        })
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_job(&self, id: &str) -> Result<Option<ScrapeJobDbModel>> {
        let job = sqlx::query_as::<_, ScrapeJobDbModel>("SELECT * FROM scrape_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn claim_next(&self, now: i64) -> Result<Option<ScrapeJobDbModel>> {
        let pool = &self.write_pool;
        retry_on_sqlite_busy("claim_next", || async move {
            sqlx::query_as::<_, ScrapeJobDbModel>(
                r#"
                UPDATE scrape_jobs SET
                    status = 'PROCESSING',
                    attempts_made = attempts_made + 1,
                    started_at = ?,
                    updated_at = ?
                WHERE id = (
                    SELECT id FROM scrape_jobs
                    WHERE status = 'PENDING' AND available_at <= ?
                    ORDER BY available_at ASC, enqueued_at ASC, rowid ASC
                    LIMIT 1
                )
                AND status = 'PENDING'
                RETURNING *
                "#,
            )
            .bind(now)
            .bind(now)
            .bind(now)
            .fetch_optional(pool)
            .await
            .map_err(Error::from)
        })
        .await
    }

    async fn mark_completed(&self, id: &str, result: &str, remove: bool) -> Result<bool> {
        if remove {
            return self.delete_where_status(id, JobStatus::Processing).await;
        }
        let now = now_ms();
        let updated = sqlx::query(
            r#"
            UPDATE scrape_jobs SET
                status = 'COMPLETED',
                progress = 100,
                result = ?,
                last_error = NULL,
                finished_at = ?,
                updated_at = ?
            WHERE id = ? AND status = 'PROCESSING'
            "#,
        )
        .bind(result)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.write_pool)
        .await?;
        Ok(updated.rows_affected() > 0)
    }

    async fn schedule_retry(&self, id: &str, error: &str, available_at: i64) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE scrape_jobs SET
                status = 'PENDING',
                last_error = ?,
                available_at = ?,
                started_at = NULL,
                updated_at = ?
            WHERE id = ? AND status = 'PROCESSING'
            "#,
        )
        .bind(error)
        .bind(available_at)
        .bind(now_ms())
        .bind(id)
        .execute(&self.write_pool)
        .await?;
        Ok(updated.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: &str, error: &str, remove: bool) -> Result<bool> {
        if remove {
            return self.delete_where_status(id, JobStatus::Processing).await;
        }
        let now = now_ms();
        let updated = sqlx::query(
            r#"
            UPDATE scrape_jobs SET
                status = 'FAILED',
                last_error = ?,
                finished_at = ?,
                updated_at = ?
            WHERE id = ? AND status = 'PROCESSING'
            "#,
        )
        .bind(error)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.write_pool)
        .await?;
        Ok(updated.rows_affected() > 0)
    }

    async fn update_progress(&self, id: &str, progress: u8) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE scrape_jobs SET progress = ?, updated_at = ? WHERE id = ? AND status = 'PROCESSING'",
        )
        .bind(i64::from(progress.min(100)))
        .bind(now_ms())
        .bind(id)
        .execute(&self.write_pool)
        .await?;
        Ok(updated.rows_affected() > 0)
    }

    async fn delete_job(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM scrape_jobs WHERE id = ? AND status != 'PROCESSING'")
            .bind(id)
            .execute(&self.write_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn discard_claimed(&self, id: &str) -> Result<bool> {
        self.delete_where_status(id, JobStatus::Processing).await
    }

    async fn reset_processing(&self) -> Result<u64> {
        let now = now_ms();
        let result = sqlx::query(
            r#"
            UPDATE scrape_jobs SET
                status = 'PENDING',
                attempts_made = MAX(attempts_made - 1, 0),
                started_at = NULL,
                available_at = ?,
                updated_at = ?
            WHERE status = 'PROCESSING'
            "#,
        )
        .bind(now)
        .bind(now)
        .execute(&self.write_pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_processing(
        &self,
        started_before: i64,
        limit: u32,
    ) -> Result<Vec<ScrapeJobDbModel>> {
        let jobs = sqlx::query_as::<_, ScrapeJobDbModel>(
            r#"
            SELECT * FROM scrape_jobs
            WHERE status = 'PROCESSING' AND started_at < ?
            ORDER BY started_at ASC
            LIMIT ?
            "#,
        )
        .bind(started_before)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    async fn release_claim(&self, id: &str, started_at: i64) -> Result<bool> {
        let now = now_ms();
        let updated = sqlx::query(
            r#"
            UPDATE scrape_jobs SET
                status = 'PENDING',
                attempts_made = MAX(attempts_made - 1, 0),
                started_at = NULL,
                available_at = ?,
                updated_at = ?
            WHERE id = ? AND status = 'PROCESSING' AND started_at = ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(started_at)
        .execute(&self.write_pool)
        .await?;
        Ok(updated.rows_affected() > 0)
    }

    async fn count_by_status(&self) -> Result<JobCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM scrape_jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = JobCounts::default();
        for (status, count) in rows {
            let count = count.max(0) as u64;
            match JobStatus::parse(&status) {
                Some(JobStatus::Pending) => counts.pending = count,
                Some(JobStatus::Processing) => counts.processing = count,
                Some(JobStatus::Completed) => counts.completed = count,
                Some(JobStatus::Failed) => counts.failed = count,
                None => tracing::warn!(status = %status, "Unknown job status in scrape_jobs"),
            }
        }
        Ok(counts)
    }
}
