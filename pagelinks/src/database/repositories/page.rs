//! Page and link repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::{LinkDbModel, NewLink, PageDbModel, Pagination};
use crate::database::time::now_ms;
use crate::domain::PageStatus;

/// Outcome of moving a page out of `processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The page moved to the requested terminal state.
    Applied,
    /// The page had already reached a terminal state; nothing was written.
    AlreadyTerminal(PageStatus),
    /// The page no longer exists (deleted while its job ran).
    Missing,
}

/// Page repository trait.
#[async_trait]
pub trait PageRepository: Send + Sync {
    async fn create_page(&self, user_id: i64, url: &str, title: &str) -> Result<PageDbModel>;
    async fn find_page(&self, id: i64) -> Result<Option<PageDbModel>>;
    /// Find a page only if it belongs to `user_id`.
    async fn find_page_for_owner(&self, id: i64, user_id: i64) -> Result<Option<PageDbModel>>;
    async fn list_pages(&self, user_id: i64, pagination: Pagination) -> Result<Vec<PageDbModel>>;
    async fn count_pages(&self, user_id: i64) -> Result<u64>;
    async fn find_links(&self, page_id: i64, pagination: Pagination) -> Result<Vec<LinkDbModel>>;
    async fn count_links(&self, page_id: i64) -> Result<u64>;

    /// Persist scraped links and mark the page completed, atomically.
    async fn complete_page(
        &self,
        page_id: i64,
        title: &str,
        links: &[NewLink],
    ) -> Result<TransitionOutcome>;

    /// Mark the page failed with a diagnostic title.
    async fn fail_page(&self, page_id: i64, title: &str) -> Result<TransitionOutcome>;

    /// Delete a page owned by `user_id`; its links go with it.
    async fn delete_page(&self, id: i64, user_id: i64) -> Result<bool>;

    /// Pages still `processing` whose last update is older than `updated_before_ms`.
    async fn list_stale_processing(
        &self,
        updated_before_ms: i64,
        limit: u32,
    ) -> Result<Vec<PageDbModel>>;
}

/// SQLx implementation of PageRepository.
pub struct SqlxPageRepository {
    pool: SqlitePool,
    write_pool: SqlitePool,
}

impl SqlxPageRepository {
    pub fn new(pool: SqlitePool, write_pool: SqlitePool) -> Self {
        Self { pool, write_pool }
    }
}

#[async_trait]
impl PageRepository for SqlxPageRepository {
    async fn create_page(&self, user_id: i64, url: &str, title: &str) -> Result<PageDbModel> {
        let now = now_ms();
        let page = sqlx::query_as::<_, PageDbModel>(
            r#"
            INSERT INTO pages (user_id, url, title, link_count, status, created_at, updated_at)
            VALUES (?, ?, ?, 0, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(url)
        .bind(title)
        .bind(PageStatus::Processing.as_str())
        .bind(now)
        .bind(now)
        .fetch_one(&self.write_pool)
        .await?;
        Ok(page)
    }

    async fn find_page(&self, id: i64) -> Result<Option<PageDbModel>> {
        let page = sqlx::query_as::<_, PageDbModel>("SELECT * FROM pages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(page)
    }

    async fn find_page_for_owner(&self, id: i64, user_id: i64) -> Result<Option<PageDbModel>> {
        let page =
            sqlx::query_as::<_, PageDbModel>("SELECT * FROM pages WHERE id = ? AND user_id = ?")
                .bind(id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(page)
    }

    async fn list_pages(&self, user_id: i64, pagination: Pagination) -> Result<Vec<PageDbModel>> {
        let pages = sqlx::query_as::<_, PageDbModel>(
            r#"
            SELECT * FROM pages
            WHERE user_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(user_id)
        .bind(i64::from(pagination.limit))
        .bind(i64::from(pagination.offset))
        .fetch_all(&self.pool)
        .await?;
        Ok(pages)
    }

    async fn count_pages(&self, user_id: i64) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pages WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn find_links(&self, page_id: i64, pagination: Pagination) -> Result<Vec<LinkDbModel>> {
        let links = sqlx::query_as::<_, LinkDbModel>(
            r#"
            SELECT * FROM links
            WHERE page_id = ?
            ORDER BY id ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(page_id)
        .bind(i64::from(pagination.limit))
        .bind(i64::from(pagination.offset))
        .fetch_all(&self.pool)
        .await?;
        Ok(links)
    }

    async fn count_links(&self, page_id: i64) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM links WHERE page_id = ?")
            .bind(page_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn complete_page(
        &self,
        page_id: i64,
        title: &str,
        links: &[NewLink],
    ) -> Result<TransitionOutcome> {
        let mut tx = self.write_pool.begin().await?;

        let current: Option<String> = sqlx::query_scalar("SELECT status FROM pages WHERE id = ?")
            .bind(page_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(current) = current.as_deref().and_then(PageStatus::parse) else {
            return Ok(TransitionOutcome::Missing);
        };
        if current.transition_to(PageStatus::Completed).is_err() {
            return Ok(TransitionOutcome::AlreadyTerminal(current));
        }

        let now = now_ms();
        for link in links {
            // UNIQUE(page_id, href) drops duplicates the fetcher let through
            sqlx::query(
                "INSERT OR IGNORE INTO links (page_id, href, text, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(page_id)
            .bind(&link.href)
            .bind(&link.text)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            UPDATE pages SET
                title = ?,
                status = ?,
                link_count = (SELECT COUNT(*) FROM links WHERE page_id = ?),
                updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(title)
        .bind(PageStatus::Completed.as_str())
        .bind(page_id)
        .bind(now)
        .bind(page_id)
        .bind(PageStatus::Processing.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(TransitionOutcome::Applied)
    }

    async fn fail_page(&self, page_id: i64, title: &str) -> Result<TransitionOutcome> {
        let now = now_ms();
        let updated = sqlx::query(
            "UPDATE pages SET title = ?, status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(title)
        .bind(PageStatus::Failed.as_str())
        .bind(now)
        .bind(page_id)
        .bind(PageStatus::Processing.as_str())
        .execute(&self.write_pool)
        .await?;

        if updated.rows_affected() > 0 {
            return Ok(TransitionOutcome::Applied);
        }

        let current: Option<String> = sqlx::query_scalar("SELECT status FROM pages WHERE id = ?")
            .bind(page_id)
            .fetch_optional(&self.write_pool)
            .await?;
        Ok(match current.as_deref().and_then(PageStatus::parse) {
            Some(status) => TransitionOutcome::AlreadyTerminal(status),
            None => TransitionOutcome::Missing,
        })
    }

    async fn delete_page(&self, id: i64, user_id: i64) -> Result<bool> {
        // Links are deleted via CASCADE
        let result = sqlx::query("DELETE FROM pages WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.write_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_stale_processing(
        &self,
        updated_before_ms: i64,
        limit: u32,
    ) -> Result<Vec<PageDbModel>> {
        let pages = sqlx::query_as::<_, PageDbModel>(
            r#"
            SELECT * FROM pages
            WHERE status = ? AND updated_at < ?
            ORDER BY updated_at ASC
            LIMIT ?
            "#,
        )
        .bind(PageStatus::Processing.as_str())
        .bind(updated_before_ms)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(pages)
    }
}
