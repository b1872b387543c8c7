//! Page service: submission and queries on top of the scrape pipeline.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};
use url::Url;

use super::job_queue::{EnqueueOutcome, JobQueue, JobStatusView};
use crate::database::models::{LinkView, PageView, Pagination};
use crate::database::repositories::PageRepository;
use crate::domain::JobKey;
use crate::domain::page::PROCESSING_TITLE;
use crate::{Error, Result};

/// A page of results plus the pagination it was produced with.
#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub pagination: PaginationInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PaginationInfo {
    pub limit: u32,
    pub offset: u32,
    pub total: u64,
}

pub struct PageService {
    pages: Arc<dyn PageRepository>,
    queue: Arc<JobQueue>,
}

impl PageService {
    pub fn new(pages: Arc<dyn PageRepository>, queue: Arc<JobQueue>) -> Self {
        Self { pages, queue }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Create a page in `processing` and queue its scrape.
    ///
    /// Returns as soon as the page row exists. A failed enqueue is logged and
    /// does not fail the request; the stale sweeper reports such pages.
    pub async fn create_page_with_async_scrape(&self, user_id: i64, url: &str) -> Result<PageView> {
        let url = validate_url(url)?;
        let page = self.pages.create_page(user_id, &url, PROCESSING_TITLE).await?;

        if let Err(e) = self.enqueue_scrape_job(page.id, user_id, &url).await {
            error!(page_id = page.id, "Failed to enqueue scrape job: {}", e);
        }

        Ok(PageView::from(&page))
    }

    /// Queue a scrape for an existing page.
    pub async fn enqueue_scrape_job(
        &self,
        page_id: i64,
        user_id: i64,
        url: &str,
    ) -> Result<EnqueueOutcome> {
        let outcome = self.queue.enqueue(page_id, user_id, url).await?;
        if !outcome.is_created() {
            info!(page_id, "Scrape already queued for page");
        }
        Ok(outcome)
    }

    pub async fn list_pages(&self, user_id: i64, pagination: Pagination) -> Result<Paginated<PageView>> {
        let pages = self.pages.list_pages(user_id, pagination).await?;
        let total = self.pages.count_pages(user_id).await?;
        Ok(Paginated {
            data: pages.iter().map(PageView::from).collect(),
            pagination: PaginationInfo {
                limit: pagination.limit,
                offset: pagination.offset,
                total,
            },
        })
    }

    pub async fn get_page(&self, id: i64, user_id: i64) -> Result<PageView> {
        let page = self
            .pages
            .find_page_for_owner(id, user_id)
            .await?
            .ok_or_else(|| Error::not_found("Page", id.to_string()))?;
        Ok(PageView::from(&page))
    }

    pub async fn list_links(
        &self,
        page_id: i64,
        user_id: i64,
        pagination: Pagination,
    ) -> Result<Paginated<LinkView>> {
        self.get_page(page_id, user_id).await?;

        let links = self.pages.find_links(page_id, pagination).await?;
        let total = self.pages.count_links(page_id).await?;
        Ok(Paginated {
            data: links.iter().map(LinkView::from).collect(),
            pagination: PaginationInfo {
                limit: pagination.limit,
                offset: pagination.offset,
                total,
            },
        })
    }

    /// Delete a page and its links. A queued scrape for it is dropped.
    pub async fn delete_page(&self, id: i64, user_id: i64) -> Result<()> {
        if !self.pages.delete_page(id, user_id).await? {
            return Err(Error::not_found("Page", id.to_string()));
        }

        // An active job notices the missing page and discards itself.
        let key = JobKey::for_page(id);
        if let Err(e) = self.queue.remove(key.as_str()).await {
            error!(page_id = id, "Failed to remove scrape job: {}", e);
        }
        info!(page_id = id, "Deleted page");
        Ok(())
    }

    /// Scrape status of a page owned by `user_id`.
    pub async fn get_scrape_status(&self, page_id: i64, user_id: i64) -> Result<JobStatusView> {
        self.get_page(page_id, user_id).await?;
        self.get_job_status(JobKey::for_page(page_id).as_str())
            .await?
            .ok_or_else(|| Error::not_found("Job", JobKey::for_page(page_id).to_string()))
    }

    pub async fn get_job_status(&self, job_id: &str) -> Result<Option<JobStatusView>> {
        self.queue.get_job_status(job_id).await
    }
}

/// Validate a submitted URL and return it trimmed.
pub fn validate_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("URL is required"));
    }
    match Url::parse(trimmed) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => {
            Ok(trimmed.to_string())
        }
        _ => Err(Error::validation("Invalid URL format")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        assert_eq!(
            validate_url("  https://example.com/a ").unwrap(),
            "https://example.com/a"
        );
        assert!(matches!(validate_url(""), Err(Error::Validation(m)) if m == "URL is required"));
        assert!(
            matches!(validate_url("not a url"), Err(Error::Validation(m)) if m == "Invalid URL format")
        );
        assert!(validate_url("ftp://example.com").is_err());
    }
}
