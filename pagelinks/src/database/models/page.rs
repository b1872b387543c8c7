//! Page and link database models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::ms_to_datetime;
use crate::domain::PageStatus;

/// Maximum stored length of a link's text, in characters.
pub const LINK_TEXT_MAX_CHARS: usize = 255;

/// Page database model.
#[derive(Debug, Clone, FromRow)]
pub struct PageDbModel {
    pub id: i64,
    pub user_id: i64,
    pub url: String,
    pub title: String,
    pub link_count: i64,
    /// processing, completed, failed
    pub status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl PageDbModel {
    /// Parsed status. Unknown values are reported as `Processing`, which the
    /// schema's CHECK constraint makes unreachable.
    pub fn status(&self) -> PageStatus {
        PageStatus::parse(&self.status).unwrap_or_default()
    }
}

/// Link database model.
#[derive(Debug, Clone, FromRow)]
pub struct LinkDbModel {
    pub id: i64,
    pub page_id: i64,
    pub href: String,
    pub text: String,
    pub created_at: i64,
}

/// A link to be inserted for a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLink {
    pub href: String,
    pub text: String,
}

impl NewLink {
    /// Build a link, truncating `text` to [`LINK_TEXT_MAX_CHARS`] characters.
    pub fn new(href: impl Into<String>, text: &str) -> Self {
        Self {
            href: href.into(),
            text: truncate_chars(text, LINK_TEXT_MAX_CHARS),
        }
    }
}

/// Truncate to at most `max` characters without splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Page as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageView {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub link_count: i64,
    pub status: PageStatus,
    pub created_at: DateTime<Utc>,
}

impl From<&PageDbModel> for PageView {
    fn from(page: &PageDbModel) -> Self {
        Self {
            id: page.id,
            url: page.url.clone(),
            title: page.title.clone(),
            link_count: page.link_count,
            status: page.status(),
            created_at: ms_to_datetime(page.created_at),
        }
    }
}

/// Link as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkView {
    pub id: i64,
    pub href: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl From<&LinkDbModel> for LinkView {
    fn from(link: &LinkDbModel) -> Self {
        Self {
            id: link.id,
            href: link.href.clone(),
            text: link.text.clone(),
            created_at: ms_to_datetime(link.created_at),
        }
    }
}

/// Pagination for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

impl Pagination {
    pub const DEFAULT_LIMIT: u32 = 20;
    pub const MAX_LIMIT: u32 = 100;

    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit, offset }
    }

    /// Normalize raw query values: a limit outside `1..=100` becomes 20 and a
    /// negative offset becomes 0.
    pub fn from_query(limit: Option<i64>, offset: Option<i64>) -> Self {
        let limit = match limit {
            Some(l) if (1..=Self::MAX_LIMIT as i64).contains(&l) => l as u32,
            _ => Self::DEFAULT_LIMIT,
        };
        let offset = offset
            .filter(|o| *o > 0)
            .map(|o| o.min(u32::MAX as i64) as u32)
            .unwrap_or(0);
        Self { limit, offset }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LIMIT, 0)
    }
}
