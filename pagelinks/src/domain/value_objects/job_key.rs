//! Job key value object.

use serde::{Deserialize, Serialize};
use std::fmt;

const PAGE_PREFIX: &str = "page-";

/// Deduplication identity of a scrape job.
///
/// Always `"page-" + page_id`, so there is exactly one key per page and
/// at most one live job per page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobKey(String);

impl JobKey {
    pub fn for_page(page_id: i64) -> Self {
        Self(format!("{}{}", PAGE_PREFIX, page_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
