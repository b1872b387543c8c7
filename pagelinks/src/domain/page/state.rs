//! Page status state machine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::Error;

/// Scrape status of a page.
///
/// `Processing` is the initial state; `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageStatus {
    /// Submitted; a worker has not finished with it yet.
    #[default]
    Processing,
    /// Fetched and links persisted.
    Completed,
    /// Retries exhausted.
    Failed,
}

impl PageStatus {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse from database string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Validate a state transition.
    pub fn can_transition_to(&self, target: PageStatus) -> bool {
        use PageStatus::*;

        matches!((self, target), (Processing, Completed) | (Processing, Failed))
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&self, target: PageStatus) -> Result<PageStatus, Error> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::InvalidStateTransition {
                from: self.as_str().to_string(),
                to: target.as_str().to_string(),
            })
        }
    }
}

impl std::fmt::Display for PageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How long a page may sit in `processing` before it is considered stale.
///
/// Every attempt can take up to `fetch_timeout` and be followed by at most
/// `max_backoff` of waiting, so a page still processing after
/// `max_attempts * (max_backoff + fetch_timeout)` lost its worker.
pub fn stale_window(max_attempts: u32, max_backoff: Duration, fetch_timeout: Duration) -> Duration {
    (max_backoff + fetch_timeout).saturating_mul(max_attempts.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_reaches_terminal_states() {
        assert_eq!(
            PageStatus::Processing
                .transition_to(PageStatus::Completed)
                .unwrap(),
            PageStatus::Completed
        );
        assert_eq!(
            PageStatus::Processing.transition_to(PageStatus::Failed).unwrap(),
            PageStatus::Failed
        );
    }

    #[test]
    fn test_terminal_states_never_change() {
        for from in [PageStatus::Completed, PageStatus::Failed] {
            for to in [
                PageStatus::Processing,
                PageStatus::Completed,
                PageStatus::Failed,
            ] {
                let err = from.transition_to(to).unwrap_err();
                assert!(matches!(err, Error::InvalidStateTransition { .. }));
            }
        }
    }

    #[test]
    fn test_processing_cannot_loop() {
        assert!(!PageStatus::Processing.can_transition_to(PageStatus::Processing));
    }

    #[test]
    fn test_db_representation() {
        for status in [
            PageStatus::Processing,
            PageStatus::Completed,
            PageStatus::Failed,
        ] {
            assert_eq!(PageStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(PageStatus::parse("PROCESSING"), None);
        assert_eq!(
            serde_json::to_string(&PageStatus::Completed).unwrap(),
            "\"completed\""
        );
    }

    #[test]
    fn test_stale_window() {
        let window = stale_window(3, Duration::from_secs(30), Duration::from_secs(12));
        assert_eq!(window, Duration::from_secs(126));
        assert_eq!(
            stale_window(0, Duration::from_secs(1), Duration::from_secs(1)),
            Duration::from_secs(2)
        );
    }
}
