//! Page lifecycle.

pub mod state;

pub use state::{PageStatus, stale_window};

use url::Url;

/// Placeholder title shown until the page reaches a terminal state.
pub const PROCESSING_TITLE: &str = "Processing...";

/// Title stored when a fetched document has no usable `<title>`.
pub const NO_TITLE: &str = "No title found";

/// Title used when a failed page's URL has no usable host.
pub const GENERIC_FAILURE_TITLE: &str = "Scrape failed";

/// Diagnostic title written when a page's scrape fails for good.
///
/// Uses the host of `url` when it parses, otherwise a generic title.
pub fn failure_title(url: &str) -> String {
    match Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_owned)) {
        Some(host) if !host.is_empty() => format!("{} (Failed)", host),
        _ => GENERIC_FAILURE_TITLE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_title_uses_host() {
        assert_eq!(
            failure_title("https://unreachable.invalid/some/path?q=1"),
            "unreachable.invalid (Failed)"
        );
        assert_eq!(failure_title("http://127.0.0.1:9/"), "127.0.0.1 (Failed)");
    }

    #[test]
    fn test_failure_title_falls_back_for_unparseable_url() {
        assert_eq!(failure_title("not a url"), GENERIC_FAILURE_TITLE);
        assert_eq!(failure_title("mailto:someone@example.com"), GENERIC_FAILURE_TITLE);
    }
}
