//! Page fetching.
//!
//! The [`Fetcher`] trait is the seam between the worker pool and the network.
//! [`HttpFetcher`] is the default implementation (reqwest + scraper).

use async_trait::async_trait;
use ::scraper::{Html, Selector};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// A link found on a fetched page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedLink {
    /// Absolute URL.
    pub href: String,
    /// Visible anchor text, whitespace-collapsed. May be empty.
    pub text: String,
}

/// The parts of a page the pipeline keeps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedPage {
    pub title: Option<String>,
    /// Absolute, deduplicated by href, in document order.
    pub links: Vec<FetchedLink>,
}

/// Errors produced while fetching a page.
///
/// Every variant is transient from the queue's point of view: the attempt is
/// retried until the job runs out of attempts.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP {status} for {url}")]
    Http { status: u16, url: String },

    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Scrape timeout: exceeded {} seconds", .0.as_secs())]
    Timeout(Duration),

    #[error("Failed to parse document: {0}")]
    Parse(String),
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Fetches a URL and extracts its title and outbound links.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;
}

/// Default fetcher: plain HTTP GET plus HTML parsing, no JavaScript.
///
/// Carries no timeout of its own; the worker bounds every fetch.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let base = Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;

        let response = self.client.get(base.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        // Relative links resolve against the final URL after redirects.
        let base = response.url().clone();
        let body = response.text().await?;
        let page = parse_document(&base, &body)?;
        debug!(url = %base, links = page.links.len(), "Fetched page");
        Ok(page)
    }
}

/// Extract the title and the absolute http(s) links of an HTML document.
pub fn parse_document(base: &Url, html: &str) -> Result<FetchedPage, FetchError> {
    let title_selector = Selector::parse("title").map_err(|e| FetchError::Parse(e.to_string()))?;
    let link_selector = Selector::parse("a[href]").map_err(|e| FetchError::Parse(e.to_string()))?;

    let document = Html::parse_document(html);

    let title = document
        .select(&title_selector)
        .next()
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for el in document.select(&link_selector) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let Ok(resolved) = base.join(href.trim()) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }
        let href = resolved.to_string();
        if !seen.insert(href.clone()) {
            continue;
        }
        links.push(FetchedLink {
            href,
            text: collapse_whitespace(&el.text().collect::<String>()),
        });
    }

    Ok(FetchedPage { title, links })
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/docs/index.html").unwrap()
    }

    #[test]
    fn test_parse_title_and_links() {
        let html = r#"
            <html><head><title>  Example
                Domain </title></head>
            <body>
                <a href="/about">About   us</a>
                <a href="guide.html">Guide</a>
                <a href="https://other.org/x">Other</a>
            </body></html>
        "#;
        let page = parse_document(&base(), html).unwrap();
        assert_eq!(page.title.as_deref(), Some("Example Domain"));
        let hrefs: Vec<_> = page.links.iter().map(|l| l.href.as_str()).collect();
        assert_eq!(
            hrefs,
            vec![
                "https://example.com/about",
                "https://example.com/docs/guide.html",
                "https://other.org/x",
            ]
        );
        assert_eq!(page.links[0].text, "About us");
    }

    #[test]
    fn test_links_deduplicated_by_href() {
        let html = r#"<a href="/a">first</a><a href="https://example.com/a">second</a>"#;
        let page = parse_document(&base(), html).unwrap();
        assert_eq!(page.links.len(), 1);
        assert_eq!(page.links[0].text, "first");
    }

    #[test]
    fn test_non_http_links_dropped() {
        let html = r#"
            <a href="mailto:someone@example.com">mail</a>
            <a href="javascript:void(0)">js</a>
            <a href="tel:123">tel</a>
            <a href="http://example.net/">ok</a>
        "#;
        let page = parse_document(&base(), html).unwrap();
        assert_eq!(page.links.len(), 1);
        assert_eq!(page.links[0].href, "http://example.net/");
    }

    #[test]
    fn test_missing_title_and_no_links() {
        let page = parse_document(&base(), "<html><body><p>hi</p></body></html>").unwrap();
        assert_eq!(page.title, None);
        assert!(page.links.is_empty());
    }

    #[test]
    fn test_timeout_message() {
        let err = FetchError::Timeout(Duration::from_secs(12));
        assert_eq!(err.to_string(), "Scrape timeout: exceeded 12 seconds");
        assert!(err.is_timeout());
    }
}
