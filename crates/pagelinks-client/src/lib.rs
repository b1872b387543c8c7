//! Client library for the pagelinks API.
//!
//! [`ApiClient`] keeps the session tokens, attaches the access token to every
//! request and transparently refreshes it on a 401, with a single refresh
//! call in flight at any time.

pub mod client;
pub mod error;
pub mod models;
pub mod refresh;
pub mod session;

pub use client::{ApiClient, ApiClientConfig, AuthErrorHandler, DEFAULT_PROACTIVE_REFRESH};
pub use error::{ClientError, Result};
pub use models::{AuthResponse, Link, Page, PageStatus, Paginated, PaginationInfo, ScrapeStatus, User};
pub use refresh::{RefreshCoordinator, RefreshOutcome, RefreshPolicy};
pub use session::{Session, SessionStore};
