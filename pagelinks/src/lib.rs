//! pagelinks library crate.
//!
//! Users submit URLs; pages are scraped asynchronously by a pool of workers
//! pulling from a durable SQLite-backed queue, and the extracted title and
//! links are served back over an authenticated HTTP API.

pub mod api;
pub mod auth;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod logging;
pub mod scraper;
pub mod services;

pub use error::{Error, Result};
