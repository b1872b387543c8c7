//! Domain layer: page lifecycle and queue value objects.

pub mod page;
pub mod value_objects;

pub use page::{PageStatus, failure_title, stale_window};
pub use value_objects::{BackoffPolicy, JobKey};
