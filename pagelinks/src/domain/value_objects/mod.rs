//! Value objects.

pub mod backoff_policy;
pub mod job_key;

pub use backoff_policy::BackoffPolicy;
pub use job_key::JobKey;
