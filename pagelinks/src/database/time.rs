//! Timestamp helpers for the database layer.
//!
//! Timestamps are stored as `INTEGER` Unix epoch milliseconds (UTC).

use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

/// Current time as Unix epoch milliseconds (UTC).
#[inline]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// `now_ms()` shifted forward by `delay`, saturating on overflow.
#[inline]
pub fn ms_after(delay: Duration) -> i64 {
    let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
    now_ms().saturating_add(delay_ms)
}

/// Convert Unix epoch milliseconds to `DateTime<Utc>`.
///
/// Values outside chrono's range fall back to the epoch.
#[inline]
pub fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    match Utc.timestamp_millis_opt(ms) {
        chrono::LocalResult::Single(dt) => dt,
        chrono::LocalResult::Ambiguous(dt, _) => dt,
        chrono::LocalResult::None => DateTime::<Utc>::UNIX_EPOCH,
    }
}
