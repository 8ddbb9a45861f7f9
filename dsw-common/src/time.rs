//! Timestamp utilities

use chrono::{DateTime, TimeZone, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

/// Epoch milliseconds used for every range-queried column in storage
pub fn to_epoch_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// Inverse of [`to_epoch_millis`]. Out-of-range values collapse to the epoch.
pub fn from_epoch_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Clamp a score into `[0, 1]`. NaN becomes 0.
pub fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
