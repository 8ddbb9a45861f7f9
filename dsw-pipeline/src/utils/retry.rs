//! Retry for throttled analyzer calls
//!
//! Only `AdapterError::RateLimited` is retried. Every other failure goes
//! straight back to the caller, which degrades instead of retrying.

use std::future::Future;
use std::time::Duration;

use crate::error::AdapterError;

/// Backoff before each retry; its length is the retry budget
pub const RATE_LIMIT_BACKOFF: [Duration; 3] = [
    Duration::from_millis(500),
    Duration::from_millis(1000),
    Duration::from_millis(2000),
];

/// Run `operation`, retrying on rate limiting with [`RATE_LIMIT_BACKOFF`]
pub async fn retry_rate_limited<F, Fut, T>(
    operation_name: &str,
    backoff: &[Duration],
    mut operation: F,
) -> Result<T, AdapterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AdapterError>>,
{
    let mut delays = backoff.iter();
    loop {
        match operation().await {
            Err(err) if err.is_rate_limited() => match delays.next() {
                Some(delay) => {
                    tracing::warn!(
                        operation = operation_name,
                        delay_ms = delay.as_millis() as u64,
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(*delay).await;
                }
                None => return Err(err),
            },
            other => return other,
        }
    }
}
