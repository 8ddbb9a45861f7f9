//! Error types for dsw-pipeline
//!
//! `AdapterError` covers every external collaborator: analyzer, signal
//! source, confirmation feeds and channel senders.

use std::time::Duration;
use thiserror::Error;

/// External adapter failure
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// Call exceeded its deadline
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Service throttled the request (HTTP 429 or equivalent)
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Service not configured or not reachable
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Network communication error
    #[error("Network error: {0}")]
    Network(String),

    /// Non-success response from the service
    #[error("API error {0}: {1}")]
    Api(u16, String),

    /// Failed to parse response
    #[error("Parse error: {0}")]
    Parse(String),
}

impl AdapterError {
    /// Only throttling is worth retrying at this layer
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AdapterError::RateLimited(_))
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AdapterError::Network(format!("request timed out: {}", err))
        } else if err.is_decode() {
            AdapterError::Parse(err.to_string())
        } else {
            AdapterError::Network(err.to_string())
        }
    }
}

/// Run `fut` under `limit`, mapping elapsed deadlines to [`AdapterError::Timeout`]
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, AdapterError>
where
    F: std::future::Future<Output = Result<T, AdapterError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(AdapterError::Timeout(limit)),
    }
}
