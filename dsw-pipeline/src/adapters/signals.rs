//! Weather / seismic signal provider

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::DefaultDirectRateLimiter;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{per_second_limiter, USER_AGENT};
use crate::error::AdapterError;

/// Weather warning issued for an area
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherWarning {
    pub headline: String,
    /// Area the warning covers; `None` means the queried location
    #[serde(default)]
    pub area: Option<String>,
    pub starts_at: DateTime<Utc>,
    /// Open-ended when absent
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
}

impl WeatherWarning {
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.starts_at <= at && self.ends_at.map_or(true, |end| at <= end)
    }
}

/// Seismic event reported near the queried location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeismicEvent {
    pub magnitude: f32,
    #[serde(default)]
    pub location: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Signals for one location
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Signals {
    #[serde(default)]
    pub active_warnings: Vec<WeatherWarning>,
    #[serde(default)]
    pub recent_quakes: Vec<SeismicEvent>,
    #[serde(default)]
    pub storm_forecast: Option<String>,
}

#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn get_signals(&self, location: &str) -> Result<Signals, AdapterError>;
}

/// `GET {base}/signals?location=...`
pub struct HttpSignalSource {
    client: Client,
    base_url: String,
    rate_limiter: DefaultDirectRateLimiter,
}

impl HttpSignalSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AdapterError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| AdapterError::Unavailable(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            rate_limiter: per_second_limiter(2),
        })
    }
}

#[async_trait]
impl SignalSource for HttpSignalSource {
    async fn get_signals(&self, location: &str) -> Result<Signals, AdapterError> {
        self.rate_limiter.until_ready().await;

        let response = self
            .client
            .get(format!("{}/signals", self.base_url))
            .query(&[("location", location)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::Api(status.as_u16(), body));
        }

        response
            .json::<Signals>()
            .await
            .map_err(|e| AdapterError::Parse(e.to_string()))
    }
}
