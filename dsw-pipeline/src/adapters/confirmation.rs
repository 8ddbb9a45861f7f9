//! Independent confirmation feeds (meteorological/civil-defence bulletins)
//!
//! Each configured source is its own [`ConfirmationFeed`]; the matcher polls
//! them independently so one failing source never hides the others.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::USER_AGENT;
use crate::error::AdapterError;

/// Raw item reported by a feed, before keyword filtering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    /// Feed name (filled in by the client, not the service)
    #[serde(default)]
    pub source: String,
    /// Kind of confirmation, e.g. "flood"
    #[serde(default)]
    pub kind: Option<String>,
    pub location: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_feed_confidence")]
    pub confidence: f32,
}

fn default_feed_confidence() -> f32 {
    0.9
}

#[async_trait]
pub trait ConfirmationFeed: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<Vec<FeedItem>, AdapterError>;
}

/// Feed served as a JSON array of [`FeedItem`]
pub struct HttpConfirmationFeed {
    name: String,
    url: String,
    client: Client,
}

impl HttpConfirmationFeed {
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout: Duration) -> Result<Self, AdapterError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| AdapterError::Unavailable(format!("HTTP client: {}", e)))?;
        Ok(Self {
            name: name.into(),
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl ConfirmationFeed for HttpConfirmationFeed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<FeedItem>, AdapterError> {
        let response = self.client.get(&self.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::Api(status.as_u16(), body));
        }

        let mut items: Vec<FeedItem> = response
            .json()
            .await
            .map_err(|e| AdapterError::Parse(e.to_string()))?;
        for item in &mut items {
            item.source = self.name.clone();
        }

        tracing::debug!(feed = %self.name, items = items.len(), "Confirmation feed fetched");
        Ok(items)
    }
}
