//! Outbound channel senders
//!
//! A sender delivers one message to one address on one channel. Retrying is
//! the sender's own business; the dispatcher attempts each send once.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use super::USER_AGENT;
use crate::error::AdapterError;
use dsw_common::models::Channel;

/// Attributes attached to every dispatched message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageAttributes {
    pub severity: f32,
    pub location: Option<String>,
    pub verified: bool,
}

/// Message handed to channel senders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchMessage {
    pub subject: String,
    pub body: String,
    pub attributes: MessageAttributes,
}

#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn channel(&self) -> Channel;

    async fn send(&self, address: &str, message: &DispatchMessage) -> Result<(), AdapterError>;
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    channel: &'a str,
    to: &'a str,
    #[serde(flatten)]
    message: &'a DispatchMessage,
}

/// Posts messages to an email/SMS gateway webhook
pub struct WebhookChannelSender {
    channel: Channel,
    url: String,
    client: Client,
}

impl WebhookChannelSender {
    pub fn new(channel: Channel, url: impl Into<String>, timeout: Duration) -> Result<Self, AdapterError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| AdapterError::Unavailable(format!("HTTP client: {}", e)))?;
        Ok(Self {
            channel,
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl ChannelSender for WebhookChannelSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, address: &str, message: &DispatchMessage) -> Result<(), AdapterError> {
        let payload = WebhookPayload {
            channel: self.channel.as_str(),
            to: address,
            message,
        };
        let response = self.client.post(&self.url).json(&payload).send().await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(AdapterError::RateLimited(format!("{} gateway throttled", self.channel.as_str())));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::Api(status.as_u16(), body));
        }
        Ok(())
    }
}

/// Dry-run sender: logs instead of delivering
pub struct LogChannelSender {
    channel: Channel,
}

impl LogChannelSender {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl ChannelSender for LogChannelSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, address: &str, message: &DispatchMessage) -> Result<(), AdapterError> {
        info!(
            channel = self.channel.as_str(),
            to = %address,
            subject = %message.subject,
            severity = message.attributes.severity,
            "Dry-run delivery"
        );
        Ok(())
    }
}
