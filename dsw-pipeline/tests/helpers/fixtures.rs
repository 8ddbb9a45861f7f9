//! Builders for posts, events, subscribers and a wired-up pipeline

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

use dsw_common::events::EventBus;
use dsw_common::models::{
    Channel, ChannelType, Event, Post, Preferences, Sentiment, Subscriber,
};
use dsw_pipeline::adapters::{ChannelSender, ConfirmationFeed, FeedItem};
use dsw_pipeline::rules::RuleTable;
use dsw_pipeline::services::{
    EnrichmentPipeline, NotificationDispatcher, SpikeDetector, StatisticsTracker, VerificationMatcher,
};
use dsw_pipeline::{NotificationLedger, Repository, SqliteRepository};

use super::db_utils::create_test_repository;
use super::fakes::RecordingSender;

pub fn post(text: &str, location: Option<&str>, author: &str) -> Post {
    Post {
        id: Uuid::new_v4(),
        text: text.to_string(),
        author: author.to_string(),
        source: "test".to_string(),
        timestamp: Utc::now(),
        images: Vec::new(),
        location: location.map(str::to_string),
    }
}

/// Persistable event reported at `timestamp`
pub fn event_at(location: &str, timestamp: DateTime<Utc>, severity: f32) -> Event {
    Event {
        id: Uuid::new_v4(),
        post_id: Uuid::new_v4(),
        text: format!("Fire reported in {}", location),
        author: format!("author-{}", Uuid::new_v4()),
        source: "test".to_string(),
        location: Some(location.to_string()),
        severity,
        confidence: 0.5,
        entities: Vec::new(),
        sentiment: Sentiment::Negative,
        key_phrases: vec!["fire".to_string()],
        images: Vec::new(),
        language: "en".to_string(),
        timestamp,
        created_at: timestamp,
        verified: false,
        verification_source: None,
        verification_timestamp: None,
    }
}

pub fn feed_item(location: &str, text: &str, timestamp: DateTime<Utc>) -> FeedItem {
    FeedItem {
        source: String::new(),
        kind: None,
        location: location.to_string(),
        text: text.to_string(),
        timestamp,
        confidence: 0.9,
    }
}

pub fn subscriber(id: &str, channel_type: ChannelType, preferences: Preferences, location: Option<&str>) -> Subscriber {
    Subscriber {
        id: id.to_string(),
        email: Some(format!("{}@example.com", id)),
        phone: Some(format!("+6010{}", id.len())),
        channel_type,
        preferences,
        location: location.map(str::to_string),
    }
}

/// Repository, bus, statistics and recording channels wired together
pub struct Harness {
    pub _temp_dir: TempDir,
    pub store: Arc<SqliteRepository>,
    pub repository: Arc<dyn Repository>,
    pub ledger: Arc<dyn NotificationLedger>,
    pub rules: Arc<RuleTable>,
    pub event_bus: EventBus,
    pub stats: StatisticsTracker,
    pub email: Arc<RecordingSender>,
    pub sms: Arc<RecordingSender>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_senders(RecordingSender::new(Channel::Email), RecordingSender::new(Channel::Sms)).await
    }

    pub async fn with_senders(email: RecordingSender, sms: RecordingSender) -> Self {
        let (temp_dir, store) = create_test_repository().await.unwrap();
        Self {
            _temp_dir: temp_dir,
            repository: store.clone(),
            ledger: store.clone(),
            store,
            rules: RuleTable::default_shared(),
            event_bus: EventBus::new(256),
            stats: StatisticsTracker::new(),
            email: Arc::new(email),
            sms: Arc::new(sms),
        }
    }

    pub fn enrichment(&self) -> EnrichmentPipeline {
        EnrichmentPipeline::new(
            self.repository.clone(),
            self.rules.clone(),
            self.event_bus.clone(),
            self.stats.clone(),
        )
        .with_adapter_timeout(Duration::from_secs(2))
        .with_rate_limit_backoff(vec![Duration::from_millis(1); 3])
    }

    pub fn dispatcher(&self) -> Arc<NotificationDispatcher> {
        self.dispatcher_with_ledger(self.ledger.clone())
    }

    pub fn dispatcher_with_ledger(&self, ledger: Arc<dyn NotificationLedger>) -> Arc<NotificationDispatcher> {
        let senders: Vec<Arc<dyn ChannelSender>> = vec![self.email.clone(), self.sms.clone()];
        Arc::new(NotificationDispatcher::new(
            self.repository.clone(),
            ledger,
            senders,
            Duration::from_secs(2),
            self.event_bus.clone(),
            self.stats.clone(),
        ))
    }

    pub fn spike_detector(&self) -> SpikeDetector {
        SpikeDetector::new(self.repository.clone(), self.event_bus.clone(), self.stats.clone())
    }

    pub fn matcher(&self, feeds: Vec<Arc<dyn ConfirmationFeed>>) -> VerificationMatcher {
        VerificationMatcher::new(
            self.repository.clone(),
            feeds,
            self.dispatcher(),
            self.rules.clone(),
            self.event_bus.clone(),
            self.stats.clone(),
        )
        .with_feed_timeout(Duration::from_secs(2))
    }

    pub async fn add_subscriber(&self, subscriber: &Subscriber) {
        self.repository.save_subscriber(subscriber).await.unwrap();
    }
}
