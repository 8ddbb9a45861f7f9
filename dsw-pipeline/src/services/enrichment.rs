//! Enrichment pipeline: Post → Event
//!
//! Every step that talks to an outside service degrades instead of failing:
//! the analyzer falls back to the keyword classifier, translation falls back
//! to the original text, signals fall back to the unadjusted severity and a
//! failed write is logged. The caller always gets an [`EnrichmentOutcome`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapters::{Analysis, Analyzer, SignalSource};
use crate::error::with_timeout;
use crate::repository::Repository;
use crate::rules::RuleTable;
use crate::services::keyword_classifier::KeywordClassifier;
use crate::services::language::LanguageRouter;
use crate::services::orchestrator::statistics::StatisticsTracker;
use crate::services::severity;
use crate::utils::{retry_rate_limited, RATE_LIMIT_BACKOFF};
use dsw_common::events::{EventBus, PipelineEvent};
use dsw_common::models::{normalize_location, truncate_to_bytes, Event, Post, MAX_TEXT_BYTES};
use dsw_common::time::clamp_unit;

/// An identical (author, text) event inside this window makes a post a duplicate
pub fn dedup_window() -> chrono::Duration {
    chrono::Duration::hours(24)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeType {
    Disaster,
    Filtered,
    Duplicate,
    Rejected,
}

impl OutcomeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeType::Disaster => "disaster",
            OutcomeType::Filtered => "filtered",
            OutcomeType::Duplicate => "duplicate",
            OutcomeType::Rejected => "rejected",
        }
    }
}

/// Result handed back for every post
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentOutcome {
    /// Event id for disasters, post id otherwise
    pub id: Uuid,
    /// 0 or 1
    pub verified: u8,
    pub severity: f32,
    pub location: Option<String>,
    pub event_type: OutcomeType,
    pub message: String,
    #[serde(skip)]
    pub event: Option<Event>,
}

impl EnrichmentOutcome {
    fn without_event(post: &Post, event_type: OutcomeType, message: impl Into<String>) -> Self {
        Self {
            id: post.id,
            verified: 0,
            severity: 0.0,
            location: post.location.clone(),
            event_type,
            message: message.into(),
            event: None,
        }
    }

    fn for_event(event: Event) -> Self {
        Self {
            id: event.id,
            verified: u8::from(event.verified),
            severity: event.severity,
            location: event.location.clone(),
            event_type: OutcomeType::Disaster,
            message: format!("Disaster event recorded at {}", event.location_key()),
            event: Some(event),
        }
    }
}

pub struct EnrichmentPipeline {
    repository: Arc<dyn Repository>,
    analyzer: Option<Arc<dyn Analyzer>>,
    signals: Option<Arc<dyn SignalSource>>,
    rules: Arc<RuleTable>,
    classifier: KeywordClassifier,
    router: LanguageRouter,
    adapter_timeout: Duration,
    rate_limit_backoff: Vec<Duration>,
    event_bus: EventBus,
    stats: StatisticsTracker,
}

impl EnrichmentPipeline {
    pub fn new(
        repository: Arc<dyn Repository>,
        rules: Arc<RuleTable>,
        event_bus: EventBus,
        stats: StatisticsTracker,
    ) -> Self {
        Self {
            repository,
            analyzer: None,
            signals: None,
            classifier: KeywordClassifier::new(rules.clone()),
            router: LanguageRouter::new(rules.clone()),
            rules,
            adapter_timeout: Duration::from_secs(10),
            rate_limit_backoff: RATE_LIMIT_BACKOFF.to_vec(),
            event_bus,
            stats,
        }
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn with_signal_source(mut self, signals: Arc<dyn SignalSource>) -> Self {
        self.signals = Some(signals);
        self
    }

    pub fn with_adapter_timeout(mut self, timeout: Duration) -> Self {
        self.adapter_timeout = timeout;
        self
    }

    pub fn with_rate_limit_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.rate_limit_backoff = backoff;
        self
    }

    /// Turn one post into an event, or explain why not
    pub async fn enrich(&self, post: &Post) -> EnrichmentOutcome {
        self.stats.update(|s| s.posts_processed += 1);
        let now = Utc::now();

        if post.text.trim().is_empty() {
            return self.not_an_event(post, OutcomeType::Rejected, "Post text is empty");
        }
        let text = truncate_to_bytes(&post.text, MAX_TEXT_BYTES);

        if let Err(e) = self.repository.save_post(post).await {
            warn!(post_id = %post.id, error = %e, "Failed to persist post, continuing");
            self.stats.update(|s| s.persistence_failures += 1);
        }

        // Skips the analyzer for known duplicates; the insert settles races
        match self
            .repository
            .has_recent_duplicate(&post.author, text, now - dedup_window())
            .await
        {
            Ok(true) => {
                return self.not_an_event(post, OutcomeType::Duplicate, "Duplicate of a report from the last 24 hours");
            }
            Ok(false) => {}
            Err(e) => warn!(post_id = %post.id, error = %e, "Duplicate check failed, continuing"),
        }

        let routed = self
            .router
            .route(text, self.analyzer.as_deref(), self.adapter_timeout)
            .await;
        if routed.translation_failed {
            self.stats.update(|s| s.translation_failures += 1);
        }

        let analysis = self.analyze(post.id, &routed.text).await;
        if analysis.is_disaster_related != Some(true) {
            debug!(post_id = %post.id, "Post is not disaster-related");
            return self.not_an_event(post, OutcomeType::Filtered, "Not disaster-related");
        }

        let location = self.resolve_location(post, &analysis).await;
        let base = analysis
            .severity
            .unwrap_or_else(|| self.rules.heuristic_severity(&routed.text));
        let severity = self.score(base, location.as_deref(), now).await;

        let event = Event {
            id: Uuid::new_v4(),
            post_id: post.id,
            text: text.to_string(),
            author: post.author.clone(),
            source: post.source.clone(),
            location,
            severity,
            confidence: clamp_unit(analysis.confidence),
            entities: analysis.entities,
            sentiment: analysis.sentiment,
            key_phrases: analysis.key_phrases,
            images: post.images.clone(),
            language: routed.language,
            timestamp: post.timestamp,
            created_at: now,
            verified: false,
            verification_source: None,
            verification_timestamp: None,
        };

        match self.repository.save_event(&event, now - dedup_window()).await {
            Ok(true) => {}
            Ok(false) => {
                return self.not_an_event(post, OutcomeType::Duplicate, "Duplicate of a report from the last 24 hours");
            }
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "Failed to persist event, continuing");
                self.stats.update(|s| s.persistence_failures += 1);
            }
        }

        info!(
            event_id = %event.id,
            post_id = %post.id,
            location = event.location_key(),
            severity = event.severity,
            confidence = event.confidence,
            "Disaster event created"
        );
        self.stats.update(|s| s.events_created += 1);
        self.event_bus.emit_lossy(PipelineEvent::PostEnriched {
            post_id: post.id,
            event_id: event.id,
            severity: event.severity,
            location: event.location.clone(),
            timestamp: now,
        });

        EnrichmentOutcome::for_event(event)
    }

    fn not_an_event(&self, post: &Post, event_type: OutcomeType, message: &str) -> EnrichmentOutcome {
        self.stats.update(|s| match event_type {
            OutcomeType::Filtered => s.posts_filtered += 1,
            OutcomeType::Duplicate => s.duplicates += 1,
            OutcomeType::Rejected => s.posts_rejected += 1,
            OutcomeType::Disaster => {}
        });
        self.event_bus.emit_lossy(PipelineEvent::PostFiltered {
            post_id: post.id,
            reason: event_type.as_str().to_string(),
            timestamp: Utc::now(),
        });
        EnrichmentOutcome::without_event(post, event_type, message)
    }

    /// Analyzer with rate-limit retries, keyword classifier on any failure
    async fn analyze(&self, post_id: Uuid, text: &str) -> Analysis {
        let Some(analyzer) = self.analyzer.as_deref() else {
            self.stats.update(|s| s.analyzer_fallbacks += 1);
            return self.classifier.classify(text);
        };

        let result = retry_rate_limited("analyze", &self.rate_limit_backoff, || {
            with_timeout(self.adapter_timeout, analyzer.analyze(text))
        })
        .await;

        match result {
            Ok(analysis) => self.classifier.complete(text, analysis),
            Err(e) => {
                warn!(
                    post_id = %post_id,
                    analyzer = analyzer.name(),
                    error = %e,
                    "Analyzer failed, using keyword classifier"
                );
                self.stats.update(|s| s.analyzer_fallbacks += 1);
                self.classifier.classify(text)
            }
        }
    }

    /// Text mention, then image location, then the location the source supplied
    async fn resolve_location(&self, post: &Post, analysis: &Analysis) -> Option<String> {
        let from_text = analysis
            .location_guess
            .as_deref()
            .and_then(normalize_location)
            .or_else(|| self.rules.find_location(&post.text));
        if from_text.is_some() {
            return from_text;
        }

        if let Some(analyzer) = self.analyzer.as_deref() {
            for image in &post.images {
                match with_timeout(self.adapter_timeout, analyzer.locate_image(image)).await {
                    Ok(Some(location)) => {
                        if let Some(location) = normalize_location(&location) {
                            return Some(location);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        debug!(post_id = %post.id, image = %image, error = %e, "Image location failed");
                    }
                }
            }
        }

        post.location.as_deref().and_then(normalize_location)
    }

    async fn score(&self, base: f32, location: Option<&str>, now: DateTime<Utc>) -> f32 {
        let (Some(location), Some(signals)) = (location, self.signals.as_deref()) else {
            return clamp_unit(base);
        };

        match with_timeout(self.adapter_timeout, signals.get_signals(location)).await {
            Ok(signals) => severity::score(base, location, &signals, &self.rules, now),
            Err(e) => {
                warn!(location = %location, error = %e, "Signal lookup failed, keeping base severity");
                self.stats.update(|s| s.signal_failures += 1);
                clamp_unit(base)
            }
        }
    }
}
