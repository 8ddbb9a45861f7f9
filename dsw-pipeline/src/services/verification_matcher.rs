//! Verification matcher
//!
//! Polls the confirmation feeds on its own timer and correlates each
//! confirmation with unverified events at the same location reported in the
//! two hours before it. Events and alerts flip through the repository's
//! conditional updates, so this loop can race the enrichment cycle (or
//! another instance) without double-verifying.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapters::{ConfirmationFeed, FeedItem};
use crate::error::with_timeout;
use crate::repository::Repository;
use crate::rules::RuleTable;
use crate::services::message_format::NotificationPayload;
use crate::services::notification_dispatcher::NotificationDispatcher;
use crate::services::orchestrator::statistics::StatisticsTracker;
use dsw_common::events::{EventBus, PipelineEvent};
use dsw_common::models::{normalize_location, NotificationKind, Verification};
use dsw_common::time::clamp_unit;

/// Longest gap between a report and its confirmation
pub fn match_window() -> chrono::Duration {
    chrono::Duration::hours(2)
}

/// True when `verification_ts` is no earlier than the event and at most two hours later
pub fn within_match_window(event_ts: DateTime<Utc>, verification_ts: DateTime<Utc>) -> bool {
    let gap = verification_ts.signed_duration_since(event_ts);
    gap >= chrono::Duration::zero() && gap <= match_window()
}

/// Stable content hash of a feed item
pub fn fingerprint(item: &FeedItem) -> String {
    let mut hasher = Sha256::new();
    hasher.update(item.source.as_bytes());
    hasher.update(b"|");
    hasher.update(item.location.trim().to_lowercase().as_bytes());
    hasher.update(b"|");
    hasher.update(item.timestamp.timestamp_millis().to_be_bytes());
    hasher.update(b"|");
    hasher.update(item.text.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// What one poll did
#[derive(Debug, Clone, Default)]
pub struct MatchReport {
    pub items_fetched: usize,
    pub feed_failures: usize,
    /// Items that passed the keyword filter
    pub verifications_accepted: usize,
    /// Accepted items not seen before
    pub verifications_new: usize,
    pub events_verified: Vec<Uuid>,
    pub alerts_verified: Vec<Uuid>,
}

pub struct VerificationMatcher {
    repository: Arc<dyn Repository>,
    feeds: Vec<Arc<dyn ConfirmationFeed>>,
    dispatcher: Arc<NotificationDispatcher>,
    rules: Arc<RuleTable>,
    feed_timeout: Duration,
    event_bus: EventBus,
    stats: StatisticsTracker,
}

impl VerificationMatcher {
    pub fn new(
        repository: Arc<dyn Repository>,
        feeds: Vec<Arc<dyn ConfirmationFeed>>,
        dispatcher: Arc<NotificationDispatcher>,
        rules: Arc<RuleTable>,
        event_bus: EventBus,
        stats: StatisticsTracker,
    ) -> Self {
        Self {
            repository,
            feeds,
            dispatcher,
            rules,
            feed_timeout: Duration::from_secs(10),
            event_bus,
            stats,
        }
    }

    pub fn with_feed_timeout(mut self, timeout: Duration) -> Self {
        self.feed_timeout = timeout;
        self
    }

    /// Poll every feed once and process what they return
    pub async fn poll(&self) -> MatchReport {
        let mut report = MatchReport::default();
        let mut items = Vec::new();

        for feed in &self.feeds {
            match with_timeout(self.feed_timeout, feed.fetch()).await {
                Ok(fetched) => items.extend(fetched),
                Err(e) => {
                    warn!(feed = feed.name(), error = %e, "Confirmation feed failed");
                    report.feed_failures += 1;
                }
            }
        }
        report.items_fetched = items.len();

        for item in &items {
            let Some(verification) = self.accept(item) else {
                continue;
            };
            report.verifications_accepted += 1;

            let (is_new, events, alerts) = self.process(&verification).await;
            if is_new {
                report.verifications_new += 1;
            }
            report.events_verified.extend(events);
            report.alerts_verified.extend(alerts);
        }

        self.stats.update(|s| s.last_verification_poll_at = Some(Utc::now()));
        info!(
            items = report.items_fetched,
            accepted = report.verifications_accepted,
            new = report.verifications_new,
            events_verified = report.events_verified.len(),
            alerts_verified = report.alerts_verified.len(),
            "Verification poll complete"
        );
        report
    }

    /// Keyword filter plus conversion to a [`Verification`]
    pub fn accept(&self, item: &FeedItem) -> Option<Verification> {
        if !self.rules.matches_verification(&item.text) {
            debug!(source = %item.source, "Feed item has no verification keywords");
            return None;
        }
        let location = normalize_location(&item.location)?;

        let kind = item
            .kind
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.rules.matched_keywords(&item.text).into_iter().next())
            .unwrap_or_else(|| "general".to_string());

        Some(Verification {
            id: Uuid::new_v4(),
            source: item.source.clone(),
            kind,
            location,
            text: item.text.clone(),
            confidence: clamp_unit(item.confidence),
            timestamp: item.timestamp,
            matched_event_id: None,
            fingerprint: fingerprint(item),
        })
    }

    /// Store a verification and verify every event it matches
    ///
    /// Returns (stored as new, events flipped, alerts flipped).
    pub async fn process(&self, verification: &Verification) -> (bool, Vec<Uuid>, Vec<Uuid>) {
        let is_new = match self.repository.save_verification(verification).await {
            Ok(inserted) => inserted,
            Err(e) => {
                warn!(source = %verification.source, error = %e, "Failed to store verification, matching anyway");
                false
            }
        };
        if is_new {
            self.stats.update(|s| s.verifications_stored += 1);
        }

        let candidates = match self
            .repository
            .unverified_events_at(
                &verification.location,
                verification.timestamp - match_window(),
                verification.timestamp,
            )
            .await
        {
            Ok(events) => events,
            Err(e) => {
                warn!(location = %verification.location, error = %e, "Candidate lookup failed");
                return (is_new, Vec::new(), Vec::new());
            }
        };

        let mut events_verified = Vec::new();
        let mut alerts_verified = Vec::new();

        for mut event in candidates {
            if !within_match_window(event.timestamp, verification.timestamp) {
                continue;
            }

            match self
                .repository
                .mark_event_verified(event.id, &verification.source, verification.timestamp)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    debug!(event_id = %event.id, "Event already verified elsewhere");
                    continue;
                }
                Err(e) => {
                    warn!(event_id = %event.id, error = %e, "Failed to verify event");
                    continue;
                }
            }

            event.verified = true;
            event.verification_source = Some(verification.source.clone());
            event.verification_timestamp = Some(verification.timestamp);

            info!(
                event_id = %event.id,
                verification_id = %verification.id,
                source = %verification.source,
                location = %verification.location,
                "Event verified"
            );
            self.stats.update(|s| s.events_verified += 1);
            self.event_bus.emit_lossy(PipelineEvent::EventVerified {
                event_id: event.id,
                verification_id: verification.id,
                source: verification.source.clone(),
                timestamp: Utc::now(),
            });

            if let Err(e) = self
                .repository
                .set_verification_match(&verification.fingerprint, event.id)
                .await
            {
                debug!(event_id = %event.id, error = %e, "Failed to record verification match");
            }

            match self.repository.mark_alerts_verified_for_event(event.id, Utc::now()).await {
                Ok(flipped) => {
                    if !flipped.is_empty() {
                        self.stats.update(|s| s.alerts_verified += flipped.len() as u64);
                    }
                    alerts_verified.extend(flipped);
                }
                Err(e) => warn!(event_id = %event.id, error = %e, "Failed to verify alerts for event"),
            }

            let event_id = event.id;
            let payload = NotificationPayload::Verification {
                event,
                verification: verification.clone(),
            };
            self.dispatcher.dispatch(NotificationKind::Verification, &payload).await;
            events_verified.push(event_id);
        }

        (is_new, events_verified, alerts_verified)
    }

    /// Poll every `interval` until `cancel` fires; an in-flight poll finishes first
    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        info!(interval_secs = interval.as_secs(), feeds = self.feeds.len(), "Verification matcher started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.poll().await;
                }
            }
        }
        info!("Verification matcher stopped");
    }
}
