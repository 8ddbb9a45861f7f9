//! Notification dispatcher
//!
//! At-most-once delivery per (subject, kind) for gated kinds. The ledger
//! claim happens before any send; if the ledger is unavailable the dispatch
//! goes out ungated and is counted as a fail-open.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapters::ChannelSender;
use crate::error::with_timeout;
use crate::repository::{LedgerAvailability, NotificationLedger, Repository};
use crate::services::message_format::{format_message, NotificationPayload};
use crate::services::orchestrator::statistics::StatisticsTracker;
use dsw_common::events::{EventBus, PipelineEvent};
use dsw_common::models::{Alert, Channel, LedgerEntry, NotificationKind, Subscriber};

/// Alerts at or above this severity go out as `emergency_alert`
pub const EMERGENCY_SEVERITY_THRESHOLD: f32 = 0.8;

/// Notification kind for an alert of this severity
pub fn kind_for_alert(alert: &Alert) -> NotificationKind {
    if alert.severity >= EMERGENCY_SEVERITY_THRESHOLD {
        NotificationKind::EmergencyAlert
    } else {
        NotificationKind::DisasterAlert
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Sent,
    /// Ledger already had an entry; nothing was sent
    AlreadySent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    Failed(String),
    /// Subscriber has no address for this channel
    NoAddress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryDetail {
    pub subscriber_id: String,
    pub channel: Channel,
    #[serde(flatten)]
    pub outcome: DeliveryOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub kind: NotificationKind,
    pub subject_id: Option<Uuid>,
    pub status: DispatchStatus,
    pub recipients: u32,
    pub successful: u32,
    pub failed: u32,
    /// Sent without the ledger gate
    pub fail_open: bool,
    pub details: Vec<DeliveryDetail>,
}

impl DispatchReport {
    fn new(kind: NotificationKind, subject_id: Option<Uuid>, status: DispatchStatus) -> Self {
        Self {
            kind,
            subject_id,
            status,
            recipients: 0,
            successful: 0,
            failed: 0,
            fail_open: false,
            details: Vec::new(),
        }
    }

    pub fn skipped(&self) -> bool {
        self.status == DispatchStatus::AlreadySent
    }
}

enum Gate {
    Ungated,
    Claimed(Uuid),
    FailOpen(Option<Uuid>),
    AlreadySent,
}

pub struct NotificationDispatcher {
    repository: Arc<dyn Repository>,
    ledger: Arc<dyn NotificationLedger>,
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
    send_timeout: Duration,
    event_bus: EventBus,
    stats: StatisticsTracker,
}

impl NotificationDispatcher {
    pub fn new(
        repository: Arc<dyn Repository>,
        ledger: Arc<dyn NotificationLedger>,
        senders: Vec<Arc<dyn ChannelSender>>,
        send_timeout: Duration,
        event_bus: EventBus,
        stats: StatisticsTracker,
    ) -> Self {
        let senders = senders.into_iter().map(|s| (s.channel(), s)).collect();
        Self {
            repository,
            ledger,
            senders,
            send_timeout,
            event_bus,
            stats,
        }
    }

    /// Dispatch an alert as `disaster_alert` or `emergency_alert` by severity
    pub async fn dispatch_alert(&self, alert: &Alert) -> DispatchReport {
        self.dispatch(kind_for_alert(alert), &NotificationPayload::Alert(alert.clone()))
            .await
    }

    /// Deliver `payload` to every subscriber that opted into `kind`
    ///
    /// Never fails: individual send errors are counted in the report.
    pub async fn dispatch(&self, kind: NotificationKind, payload: &NotificationPayload) -> DispatchReport {
        let subject_id = payload.subject_id();

        let gate = self.pass_gate(kind, subject_id).await;
        if let Gate::AlreadySent = gate {
            info!(kind = kind.as_str(), subject_id = ?subject_id, "Notification already sent, skipping");
            self.stats.update(|s| s.notifications_skipped += 1);
            let report = DispatchReport::new(kind, subject_id, DispatchStatus::AlreadySent);
            self.publish(&report);
            return report;
        }

        let mut report = DispatchReport::new(kind, subject_id, DispatchStatus::Sent);
        report.fail_open = matches!(gate, Gate::FailOpen(_));

        let subscribers = self.resolve_subscribers(kind, payload.location()).await;
        report.recipients = subscribers.len() as u32;

        let message = format_message(kind, payload);
        let now = Utc::now();

        for subscriber in &subscribers {
            let mut delivered = false;
            for &channel in subscriber.channel_type.channels() {
                let outcome = self.send_one(subscriber, channel, &message).await;
                match &outcome {
                    DeliveryOutcome::Delivered => {
                        report.successful += 1;
                        delivered = true;
                    }
                    DeliveryOutcome::Failed(_) => report.failed += 1,
                    DeliveryOutcome::NoAddress => {}
                }
                report.details.push(DeliveryDetail {
                    subscriber_id: subscriber.id.clone(),
                    channel,
                    outcome,
                });
            }

            if delivered {
                if let Err(e) = self.repository.record_last_notified(&subscriber.id, kind, now).await {
                    warn!(subscriber_id = %subscriber.id, error = %e, "Failed to record last-notified time");
                }
            }
        }

        match gate {
            Gate::Claimed(subject) | Gate::FailOpen(Some(subject)) => {
                let entry = LedgerEntry {
                    subject_id: subject,
                    kind,
                    sent_at: now,
                    recipient_count: report.recipients,
                    successful: report.successful,
                    failed: report.failed,
                    ttl: LedgerEntry::expiry_for(now),
                };
                if let Err(e) = self.ledger.record(&entry).await {
                    warn!(kind = kind.as_str(), subject_id = %subject, error = %e, "Failed to write notification ledger entry");
                }
            }
            _ => {}
        }

        info!(
            kind = kind.as_str(),
            subject_id = ?subject_id,
            recipients = report.recipients,
            successful = report.successful,
            failed = report.failed,
            fail_open = report.fail_open,
            "Notification dispatched"
        );

        self.stats.update(|s| {
            s.notifications_sent += report.successful as u64;
            s.notifications_failed += report.failed as u64;
            if report.fail_open {
                s.ledger_fail_open += 1;
            }
        });
        self.publish(&report);
        report
    }

    async fn pass_gate(&self, kind: NotificationKind, subject_id: Option<Uuid>) -> Gate {
        let subject = match subject_id {
            Some(id) if kind.is_ledger_gated() => id,
            _ => return Gate::Ungated,
        };

        match self.ledger.availability().await {
            LedgerAvailability::Available => {}
            LedgerAvailability::Unavailable(reason) => {
                warn!(
                    kind = kind.as_str(),
                    subject_id = %subject,
                    reason = %reason,
                    "Notification ledger unavailable, sending without idempotency gate; duplicates possible"
                );
                return Gate::FailOpen(None);
            }
        }

        match self.ledger.claim(subject, kind, Utc::now()).await {
            Ok(true) => Gate::Claimed(subject),
            Ok(false) => Gate::AlreadySent,
            Err(e) => {
                warn!(
                    kind = kind.as_str(),
                    subject_id = %subject,
                    error = %e,
                    "Ledger claim failed, sending without idempotency gate; duplicates possible"
                );
                Gate::FailOpen(Some(subject))
            }
        }
    }

    /// Location matches first, then everyone else with the preference; no duplicates
    async fn resolve_subscribers(&self, kind: NotificationKind, location: Option<&str>) -> Vec<Subscriber> {
        let local = match location {
            Some(location) => self
                .repository
                .subscribers_with_preference_at(kind, location)
                .await
                .unwrap_or_else(|e| {
                    warn!(kind = kind.as_str(), error = %e, "Location subscriber lookup failed");
                    Vec::new()
                }),
            None => Vec::new(),
        };
        let everyone = self
            .repository
            .subscribers_with_preference(kind)
            .await
            .unwrap_or_else(|e| {
                warn!(kind = kind.as_str(), error = %e, "Subscriber lookup failed");
                Vec::new()
            });

        merge_subscribers(local, everyone)
    }

    async fn send_one(
        &self,
        subscriber: &Subscriber,
        channel: Channel,
        message: &crate::adapters::DispatchMessage,
    ) -> DeliveryOutcome {
        let Some(address) = subscriber.address_for(channel) else {
            debug!(subscriber_id = %subscriber.id, channel = channel.as_str(), "No address for channel");
            return DeliveryOutcome::NoAddress;
        };
        let Some(sender) = self.senders.get(&channel) else {
            return DeliveryOutcome::Failed(format!("no {} sender configured", channel.as_str()));
        };

        match with_timeout(self.send_timeout, sender.send(address, message)).await {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(e) => {
                warn!(
                    subscriber_id = %subscriber.id,
                    channel = channel.as_str(),
                    error = %e,
                    "Notification send failed"
                );
                DeliveryOutcome::Failed(e.to_string())
            }
        }
    }

    fn publish(&self, report: &DispatchReport) {
        self.event_bus.emit_lossy(PipelineEvent::NotificationDispatched {
            kind: report.kind,
            subject_id: report.subject_id,
            successful: report.successful,
            failed: report.failed,
            skipped: report.skipped(),
            timestamp: Utc::now(),
        });
    }
}

/// Merge subscriber lists by id, keeping first occurrence order
pub fn merge_subscribers(first: Vec<Subscriber>, second: Vec<Subscriber>) -> Vec<Subscriber> {
    let mut seen = HashSet::new();
    first
        .into_iter()
        .chain(second)
        .filter(|s| seen.insert(s.id.clone()))
        .collect()
}
