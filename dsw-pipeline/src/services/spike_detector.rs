//! Spike detection over a sliding window of recent events
//!
//! Every cycle re-reads the window from the repository, so detection works
//! the same with one pipeline instance or several. A cluster that keeps
//! growing is alerted again each cycle; the dispatcher's ledger is keyed by
//! alert id and does not suppress those.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::repository::Repository;
use crate::services::orchestrator::statistics::StatisticsTracker;
use dsw_common::events::{EventBus, PipelineEvent};
use dsw_common::models::{Alert, Event};
use dsw_common::Result;

/// Fewest events in the window before any group is considered
pub const MIN_WINDOW_EVENTS: usize = 3;

/// Smallest location group that produces an alert
pub const MIN_GROUP_EVENTS: usize = 2;

pub const PER_EVENT_BONUS: f32 = 0.1;

pub fn spike_window() -> Duration {
    Duration::minutes(10)
}

/// Location group: display name plus its events
#[derive(Debug)]
pub struct LocationGroup<'a> {
    pub location: String,
    pub events: Vec<&'a Event>,
}

/// Group events by location key, case-insensitively, in a stable order
pub fn group_by_location(events: &[Event]) -> Vec<LocationGroup<'_>> {
    let mut groups: BTreeMap<String, LocationGroup<'_>> = BTreeMap::new();
    for event in events {
        let key = event.location_key().trim().to_lowercase();
        groups
            .entry(key)
            .or_insert_with(|| LocationGroup {
                location: event.location_key().trim().to_string(),
                events: Vec::new(),
            })
            .events
            .push(event);
    }
    groups.into_values().collect()
}

/// `min(1, mean severity + count * 0.1)`
pub fn cluster_severity(events: &[&Event]) -> f32 {
    if events.is_empty() {
        return 0.0;
    }
    let count = events.len() as f32;
    let mean = events.iter().map(|e| e.severity).sum::<f32>() / count;
    (mean + count * PER_EVENT_BONUS).min(1.0)
}

/// Alerts for the events currently in the window, not yet persisted
pub fn build_alerts(events: &[Event], now: DateTime<Utc>) -> Vec<Alert> {
    if events.len() < MIN_WINDOW_EVENTS {
        return Vec::new();
    }

    group_by_location(events)
        .into_iter()
        .filter(|group| group.events.len() >= MIN_GROUP_EVENTS)
        .map(|group| {
            let mut alert = Alert::new(
                group.location,
                cluster_severity(&group.events),
                group.events.iter().map(|e| e.id).collect(),
                now,
            );
            if group.events.iter().any(|e| e.verified) {
                alert.verified = true;
                alert.verified_at = Some(now);
            }
            alert
        })
        .collect()
}

pub struct SpikeDetector {
    repository: Arc<dyn Repository>,
    event_bus: EventBus,
    stats: StatisticsTracker,
}

impl SpikeDetector {
    pub fn new(repository: Arc<dyn Repository>, event_bus: EventBus, stats: StatisticsTracker) -> Self {
        Self {
            repository,
            event_bus,
            stats,
        }
    }

    /// Evaluate the window ending at `now` and persist any alerts
    ///
    /// Fails only when the window cannot be read. An alert that fails to
    /// save is logged and left out of the result.
    pub async fn detect(&self, now: DateTime<Utc>) -> Result<Vec<Alert>> {
        let events = self.repository.events_between(now - spike_window(), now).await?;
        debug!(window_events = events.len(), "Spike window evaluated");

        let mut created = Vec::new();
        for mut alert in build_alerts(&events, now) {
            match self.repository.save_alert(&alert).await {
                Ok(verified_at) => {
                    alert.verified = verified_at.is_some();
                    alert.verified_at = verified_at;
                }
                Err(e) => {
                    warn!(location = %alert.location, error = %e, "Failed to persist alert");
                    self.stats.update(|s| s.persistence_failures += 1);
                    continue;
                }
            }

            info!(
                alert_id = %alert.id,
                location = %alert.location,
                severity = alert.severity,
                event_count = alert.event_count,
                verified = alert.verified,
                "Spike alert created"
            );
            self.stats.update(|s| s.alerts_created += 1);
            self.event_bus.emit_lossy(PipelineEvent::AlertCreated {
                alert_id: alert.id,
                location: alert.location.clone(),
                severity: alert.severity,
                event_count: alert.event_count,
                timestamp: now,
            });
            created.push(alert);
        }

        Ok(created)
    }
}
