//! Pipeline orchestrator
//!
//! Drives one logical worker through repeated cycles:
//!
//! 1. drain queued posts and enrich them one at a time, pausing between posts
//! 2. detect spikes and dispatch the resulting alerts
//! 3. pick up alerts the verification timer flipped since the last cycle
//! 4. publish system status (bus every cycle, subscribers on an interval)
//! 5. sleep, unless shutdown was requested
//!
//! Cancellation is only observed between cycles and between posts' delays,
//! so a post that started enriching always finishes.

pub mod health;
pub mod statistics;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::repository::{NotificationLedger, Repository};
use crate::services::enrichment::{EnrichmentOutcome, EnrichmentPipeline};
use crate::services::message_format::{NotificationPayload, StatusSummary};
use crate::services::notification_dispatcher::{DispatchReport, NotificationDispatcher};
use crate::services::post_queue::PostQueue;
use crate::services::spike_detector::SpikeDetector;
use dsw_common::config::PipelineConfig;
use dsw_common::events::{EventBus, PipelineEvent};
use dsw_common::models::{Alert, NotificationKind};

use health::HealthStatus;
use statistics::StatisticsTracker;

/// Timing and batch limits for the cycle loop
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub cycle_interval: Duration,
    pub inter_post_delay: Duration,
    pub max_posts_per_cycle: usize,
    pub system_status_interval: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            cycle_interval: config.cycle_interval(),
            inter_post_delay: config.inter_post_delay(),
            max_posts_per_cycle: config.max_posts_per_cycle,
            system_status_interval: config.system_status_interval(),
        }
    }
}

/// What one cycle did
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub outcomes: Vec<EnrichmentOutcome>,
    pub alerts: Vec<Alert>,
    pub dispatches: Vec<DispatchReport>,
    pub newly_verified_alerts: Vec<Uuid>,
    pub status_dispatched: bool,
    pub error: Option<String>,
    pub duration: Duration,
}

pub struct PipelineOrchestrator {
    enrichment: Arc<EnrichmentPipeline>,
    spike_detector: SpikeDetector,
    dispatcher: Arc<NotificationDispatcher>,
    repository: Arc<dyn Repository>,
    ledger: Arc<dyn NotificationLedger>,
    queue: PostQueue,
    settings: OrchestratorSettings,
    event_bus: EventBus,
    stats: StatisticsTracker,
    started_at: DateTime<Utc>,
    cycle: u64,
    last_verified_check: DateTime<Utc>,
    last_status_dispatch: Option<DateTime<Utc>>,
}

impl PipelineOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        enrichment: Arc<EnrichmentPipeline>,
        dispatcher: Arc<NotificationDispatcher>,
        repository: Arc<dyn Repository>,
        ledger: Arc<dyn NotificationLedger>,
        queue: PostQueue,
        settings: OrchestratorSettings,
        event_bus: EventBus,
        stats: StatisticsTracker,
    ) -> Self {
        let now = Utc::now();
        Self {
            enrichment,
            spike_detector: SpikeDetector::new(repository.clone(), event_bus.clone(), stats.clone()),
            dispatcher,
            repository,
            ledger,
            queue,
            settings,
            event_bus,
            stats,
            started_at: now,
            cycle: 0,
            last_verified_check: now,
            last_status_dispatch: None,
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Run one full cycle
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> CycleReport {
        self.cycle += 1;
        let started = Instant::now();
        let mut errors: Vec<String> = Vec::new();

        // Ingest + enrich
        let batch = self.queue.drain(self.settings.max_posts_per_cycle);
        let mut outcomes = Vec::with_capacity(batch.len());
        for (index, post) in batch.iter().enumerate() {
            if index > 0 && !self.settings.inter_post_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.settings.inter_post_delay) => {}
                }
            }
            outcomes.push(self.enrichment.enrich(post).await);
        }

        // Spike detection + alert dispatch
        let now = Utc::now();
        let mut dispatches = Vec::new();
        let alerts = match self.spike_detector.detect(now).await {
            Ok(alerts) => alerts,
            Err(e) => {
                error!(cycle = self.cycle, error = %e, "Spike detection failed");
                errors.push(format!("spike detection: {}", e));
                Vec::new()
            }
        };
        for alert in &alerts {
            dispatches.push(self.dispatcher.dispatch_alert(alert).await);
        }

        // Newly verified alerts
        let newly_verified_alerts = match self.check_newly_verified().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(cycle = self.cycle, error = %e, "Verified-alert check failed");
                errors.push(format!("verified-alert check: {}", e));
                Vec::new()
            }
        };

        if let Err(e) = self.ledger.purge_expired(Utc::now()).await {
            warn!(error = %e, "Failed to purge expired ledger entries");
        }

        // Status
        let duration = started.elapsed();
        let error = if errors.is_empty() { None } else { Some(errors.join("; ")) };
        let cycle = self.cycle;
        let finished_at = Utc::now();
        self.stats.update(|s| {
            s.cycles_completed += 1;
            s.last_cycle_at = Some(finished_at);
            s.last_cycle_duration_ms = duration.as_millis() as u64;
            s.last_cycle_error = error.clone();
        });
        let status_dispatched = self.publish_status(finished_at, error.is_some()).await;

        self.event_bus.emit_lossy(PipelineEvent::CycleCompleted {
            cycle,
            posts_processed: outcomes.len(),
            alerts_created: alerts.len(),
            duration_ms: duration.as_millis() as u64,
            timestamp: finished_at,
        });
        info!(
            cycle,
            posts = outcomes.len(),
            alerts = alerts.len(),
            newly_verified = newly_verified_alerts.len(),
            duration_ms = duration.as_millis() as u64,
            "Cycle complete"
        );

        CycleReport {
            cycle,
            outcomes,
            alerts,
            dispatches,
            newly_verified_alerts,
            status_dispatched,
            error,
            duration,
        }
    }

    /// Cycle until `cancel` fires; the current cycle always completes
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            interval_secs = self.settings.cycle_interval.as_secs(),
            max_posts = self.settings.max_posts_per_cycle,
            "Pipeline orchestrator started"
        );

        while !cancel.is_cancelled() {
            self.run_cycle(&cancel).await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.cycle_interval) => {}
            }
        }

        info!(cycles = self.cycle, "Pipeline orchestrator stopped");
    }

    async fn check_newly_verified(&mut self) -> dsw_common::Result<Vec<Uuid>> {
        let since = self.last_verified_check;
        let check_time = Utc::now();
        let alerts = self.repository.alerts_verified_since(since).await?;
        self.last_verified_check = check_time;

        let mut ids = Vec::with_capacity(alerts.len());
        for alert in alerts {
            info!(
                alert_id = %alert.id,
                location = %alert.location,
                verified_at = ?alert.verified_at,
                "Alert verified"
            );
            self.event_bus.emit_lossy(PipelineEvent::AlertVerified {
                alert_id: alert.id,
                timestamp: alert.verified_at.unwrap_or(check_time),
            });
            ids.push(alert.id);
        }
        Ok(ids)
    }

    /// Bus status every cycle; subscriber notification when the interval elapsed
    async fn publish_status(&mut self, now: DateTime<Utc>, had_error: bool) -> bool {
        let stats = self.stats.snapshot();
        let status = if had_error {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        self.event_bus.emit_lossy(PipelineEvent::SystemStatus {
            status: status.as_str().to_string(),
            events_created: stats.events_created,
            alerts_created: stats.alerts_created,
            notifications_sent: stats.notifications_sent,
            timestamp: now,
        });

        let interval = chrono::Duration::from_std(self.settings.system_status_interval)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let due = self
            .last_status_dispatch
            .map_or(true, |last| now.signed_duration_since(last) >= interval);
        if !due {
            return false;
        }

        let payload = NotificationPayload::SystemStatus(StatusSummary {
            status: status.as_str().to_string(),
            events_created: stats.events_created,
            alerts_created: stats.alerts_created,
            events_verified: stats.events_verified,
            notifications_sent: stats.notifications_sent,
            cycles_completed: stats.cycles_completed,
            generated_at: now,
        });
        self.dispatcher.dispatch(NotificationKind::SystemStatus, &payload).await;
        self.last_status_dispatch = Some(now);
        true
    }
}
