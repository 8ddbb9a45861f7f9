//! Pipeline statistics
//!
//! One flat counter struct shared by the cycle loop, the verification timer
//! and the HTTP surface. Snapshots are cheap clones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatistics {
    /// Posts handed to the enrichment pipeline
    pub posts_processed: u64,
    pub events_created: u64,
    /// Posts classified as not disaster-related
    pub posts_filtered: u64,
    pub duplicates: u64,
    /// Posts failing validation
    pub posts_rejected: u64,
    /// Posts classified by the keyword fallback instead of the analyzer
    pub analyzer_fallbacks: u64,
    pub translation_failures: u64,
    pub signal_failures: u64,
    /// Repository writes that failed and were skipped
    pub persistence_failures: u64,
    pub alerts_created: u64,
    pub alerts_verified: u64,
    pub verifications_stored: u64,
    pub events_verified: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub notifications_skipped: u64,
    /// Dispatches that went out without the ledger gate
    pub ledger_fail_open: u64,
    pub cycles_completed: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_cycle_duration_ms: u64,
    /// Error recorded by the most recent cycle, cleared by a clean one
    pub last_cycle_error: Option<String>,
    pub last_verification_poll_at: Option<DateTime<Utc>>,
}

impl PipelineStatistics {
    pub fn display_string(&self) -> String {
        format!(
            "{} posts, {} events, {} alerts ({} verified), {} notifications sent",
            self.posts_processed,
            self.events_created,
            self.alerts_created,
            self.alerts_verified,
            self.notifications_sent
        )
    }
}

/// Thread-safe handle to [`PipelineStatistics`]
#[derive(Debug, Clone, Default)]
pub struct StatisticsTracker {
    inner: Arc<Mutex<PipelineStatistics>>,
}

impl StatisticsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut PipelineStatistics),
    {
        let mut stats = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut stats);
    }

    pub fn snapshot(&self) -> PipelineStatistics {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_clones_share_counters() {
        let tracker = StatisticsTracker::new();
        let other = tracker.clone();
        tracker.update(|s| s.events_created += 2);
        other.update(|s| s.alerts_created += 1);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.events_created, 2);
        assert_eq!(snapshot.alerts_created, 1);
        assert_eq!(
            snapshot.display_string(),
            "0 posts, 2 events, 1 alerts (0 verified), 0 notifications sent"
        );
    }
}
