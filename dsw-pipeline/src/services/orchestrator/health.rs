//! Health assessment derived from statistics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::statistics::PipelineStatistics;

/// A pipeline that has not completed a cycle for this many intervals is stalled
pub const STALL_FACTOR: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Stalled,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Stalled => "stalled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub uptime_seconds: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub stats: PipelineStatistics,
}

/// Assess pipeline health at `now`
///
/// Before the first cycle the start time stands in for the last cycle.
pub fn assess(
    stats: PipelineStatistics,
    started_at: DateTime<Utc>,
    cycle_interval: Duration,
    now: DateTime<Utc>,
) -> HealthReport {
    let reference = stats.last_cycle_at.unwrap_or(started_at);
    let stall_after = chrono::Duration::from_std(cycle_interval * STALL_FACTOR)
        .unwrap_or_else(|_| chrono::Duration::days(1));

    let status = if now.signed_duration_since(reference) > stall_after {
        HealthStatus::Stalled
    } else if stats.last_cycle_error.is_some() {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    HealthReport {
        status,
        uptime_seconds: now.signed_duration_since(started_at).num_seconds().max(0) as u64,
        last_cycle_at: stats.last_cycle_at,
        last_error: stats.last_cycle_error.clone(),
        stats,
    }
}
