//! dsw-pipeline library
//!
//! Disaster spike watch: enriches incoming reports into scored events,
//! clusters them into alerts, verifies them against independent feeds and
//! notifies subscribers at most once per alert.

pub mod adapters;
pub mod api;
pub mod db;
pub mod error;
pub mod repository;
pub mod rules;
pub mod services;
pub mod utils;

pub use crate::error::AdapterError;
pub use crate::repository::{LedgerAvailability, NotificationLedger, Repository, SqliteRepository};

use axum::Router;
use chrono::{DateTime, Utc};
use dsw_common::events::EventBus;
use std::time::Duration;

use crate::services::orchestrator::statistics::StatisticsTracker;

/// Shared state for the HTTP surface
#[derive(Clone)]
pub struct AppState {
    pub stats: StatisticsTracker,
    pub event_bus: EventBus,
    pub startup_time: DateTime<Utc>,
    pub cycle_interval: Duration,
}

impl AppState {
    pub fn new(stats: StatisticsTracker, event_bus: EventBus, cycle_interval: Duration) -> Self {
        Self {
            stats,
            event_bus,
            startup_time: Utc::now(),
            cycle_interval,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new().merge(api::health_routes()).with_state(state)
}
