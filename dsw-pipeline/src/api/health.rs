//! Health and statistics endpoints

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::services::orchestrator::health::{assess, HealthReport};
use crate::services::orchestrator::statistics::PipelineStatistics;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Module name ("dsw-pipeline")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    #[serde(flatten)]
    pub report: HealthReport,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let report = assess(
        state.stats.snapshot(),
        state.startup_time,
        state.cycle_interval,
        Utc::now(),
    );

    Json(HealthResponse {
        module: "dsw-pipeline".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        report,
    })
}

/// GET /stats
pub async fn stats_snapshot(State(state): State<AppState>) -> Json<PipelineStatistics> {
    Json(state.stats.snapshot())
}

pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(stats_snapshot))
}
