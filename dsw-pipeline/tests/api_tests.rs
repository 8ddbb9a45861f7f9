//! HTTP surface tests against a live listener

use std::time::Duration;

use dsw_common::events::EventBus;
use dsw_pipeline::services::StatisticsTracker;
use dsw_pipeline::{build_router, AppState};

async fn serve(stats: StatisticsTracker) -> String {
    let state = AppState::new(stats, EventBus::new(16), Duration::from_secs(60));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn health_reports_module_and_status() {
    let base = serve(StatisticsTracker::new()).await;

    let body: serde_json::Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["module"], "dsw-pipeline");
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].is_string());
    assert!(body.get("last_error").is_none());
}

#[tokio::test]
async fn health_reports_degraded_after_failed_cycle() {
    let stats = StatisticsTracker::new();
    stats.update(|s| {
        s.cycles_completed = 1;
        s.last_cycle_at = Some(chrono::Utc::now());
        s.last_cycle_error = Some("spike detection: database is locked".to_string());
    });
    let base = serve(stats).await;

    let body: serde_json::Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "degraded");
    assert_eq!(body["last_error"], "spike detection: database is locked");
}

#[tokio::test]
async fn stats_endpoint_returns_counters() {
    let stats = StatisticsTracker::new();
    stats.update(|s| {
        s.events_created = 7;
        s.alerts_created = 2;
    });
    let base = serve(stats).await;

    let body: serde_json::Value = reqwest::get(format!("{}/stats", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["events_created"], 7);
    assert_eq!(body["alerts_created"], 2);
}
