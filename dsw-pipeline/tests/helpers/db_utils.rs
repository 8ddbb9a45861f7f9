//! Database Test Utilities

use anyhow::Result;
use dsw_common::models::Event;
use dsw_pipeline::services::enrichment::dedup_window;
use dsw_pipeline::{Repository, SqliteRepository};
use sqlx::SqlitePool;
use std::sync::Arc;
use tempfile::TempDir;

/// Create temporary test database with all tables
///
/// Returns (TempDir, repository) - TempDir must be kept alive for duration of test
pub async fn create_test_repository() -> Result<(TempDir, Arc<SqliteRepository>)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test_dsw.db");
    let pool = dsw_pipeline::db::init_database_pool(&db_path).await?;
    Ok((temp_dir, Arc::new(SqliteRepository::new(pool))))
}

pub async fn count_rows(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Insert an event with the pipeline's duplicate window, asserting it was stored
pub async fn store_event(repository: &dyn Repository, event: &Event) {
    let inserted = repository
        .save_event(event, event.created_at - dedup_window())
        .await
        .unwrap();
    assert!(inserted, "event {} was rejected as a duplicate", event.id);
}
