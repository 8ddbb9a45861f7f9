//! Database access for dsw-pipeline
//!
//! SQLite via sqlx. Every column used in a time-range query is stored as
//! epoch milliseconds; list-valued columns are JSON text.

pub mod alerts;
pub mod events;
pub mod ledger;
pub mod posts;
pub mod subscribers;
pub mod verifications;

use dsw_common::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Initialize database connection pool
///
/// Creates the file (and parent directory) when missing, then the tables.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let options = SqliteConnectOptions::from_str(&db_url)?
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create all pipeline tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS posts (
            id TEXT PRIMARY KEY,
            text TEXT NOT NULL,
            author TEXT NOT NULL,
            source TEXT NOT NULL,
            timestamp_ms INTEGER NOT NULL,
            images TEXT NOT NULL DEFAULT '[]',
            location TEXT
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            post_id TEXT NOT NULL,
            text TEXT NOT NULL,
            author TEXT NOT NULL,
            source TEXT NOT NULL,
            location TEXT,
            severity REAL NOT NULL,
            confidence REAL NOT NULL,
            entities TEXT NOT NULL DEFAULT '[]',
            sentiment TEXT NOT NULL DEFAULT 'neutral',
            key_phrases TEXT NOT NULL DEFAULT '[]',
            images TEXT NOT NULL DEFAULT '[]',
            language TEXT NOT NULL DEFAULT 'en',
            timestamp_ms INTEGER NOT NULL,
            created_at_ms INTEGER NOT NULL,
            verified INTEGER NOT NULL DEFAULT 0,
            verification_source TEXT,
            verification_timestamp_ms INTEGER
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp_ms)",
        "CREATE INDEX IF NOT EXISTS idx_events_location ON events(location COLLATE NOCASE, verified, timestamp_ms)",
        "CREATE INDEX IF NOT EXISTS idx_events_author ON events(author, created_at_ms)",
        r#"
        CREATE TABLE IF NOT EXISTS alerts (
            id TEXT PRIMARY KEY,
            location TEXT NOT NULL,
            severity REAL NOT NULL,
            event_count INTEGER NOT NULL,
            timestamp_ms INTEGER NOT NULL,
            verified INTEGER NOT NULL DEFAULT 0,
            verified_at_ms INTEGER
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS alert_events (
            alert_id TEXT NOT NULL REFERENCES alerts(id) ON DELETE CASCADE,
            event_id TEXT NOT NULL REFERENCES events(id),
            PRIMARY KEY (alert_id, event_id)
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_alert_events_event ON alert_events(event_id)",
        r#"
        CREATE TABLE IF NOT EXISTS verifications (
            id TEXT PRIMARY KEY,
            fingerprint TEXT NOT NULL UNIQUE,
            source TEXT NOT NULL,
            kind TEXT NOT NULL,
            location TEXT NOT NULL,
            text TEXT NOT NULL,
            confidence REAL NOT NULL,
            timestamp_ms INTEGER NOT NULL,
            matched_event_id TEXT
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS subscribers (
            id TEXT PRIMARY KEY,
            email TEXT,
            phone TEXT,
            channel_type TEXT NOT NULL,
            disaster_alerts INTEGER NOT NULL DEFAULT 0,
            emergency_alerts INTEGER NOT NULL DEFAULT 0,
            verifications INTEGER NOT NULL DEFAULT 0,
            system_status INTEGER NOT NULL DEFAULT 0,
            location TEXT
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS subscriber_notifications (
            subscriber_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            last_notified_at TEXT NOT NULL,
            PRIMARY KEY (subscriber_id, kind)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS notification_ledger (
            subject_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            sent_at TEXT NOT NULL,
            recipient_count INTEGER NOT NULL DEFAULT 0,
            successful INTEGER NOT NULL DEFAULT 0,
            failed INTEGER NOT NULL DEFAULT 0,
            ttl INTEGER NOT NULL,
            PRIMARY KEY (subject_id, kind)
        )
        "#,
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    tracing::info!("Database tables initialized");
    Ok(())
}

pub(crate) fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Invalid UUID {}: {}", value, e)))
}

pub(crate) fn to_json_list(items: &[String]) -> Result<String> {
    Ok(serde_json::to_string(items)?)
}

pub(crate) fn from_json_list(value: &str) -> Result<Vec<String>> {
    Ok(serde_json::from_str(value)?)
}
