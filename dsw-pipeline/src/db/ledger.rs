//! Notification ledger: one row per (subject, kind)
//!
//! The primary key is the idempotency gate. A claim inserts a placeholder
//! row; the dispatcher fills in the counts once sends finish.

use chrono::{DateTime, Utc};
use dsw_common::models::{LedgerEntry, NotificationKind};
use dsw_common::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::parse_uuid;

/// True when the ledger table exists in this database
pub async fn table_exists(pool: &SqlitePool) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'notification_ledger'",
    )
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// Insert a placeholder row for (subject, kind). Returns false if one exists.
pub async fn claim(
    pool: &SqlitePool,
    subject_id: Uuid,
    kind: NotificationKind,
    sent_at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO notification_ledger (subject_id, kind, sent_at, recipient_count, successful, failed, ttl)
        VALUES (?, ?, ?, 0, 0, 0, ?)
        ON CONFLICT(subject_id, kind) DO NOTHING
        "#,
    )
    .bind(subject_id.to_string())
    .bind(kind.as_str())
    .bind(sent_at.to_rfc3339())
    .bind(LedgerEntry::expiry_for(sent_at))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Write the final counts for an entry, creating it if no claim was made
pub async fn record(pool: &SqlitePool, entry: &LedgerEntry) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO notification_ledger (subject_id, kind, sent_at, recipient_count, successful, failed, ttl)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(subject_id, kind) DO UPDATE SET
            sent_at = excluded.sent_at,
            recipient_count = excluded.recipient_count,
            successful = excluded.successful,
            failed = excluded.failed,
            ttl = excluded.ttl
        "#,
    )
    .bind(entry.subject_id.to_string())
    .bind(entry.kind.as_str())
    .bind(entry.sent_at.to_rfc3339())
    .bind(entry.recipient_count as i64)
    .bind(entry.successful as i64)
    .bind(entry.failed as i64)
    .bind(entry.ttl)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn find(
    pool: &SqlitePool,
    subject_id: Uuid,
    kind: NotificationKind,
) -> Result<Option<LedgerEntry>> {
    let row = sqlx::query(
        r#"
        SELECT subject_id, kind, sent_at, recipient_count, successful, failed, ttl
        FROM notification_ledger WHERE subject_id = ? AND kind = ?
        "#,
    )
    .bind(subject_id.to_string())
    .bind(kind.as_str())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let subject: String = row.get("subject_id");
            let kind: String = row.get("kind");
            let sent_at: String = row.get("sent_at");
            let recipient_count: i64 = row.get("recipient_count");
            let successful: i64 = row.get("successful");
            let failed: i64 = row.get("failed");
            Ok(Some(LedgerEntry {
                subject_id: parse_uuid(&subject)?,
                kind: NotificationKind::parse(&kind)?,
                sent_at: DateTime::parse_from_rfc3339(&sent_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
                recipient_count: recipient_count.max(0) as u32,
                successful: successful.max(0) as u32,
                failed: failed.max(0) as u32,
                ttl: row.get("ttl"),
            }))
        }
        None => Ok(None),
    }
}

pub async fn count_entries(pool: &SqlitePool, subject_id: Uuid, kind: NotificationKind) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM notification_ledger WHERE subject_id = ? AND kind = ?",
    )
    .bind(subject_id.to_string())
    .bind(kind.as_str())
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Delete entries whose TTL (epoch seconds) has passed
pub async fn purge_expired(pool: &SqlitePool, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM notification_ledger WHERE ttl < ?")
        .bind(now.timestamp())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
