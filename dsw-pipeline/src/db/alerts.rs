//! Alert persistence and the alert ↔ event association

use chrono::{DateTime, Utc};
use dsw_common::models::Alert;
use dsw_common::time::{from_epoch_millis, to_epoch_millis};
use dsw_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::parse_uuid;

/// Save an alert and its event references in one transaction
///
/// An alert built from a window read before one of its events was verified
/// is flipped here, so the matcher's flip and this save cannot both miss it.
/// Returns the verification time as stored.
pub async fn save_alert(pool: &SqlitePool, alert: &Alert) -> Result<Option<DateTime<Utc>>> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO alerts (id, location, severity, event_count, timestamp_ms, verified, verified_at_ms)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(alert.id.to_string())
    .bind(&alert.location)
    .bind(alert.severity)
    .bind(alert.event_count as i64)
    .bind(to_epoch_millis(alert.timestamp))
    .bind(alert.verified)
    .bind(alert.verified_at.map(to_epoch_millis))
    .execute(&mut *tx)
    .await?;

    for event_id in &alert.event_ids {
        sqlx::query("INSERT OR IGNORE INTO alert_events (alert_id, event_id) VALUES (?, ?)")
            .bind(alert.id.to_string())
            .bind(event_id.to_string())
            .execute(&mut *tx)
            .await?;
    }

    let mut verified_at = alert.verified_at.filter(|_| alert.verified);
    if !alert.verified {
        let now = Utc::now();
        let flipped = sqlx::query(
            r#"
            UPDATE alerts SET verified = 1, verified_at_ms = ?
            WHERE id = ? AND verified = 0
              AND EXISTS (
                  SELECT 1 FROM alert_events ae JOIN events e ON e.id = ae.event_id
                  WHERE ae.alert_id = ? AND e.verified = 1
              )
            "#,
        )
        .bind(to_epoch_millis(now))
        .bind(alert.id.to_string())
        .bind(alert.id.to_string())
        .execute(&mut *tx)
        .await?;
        if flipped.rows_affected() == 1 {
            verified_at = Some(now);
        }
    }

    tx.commit().await?;
    Ok(verified_at)
}

/// Load alert by id, including its event references
pub async fn load_alert(pool: &SqlitePool, id: Uuid) -> Result<Option<Alert>> {
    let row = sqlx::query(
        "SELECT id, location, severity, event_count, timestamp_ms, verified, verified_at_ms FROM alerts WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(Some(row_to_alert(pool, &row).await?)),
        None => Ok(None),
    }
}

/// Verify every unverified alert that references `event_id`
///
/// Returns the ids of alerts flipped by this call.
pub async fn mark_verified_for_event(
    pool: &SqlitePool,
    event_id: Uuid,
    verified_at: DateTime<Utc>,
) -> Result<Vec<Uuid>> {
    let rows = sqlx::query(
        r#"
        UPDATE alerts
        SET verified = 1, verified_at_ms = ?
        WHERE verified = 0
          AND id IN (SELECT alert_id FROM alert_events WHERE event_id = ?)
        RETURNING id
        "#,
    )
    .bind(to_epoch_millis(verified_at))
    .bind(event_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let id: String = row.get("id");
            parse_uuid(&id)
        })
        .collect()
}

/// Alerts verified at or after `since`
pub async fn verified_since(pool: &SqlitePool, since: DateTime<Utc>) -> Result<Vec<Alert>> {
    let rows = sqlx::query(
        r#"
        SELECT id, location, severity, event_count, timestamp_ms, verified, verified_at_ms
        FROM alerts
        WHERE verified = 1 AND verified_at_ms >= ?
        ORDER BY verified_at_ms
        "#,
    )
    .bind(to_epoch_millis(since))
    .fetch_all(pool)
    .await?;

    let mut alerts = Vec::with_capacity(rows.len());
    for row in &rows {
        alerts.push(row_to_alert(pool, row).await?);
    }
    Ok(alerts)
}

pub async fn count_alerts(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM alerts")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

async fn row_to_alert(pool: &SqlitePool, row: &SqliteRow) -> Result<Alert> {
    let id: String = row.get("id");
    let event_count: i64 = row.get("event_count");
    let verified_at: Option<i64> = row.get("verified_at_ms");

    let event_rows = sqlx::query("SELECT event_id FROM alert_events WHERE alert_id = ?")
        .bind(&id)
        .fetch_all(pool)
        .await?;
    let event_ids = event_rows
        .iter()
        .map(|r| {
            let event_id: String = r.get("event_id");
            parse_uuid(&event_id)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Alert {
        id: parse_uuid(&id)?,
        location: row.get("location"),
        severity: row.get("severity"),
        event_count: event_count.max(0) as u32,
        event_ids,
        timestamp: from_epoch_millis(row.get("timestamp_ms")),
        verified: row.get("verified"),
        verified_at: verified_at.map(from_epoch_millis),
    })
}
