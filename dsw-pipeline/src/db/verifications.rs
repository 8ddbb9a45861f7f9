//! Verification persistence (insert-if-absent on fingerprint)

use dsw_common::models::Verification;
use dsw_common::time::{from_epoch_millis, to_epoch_millis};
use dsw_common::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::parse_uuid;

/// Store a verification unless one with the same fingerprint exists.
///
/// Returns true when this call inserted the row.
pub async fn insert_if_absent(pool: &SqlitePool, verification: &Verification) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO verifications (id, fingerprint, source, kind, location, text, confidence, timestamp_ms, matched_event_id)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(fingerprint) DO NOTHING
        "#,
    )
    .bind(verification.id.to_string())
    .bind(&verification.fingerprint)
    .bind(&verification.source)
    .bind(&verification.kind)
    .bind(&verification.location)
    .bind(&verification.text)
    .bind(verification.confidence)
    .bind(to_epoch_millis(verification.timestamp))
    .bind(verification.matched_event_id.map(|id| id.to_string()))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Record the first event a stored verification matched
pub async fn set_matched_event(pool: &SqlitePool, fingerprint: &str, event_id: Uuid) -> Result<()> {
    sqlx::query(
        "UPDATE verifications SET matched_event_id = ? WHERE fingerprint = ? AND matched_event_id IS NULL",
    )
    .bind(event_id.to_string())
    .bind(fingerprint)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_by_fingerprint(pool: &SqlitePool, fingerprint: &str) -> Result<Option<Verification>> {
    let row = sqlx::query(
        r#"
        SELECT id, fingerprint, source, kind, location, text, confidence, timestamp_ms, matched_event_id
        FROM verifications WHERE fingerprint = ?
        "#,
    )
    .bind(fingerprint)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let id: String = row.get("id");
            let matched: Option<String> = row.get("matched_event_id");
            Ok(Some(Verification {
                id: parse_uuid(&id)?,
                source: row.get("source"),
                kind: row.get("kind"),
                location: row.get("location"),
                text: row.get("text"),
                confidence: row.get("confidence"),
                timestamp: from_epoch_millis(row.get("timestamp_ms")),
                matched_event_id: matched.as_deref().map(parse_uuid).transpose()?,
                fingerprint: row.get("fingerprint"),
            }))
        }
        None => Ok(None),
    }
}

pub async fn count_verifications(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM verifications")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
