//! Event persistence
//!
//! Inserts are conditional on no recent duplicate. The only mutation after
//! insert is [`mark_verified`], a conditional update that succeeds for
//! exactly one caller.

use chrono::{DateTime, Utc};
use dsw_common::models::{Event, Sentiment};
use dsw_common::time::{from_epoch_millis, to_epoch_millis};
use dsw_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{from_json_list, parse_uuid, to_json_list};

const EVENT_COLUMNS: &str = "id, post_id, text, author, source, location, severity, confidence, \
     entities, sentiment, key_phrases, images, language, timestamp_ms, created_at_ms, \
     verified, verification_source, verification_timestamp_ms";

/// Save a new event unless the same (author, text) was created at or after
/// `duplicate_since`
///
/// The duplicate check and the insert are one statement. Returns true when
/// the row was inserted.
pub async fn save_event(pool: &SqlitePool, event: &Event, duplicate_since: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO events (
            id, post_id, text, author, source, location, severity, confidence,
            entities, sentiment, key_phrases, images, language, timestamp_ms, created_at_ms,
            verified, verification_source, verification_timestamp_ms
        )
        SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
        WHERE NOT EXISTS (
            SELECT 1 FROM events WHERE author = ? AND text = ? AND created_at_ms >= ?
        )
        "#,
    )
    .bind(event.id.to_string())
    .bind(event.post_id.to_string())
    .bind(&event.text)
    .bind(&event.author)
    .bind(&event.source)
    .bind(&event.location)
    .bind(event.severity)
    .bind(event.confidence)
    .bind(to_json_list(&event.entities)?)
    .bind(event.sentiment.as_str())
    .bind(to_json_list(&event.key_phrases)?)
    .bind(to_json_list(&event.images)?)
    .bind(&event.language)
    .bind(to_epoch_millis(event.timestamp))
    .bind(to_epoch_millis(event.created_at))
    .bind(event.verified)
    .bind(&event.verification_source)
    .bind(event.verification_timestamp.map(to_epoch_millis))
    .bind(&event.author)
    .bind(&event.text)
    .bind(to_epoch_millis(duplicate_since))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Load event by id
pub async fn load_event(pool: &SqlitePool, id: Uuid) -> Result<Option<Event>> {
    let row = sqlx::query(&format!("SELECT {} FROM events WHERE id = ?", EVENT_COLUMNS))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|r| row_to_event(&r)).transpose()
}

/// True when an event with the same author and text was created at or after `since`
pub async fn has_recent_duplicate(
    pool: &SqlitePool,
    author: &str,
    text: &str,
    since: DateTime<Utc>,
) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM events WHERE author = ? AND text = ? AND created_at_ms >= ?",
    )
    .bind(author)
    .bind(text)
    .bind(to_epoch_millis(since))
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

/// Events whose report time falls in `[from, to]`, oldest first
pub async fn events_between(
    pool: &SqlitePool,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<Event>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM events WHERE timestamp_ms >= ? AND timestamp_ms <= ? ORDER BY timestamp_ms",
        EVENT_COLUMNS
    ))
    .bind(to_epoch_millis(from))
    .bind(to_epoch_millis(to))
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_event).collect()
}

/// Unverified events at `location` (case-insensitive) with report time in `[from, to]`
pub async fn unverified_events_at(
    pool: &SqlitePool,
    location: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<Event>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {} FROM events
        WHERE location = ? COLLATE NOCASE
          AND verified = 0
          AND timestamp_ms >= ? AND timestamp_ms <= ?
        ORDER BY timestamp_ms
        "#,
        EVENT_COLUMNS
    ))
    .bind(location)
    .bind(to_epoch_millis(from))
    .bind(to_epoch_millis(to))
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_event).collect()
}

/// Flip `verified` false → true. Returns true only for the caller that flipped it.
pub async fn mark_verified(
    pool: &SqlitePool,
    id: Uuid,
    source: &str,
    verified_at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE events
        SET verified = 1, verification_source = ?, verification_timestamp_ms = ?
        WHERE id = ? AND verified = 0
        "#,
    )
    .bind(source)
    .bind(to_epoch_millis(verified_at))
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn count_events(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

fn row_to_event(row: &SqliteRow) -> Result<Event> {
    let id: String = row.get("id");
    let post_id: String = row.get("post_id");
    let entities: String = row.get("entities");
    let key_phrases: String = row.get("key_phrases");
    let images: String = row.get("images");
    let sentiment: String = row.get("sentiment");
    let verification_ts: Option<i64> = row.get("verification_timestamp_ms");

    Ok(Event {
        id: parse_uuid(&id)?,
        post_id: parse_uuid(&post_id)?,
        text: row.get("text"),
        author: row.get("author"),
        source: row.get("source"),
        location: row.get("location"),
        severity: row.get("severity"),
        confidence: row.get("confidence"),
        entities: from_json_list(&entities)?,
        sentiment: Sentiment::parse(&sentiment),
        key_phrases: from_json_list(&key_phrases)?,
        images: from_json_list(&images)?,
        language: row.get("language"),
        timestamp: from_epoch_millis(row.get("timestamp_ms")),
        created_at: from_epoch_millis(row.get("created_at_ms")),
        verified: row.get("verified"),
        verification_source: row.get("verification_source"),
        verification_timestamp: verification_ts.map(from_epoch_millis),
    })
}
