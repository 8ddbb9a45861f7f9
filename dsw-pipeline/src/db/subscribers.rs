//! Subscriber lookups and per-kind "last notified" bookkeeping

use chrono::{DateTime, Utc};
use dsw_common::models::{ChannelType, NotificationKind, Preferences, Subscriber};
use dsw_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

const SUBSCRIBER_COLUMNS: &str = "id, email, phone, channel_type, disaster_alerts, \
     emergency_alerts, verifications, system_status, location";

/// Preference column for a notification kind
fn preference_column(kind: NotificationKind) -> &'static str {
    match kind {
        NotificationKind::DisasterAlert => "disaster_alerts",
        NotificationKind::EmergencyAlert => "emergency_alerts",
        NotificationKind::Verification => "verifications",
        NotificationKind::SystemStatus => "system_status",
    }
}

/// Insert or replace a subscriber record
pub async fn save_subscriber(pool: &SqlitePool, subscriber: &Subscriber) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO subscribers (id, email, phone, channel_type, disaster_alerts, emergency_alerts,
                                 verifications, system_status, location)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            email = excluded.email,
            phone = excluded.phone,
            channel_type = excluded.channel_type,
            disaster_alerts = excluded.disaster_alerts,
            emergency_alerts = excluded.emergency_alerts,
            verifications = excluded.verifications,
            system_status = excluded.system_status,
            location = excluded.location
        "#,
    )
    .bind(&subscriber.id)
    .bind(&subscriber.email)
    .bind(&subscriber.phone)
    .bind(subscriber.channel_type.as_str())
    .bind(subscriber.preferences.disaster_alerts)
    .bind(subscriber.preferences.emergency_alerts)
    .bind(subscriber.preferences.verifications)
    .bind(subscriber.preferences.system_status)
    .bind(&subscriber.location)
    .execute(pool)
    .await?;

    Ok(())
}

/// Subscribers that opted into `kind`
pub async fn with_preference(pool: &SqlitePool, kind: NotificationKind) -> Result<Vec<Subscriber>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM subscribers WHERE {} = 1 ORDER BY id",
        SUBSCRIBER_COLUMNS,
        preference_column(kind)
    ))
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_subscriber).collect()
}

/// Subscribers that opted into `kind` and registered `location` (case-insensitive)
pub async fn with_preference_at(
    pool: &SqlitePool,
    kind: NotificationKind,
    location: &str,
) -> Result<Vec<Subscriber>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM subscribers WHERE {} = 1 AND location = ? COLLATE NOCASE ORDER BY id",
        SUBSCRIBER_COLUMNS,
        preference_column(kind)
    ))
    .bind(location.trim())
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_subscriber).collect()
}

pub async fn touch_last_notified(
    pool: &SqlitePool,
    subscriber_id: &str,
    kind: NotificationKind,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO subscriber_notifications (subscriber_id, kind, last_notified_at)
        VALUES (?, ?, ?)
        ON CONFLICT(subscriber_id, kind) DO UPDATE SET last_notified_at = excluded.last_notified_at
        "#,
    )
    .bind(subscriber_id)
    .bind(kind.as_str())
    .bind(at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn last_notified(
    pool: &SqlitePool,
    subscriber_id: &str,
    kind: NotificationKind,
) -> Result<Option<DateTime<Utc>>> {
    let value: Option<String> = sqlx::query_scalar(
        "SELECT last_notified_at FROM subscriber_notifications WHERE subscriber_id = ? AND kind = ?",
    )
    .bind(subscriber_id)
    .bind(kind.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(value
        .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
        .map(|dt| dt.with_timezone(&Utc)))
}

fn row_to_subscriber(row: &SqliteRow) -> Result<Subscriber> {
    let channel_type: String = row.get("channel_type");
    Ok(Subscriber {
        id: row.get("id"),
        email: row.get("email"),
        phone: row.get("phone"),
        channel_type: ChannelType::parse(&channel_type)?,
        preferences: Preferences {
            disaster_alerts: row.get("disaster_alerts"),
            emergency_alerts: row.get("emergency_alerts"),
            verifications: row.get("verifications"),
            system_status: row.get("system_status"),
        },
        location: row.get("location"),
    })
}
