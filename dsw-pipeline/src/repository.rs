//! Storage seams used by the pipeline services
//!
//! [`Repository`] covers posts, events, alerts, verifications and subscribers.
//! [`NotificationLedger`] is separate so the dispatcher can check its
//! availability on its own. [`SqliteRepository`] implements both over one pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dsw_common::models::{Alert, Event, LedgerEntry, NotificationKind, Post, Subscriber, Verification};
use dsw_common::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db;
use crate::utils::retry_on_lock;

/// Default budget for waiting out SQLite lock contention on writes
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5_000;

#[async_trait]
pub trait Repository: Send + Sync {
    async fn save_post(&self, post: &Post) -> Result<()>;

    /// Insert unless the same (author, text) was created at or after
    /// `duplicate_since`; true when inserted. The check and the insert are one
    /// statement, so concurrent writers of the same report store it once.
    async fn save_event(&self, event: &Event, duplicate_since: DateTime<Utc>) -> Result<bool>;

    async fn get_event(&self, id: Uuid) -> Result<Option<Event>>;

    /// Same (author, text) created at or after `since`
    async fn has_recent_duplicate(&self, author: &str, text: &str, since: DateTime<Utc>) -> Result<bool>;

    /// Events whose report time is in `[from, to]`
    async fn events_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Event>>;

    /// Unverified events at `location` whose report time is in `[from, to]`
    async fn unverified_events_at(
        &self,
        location: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>>;

    /// Atomic false → true flip. `Ok(true)` only for the caller that won.
    async fn mark_event_verified(&self, id: Uuid, source: &str, at: DateTime<Utc>) -> Result<bool>;

    /// Store an alert with its event references; returns the verification
    /// time as stored, which is set when a referenced event is already verified
    async fn save_alert(&self, alert: &Alert) -> Result<Option<DateTime<Utc>>>;

    async fn get_alert(&self, id: Uuid) -> Result<Option<Alert>>;

    /// Atomically verify alerts referencing `event_id`; returns the ids flipped
    async fn mark_alerts_verified_for_event(&self, event_id: Uuid, at: DateTime<Utc>) -> Result<Vec<Uuid>>;

    async fn alerts_verified_since(&self, since: DateTime<Utc>) -> Result<Vec<Alert>>;

    /// Insert unless the fingerprint is already stored; true when inserted
    async fn save_verification(&self, verification: &Verification) -> Result<bool>;

    async fn set_verification_match(&self, fingerprint: &str, event_id: Uuid) -> Result<()>;

    async fn save_subscriber(&self, subscriber: &Subscriber) -> Result<()>;

    async fn subscribers_with_preference(&self, kind: NotificationKind) -> Result<Vec<Subscriber>>;

    async fn subscribers_with_preference_at(
        &self,
        kind: NotificationKind,
        location: &str,
    ) -> Result<Vec<Subscriber>>;

    async fn record_last_notified(
        &self,
        subscriber_id: &str,
        kind: NotificationKind,
        at: DateTime<Utc>,
    ) -> Result<()>;
}

/// Whether the ledger can currently serve as the idempotency gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerAvailability {
    Available,
    Unavailable(String),
}

#[async_trait]
pub trait NotificationLedger: Send + Sync {
    async fn availability(&self) -> LedgerAvailability;

    /// Atomically reserve (subject, kind). False when an entry already exists.
    async fn claim(&self, subject_id: Uuid, kind: NotificationKind, at: DateTime<Utc>) -> Result<bool>;

    /// Write final counts, creating the entry when no claim was made
    async fn record(&self, entry: &LedgerEntry) -> Result<()>;

    async fn find(&self, subject_id: Uuid, kind: NotificationKind) -> Result<Option<LedgerEntry>>;

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// SQLite-backed repository and ledger
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn save_post(&self, post: &Post) -> Result<()> {
        retry_on_lock("save post", self.max_lock_wait_ms, || db::posts::save_post(&self.pool, post)).await
    }

    async fn save_event(&self, event: &Event, duplicate_since: DateTime<Utc>) -> Result<bool> {
        retry_on_lock("save event", self.max_lock_wait_ms, || {
            db::events::save_event(&self.pool, event, duplicate_since)
        })
        .await
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<Event>> {
        db::events::load_event(&self.pool, id).await
    }

    async fn has_recent_duplicate(&self, author: &str, text: &str, since: DateTime<Utc>) -> Result<bool> {
        db::events::has_recent_duplicate(&self.pool, author, text, since).await
    }

    async fn events_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Event>> {
        db::events::events_between(&self.pool, from, to).await
    }

    async fn unverified_events_at(
        &self,
        location: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        db::events::unverified_events_at(&self.pool, location, from, to).await
    }

    async fn mark_event_verified(&self, id: Uuid, source: &str, at: DateTime<Utc>) -> Result<bool> {
        retry_on_lock("verify event", self.max_lock_wait_ms, || {
            db::events::mark_verified(&self.pool, id, source, at)
        })
        .await
    }

    async fn save_alert(&self, alert: &Alert) -> Result<Option<DateTime<Utc>>> {
        retry_on_lock("save alert", self.max_lock_wait_ms, || db::alerts::save_alert(&self.pool, alert)).await
    }

    async fn get_alert(&self, id: Uuid) -> Result<Option<Alert>> {
        db::alerts::load_alert(&self.pool, id).await
    }

    async fn mark_alerts_verified_for_event(&self, event_id: Uuid, at: DateTime<Utc>) -> Result<Vec<Uuid>> {
        retry_on_lock("verify alerts", self.max_lock_wait_ms, || {
            db::alerts::mark_verified_for_event(&self.pool, event_id, at)
        })
        .await
    }

    async fn alerts_verified_since(&self, since: DateTime<Utc>) -> Result<Vec<Alert>> {
        db::alerts::verified_since(&self.pool, since).await
    }

    async fn save_verification(&self, verification: &Verification) -> Result<bool> {
        retry_on_lock("save verification", self.max_lock_wait_ms, || {
            db::verifications::insert_if_absent(&self.pool, verification)
        })
        .await
    }

    async fn set_verification_match(&self, fingerprint: &str, event_id: Uuid) -> Result<()> {
        db::verifications::set_matched_event(&self.pool, fingerprint, event_id).await
    }

    async fn save_subscriber(&self, subscriber: &Subscriber) -> Result<()> {
        db::subscribers::save_subscriber(&self.pool, subscriber).await
    }

    async fn subscribers_with_preference(&self, kind: NotificationKind) -> Result<Vec<Subscriber>> {
        db::subscribers::with_preference(&self.pool, kind).await
    }

    async fn subscribers_with_preference_at(
        &self,
        kind: NotificationKind,
        location: &str,
    ) -> Result<Vec<Subscriber>> {
        db::subscribers::with_preference_at(&self.pool, kind, location).await
    }

    async fn record_last_notified(
        &self,
        subscriber_id: &str,
        kind: NotificationKind,
        at: DateTime<Utc>,
    ) -> Result<()> {
        db::subscribers::touch_last_notified(&self.pool, subscriber_id, kind, at).await
    }
}

#[async_trait]
impl NotificationLedger for SqliteRepository {
    async fn availability(&self) -> LedgerAvailability {
        match db::ledger::table_exists(&self.pool).await {
            Ok(true) => LedgerAvailability::Available,
            Ok(false) => LedgerAvailability::Unavailable("notification_ledger table missing".to_string()),
            Err(e) => LedgerAvailability::Unavailable(e.to_string()),
        }
    }

    async fn claim(&self, subject_id: Uuid, kind: NotificationKind, at: DateTime<Utc>) -> Result<bool> {
        retry_on_lock("claim ledger entry", self.max_lock_wait_ms, || {
            db::ledger::claim(&self.pool, subject_id, kind, at)
        })
        .await
    }

    async fn record(&self, entry: &LedgerEntry) -> Result<()> {
        retry_on_lock("record ledger entry", self.max_lock_wait_ms, || {
            db::ledger::record(&self.pool, entry)
        })
        .await
    }

    async fn find(&self, subject_id: Uuid, kind: NotificationKind) -> Result<Option<LedgerEntry>> {
        db::ledger::find(&self.pool, subject_id, kind).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        db::ledger::purge_expired(&self.pool, now).await
    }
}
