//! Data model shared by the ingestion boundary, the pipeline and storage
//!
//! Scores (`severity`, `confidence`) are clamped to `[0, 1]` on construction.
//! Events flip `verified` false → true exactly once; nothing in this crate
//! exposes a way back.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::time::clamp_unit;
use crate::{Error, Result};

/// Byte budget for report text; longer text is truncated, never rejected
pub const MAX_TEXT_BYTES: usize = 5_000;

/// Location key used when an event carries no location
pub const UNKNOWN_LOCATION: &str = "unknown";

/// Ledger entries expire this long after they are written
pub const LEDGER_TTL_DAYS: i64 = 30;

/// Truncate `text` to at most `max_bytes`, backing off to a char boundary
pub fn truncate_to_bytes(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Normalize a free-form location for comparison and grouping
pub fn normalize_location(location: &str) -> Option<String> {
    let trimmed = location.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

// ============================================================================
// Ingestion
// ============================================================================

/// Raw report accepted from the ingestion boundary (connectors, HTTP front door)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub text: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub images: Option<Vec<String>>,
}

fn default_source() -> String {
    "unknown".to_string()
}

impl IngestRequest {
    /// Validate and convert into an immutable [`Post`]
    ///
    /// Whitespace-only text is rejected; oversized text is truncated.
    pub fn into_post(self) -> Result<Post> {
        if self.text.trim().is_empty() {
            return Err(Error::InvalidInput("post text is empty".to_string()));
        }
        let text = truncate_to_bytes(&self.text, MAX_TEXT_BYTES).to_string();
        Ok(Post {
            id: Uuid::new_v4(),
            text,
            author: self
                .author
                .filter(|a| !a.trim().is_empty())
                .unwrap_or_else(|| "anonymous".to_string()),
            source: self.source,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            images: self.images.unwrap_or_default(),
            location: self.location.as_deref().and_then(normalize_location),
        })
    }
}

/// Incoming text report. Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub text: String,
    pub author: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub images: Vec<String>,
    pub location: Option<String>,
}

// ============================================================================
// Events
// ============================================================================

/// Overall tone reported by the analyzer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    #[default]
    Neutral,
    Negative,
    Mixed,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
            Sentiment::Mixed => "mixed",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "positive" => Sentiment::Positive,
            "negative" => Sentiment::Negative,
            "mixed" => Sentiment::Mixed,
            _ => Sentiment::Neutral,
        }
    }
}

/// Enriched, scored, persisted representation of a disaster-related post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub post_id: Uuid,
    /// Original report text (truncated, untranslated)
    pub text: String,
    pub author: String,
    pub source: String,
    pub location: Option<String>,
    pub severity: f32,
    pub confidence: f32,
    pub entities: Vec<String>,
    pub sentiment: Sentiment,
    pub key_phrases: Vec<String>,
    pub images: Vec<String>,
    /// Language the text was routed as ("en", "ms", ...)
    pub language: String,
    /// Report time (from the post)
    pub timestamp: DateTime<Utc>,
    /// When the pipeline persisted this event
    pub created_at: DateTime<Utc>,
    pub verified: bool,
    pub verification_source: Option<String>,
    pub verification_timestamp: Option<DateTime<Utc>>,
}

impl Event {
    /// Location used for clustering
    pub fn location_key(&self) -> &str {
        self.location.as_deref().unwrap_or(UNKNOWN_LOCATION)
    }
}

// ============================================================================
// Alerts
// ============================================================================

/// Cluster of events at one location inside the spike window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub location: String,
    pub severity: f32,
    pub event_count: u32,
    pub event_ids: Vec<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
}

impl Alert {
    /// Build an alert from already-derived severity; clamps the score
    pub fn new(location: String, severity: f32, event_ids: Vec<Uuid>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            location,
            severity: clamp_unit(severity),
            event_count: event_ids.len() as u32,
            event_ids,
            timestamp,
            verified: false,
            verified_at: None,
        }
    }
}

// ============================================================================
// Verifications
// ============================================================================

/// Independently sourced confirmation. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub id: Uuid,
    pub source: String,
    /// Kind of confirmation ("flood", "earthquake", ...)
    pub kind: String,
    pub location: String,
    pub text: String,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
    pub matched_event_id: Option<Uuid>,
    /// Content hash used to avoid storing the same feed item twice
    pub fingerprint: String,
}

// ============================================================================
// Subscribers & notifications
// ============================================================================

/// Delivery channel of a single send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
        }
    }
}

/// Subscriber channel preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Email,
    Sms,
    Both,
}

impl ChannelType {
    pub fn channels(&self) -> &'static [Channel] {
        match self {
            ChannelType::Email => &[Channel::Email],
            ChannelType::Sms => &[Channel::Sms],
            ChannelType::Both => &[Channel::Email, Channel::Sms],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Email => "email",
            ChannelType::Sms => "sms",
            ChannelType::Both => "both",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "email" => Ok(ChannelType::Email),
            "sms" => Ok(ChannelType::Sms),
            "both" => Ok(ChannelType::Both),
            other => Err(Error::InvalidInput(format!("unknown channel type: {}", other))),
        }
    }
}

/// Notification opt-ins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub disaster_alerts: bool,
    pub emergency_alerts: bool,
    pub verifications: bool,
    pub system_status: bool,
}

impl Preferences {
    pub fn allows(&self, kind: NotificationKind) -> bool {
        match kind {
            NotificationKind::DisasterAlert => self.disaster_alerts,
            NotificationKind::EmergencyAlert => self.emergency_alerts,
            NotificationKind::Verification => self.verifications,
            NotificationKind::SystemStatus => self.system_status,
        }
    }
}

/// Externally owned notification recipient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    pub preferences: Preferences,
    pub location: Option<String>,
}

impl Subscriber {
    /// Address for `channel`, if the subscriber configured one
    pub fn address_for(&self, channel: Channel) -> Option<&str> {
        let address = match channel {
            Channel::Email => self.email.as_deref(),
            Channel::Sms => self.phone.as_deref(),
        };
        address.filter(|a| !a.trim().is_empty())
    }
}

/// Notification kinds routed by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    DisasterAlert,
    EmergencyAlert,
    Verification,
    SystemStatus,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::DisasterAlert => "disaster_alert",
            NotificationKind::EmergencyAlert => "emergency_alert",
            NotificationKind::Verification => "verification",
            NotificationKind::SystemStatus => "system_status",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "disaster_alert" => Ok(NotificationKind::DisasterAlert),
            "emergency_alert" => Ok(NotificationKind::EmergencyAlert),
            "verification" => Ok(NotificationKind::Verification),
            "system_status" => Ok(NotificationKind::SystemStatus),
            other => Err(Error::InvalidInput(format!("unknown notification kind: {}", other))),
        }
    }

    /// Kinds whose delivery is gated by the idempotency ledger
    pub fn is_ledger_gated(&self) -> bool {
        !matches!(self, NotificationKind::SystemStatus)
    }
}

/// Idempotency ledger record: at most one per `(subject_id, kind)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Alert id for alert kinds, event id for verification notices
    pub subject_id: Uuid,
    pub kind: NotificationKind,
    pub sent_at: DateTime<Utc>,
    pub recipient_count: u32,
    pub successful: u32,
    pub failed: u32,
    /// Expiry, epoch seconds
    pub ttl: i64,
}

impl LedgerEntry {
    pub fn expiry_for(sent_at: DateTime<Utc>) -> i64 {
        (sent_at + Duration::days(LEDGER_TTL_DAYS)).timestamp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "é".repeat(3000); // 6000 bytes
        let truncated = truncate_to_bytes(&text, MAX_TEXT_BYTES);
        assert_eq!(truncated.len(), MAX_TEXT_BYTES);
        assert!(truncated.chars().all(|c| c == 'é'));

        let odd = format!("a{}", "é".repeat(3000));
        assert_eq!(truncate_to_bytes(&odd, MAX_TEXT_BYTES).len(), MAX_TEXT_BYTES - 1);
    }

    #[test]
    fn test_ingest_rejects_whitespace_text() {
        let request = IngestRequest {
            text: "   \n\t".to_string(),
            author: None,
            source: "twitter".to_string(),
            timestamp: None,
            location: None,
            images: None,
        };
        assert!(matches!(request.into_post(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_ingest_defaults_and_truncation() {
        let request: IngestRequest = serde_json::from_str(&format!(
            r#"{{"text": "{}", "location": "  Penang "}}"#,
            "x".repeat(6000)
        ))
        .unwrap();
        let post = request.into_post().unwrap();
        assert_eq!(post.text.len(), MAX_TEXT_BYTES);
        assert_eq!(post.author, "anonymous");
        assert_eq!(post.source, "unknown");
        assert_eq!(post.location.as_deref(), Some("Penang"));
        assert!(post.images.is_empty());
    }

    #[test]
    fn test_subscriber_wire_format() {
        let subscriber: Subscriber = serde_json::from_str(
            r#"{
                "id": "sub-1",
                "email": "a@example.com",
                "phone": null,
                "type": "both",
                "preferences": {"disasterAlerts": true, "emergencyAlerts": false,
                                "verifications": true, "systemStatus": false},
                "location": "Penang"
            }"#,
        )
        .unwrap();
        assert_eq!(subscriber.channel_type, ChannelType::Both);
        assert!(subscriber.preferences.allows(NotificationKind::DisasterAlert));
        assert!(!subscriber.preferences.allows(NotificationKind::EmergencyAlert));
        assert_eq!(subscriber.address_for(Channel::Email), Some("a@example.com"));
        assert_eq!(subscriber.address_for(Channel::Sms), None);
    }

    #[test]
    fn test_alert_clamps_severity() {
        let alert = Alert::new("Penang".to_string(), 1.4, vec![Uuid::new_v4()], Utc::now());
        assert_eq!(alert.severity, 1.0);
        assert_eq!(alert.event_count, 1);
        assert!(!alert.verified);
    }

    #[test]
    fn test_notification_kind_gating() {
        assert!(NotificationKind::DisasterAlert.is_ledger_gated());
        assert!(NotificationKind::EmergencyAlert.is_ledger_gated());
        assert!(NotificationKind::Verification.is_ledger_gated());
        assert!(!NotificationKind::SystemStatus.is_ledger_gated());
        assert_eq!(
            NotificationKind::parse("emergency_alert").unwrap(),
            NotificationKind::EmergencyAlert
        );
    }
}
