//! Notification payloads and the messages rendered from them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::adapters::{DispatchMessage, MessageAttributes};
use dsw_common::models::{Alert, Event, NotificationKind, Verification};

/// Excerpts of report text longer than this are cut in message bodies
const EXCERPT_CHARS: usize = 280;

/// Pipeline summary carried by system-status notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub status: String,
    pub events_created: u64,
    pub alerts_created: u64,
    pub events_verified: u64,
    pub notifications_sent: u64,
    pub cycles_completed: u64,
    pub generated_at: DateTime<Utc>,
}

/// What a notification is about
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationPayload {
    Alert(Alert),
    Verification {
        event: Event,
        verification: Verification,
    },
    SystemStatus(StatusSummary),
}

impl NotificationPayload {
    /// Ledger subject: alert id, or event id for verification notices
    pub fn subject_id(&self) -> Option<Uuid> {
        match self {
            NotificationPayload::Alert(alert) => Some(alert.id),
            NotificationPayload::Verification { event, .. } => Some(event.id),
            NotificationPayload::SystemStatus(_) => None,
        }
    }

    pub fn location(&self) -> Option<&str> {
        match self {
            NotificationPayload::Alert(alert) => Some(alert.location.as_str()),
            NotificationPayload::Verification { event, verification } => {
                event.location.as_deref().or(Some(verification.location.as_str()))
            }
            NotificationPayload::SystemStatus(_) => None,
        }
    }

    pub fn severity(&self) -> f32 {
        match self {
            NotificationPayload::Alert(alert) => alert.severity,
            NotificationPayload::Verification { event, .. } => event.severity,
            NotificationPayload::SystemStatus(_) => 0.0,
        }
    }

    pub fn verified(&self) -> bool {
        match self {
            NotificationPayload::Alert(alert) => alert.verified,
            NotificationPayload::Verification { .. } => true,
            NotificationPayload::SystemStatus(_) => false,
        }
    }
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= EXCERPT_CHARS {
        text.to_string()
    } else {
        let cut: String = text.chars().take(EXCERPT_CHARS).collect();
        format!("{}...", cut)
    }
}

fn percent(score: f32) -> u32 {
    (score * 100.0).round() as u32
}

/// Render the message sent for `kind`
pub fn format_message(kind: NotificationKind, payload: &NotificationPayload) -> DispatchMessage {
    let (subject, body) = match payload {
        NotificationPayload::Alert(alert) => {
            let prefix = match kind {
                NotificationKind::EmergencyAlert => "EMERGENCY",
                _ => "DISASTER ALERT",
            };
            let status = if alert.verified {
                "Verified by an independent source"
            } else {
                "Unverified - based on public reports"
            };
            (
                format!("[{}] {} reports near {}", prefix, alert.event_count, alert.location),
                format!(
                    "Multiple disaster reports detected near {location}.\n\n\
                     Severity: {severity}%\n\
                     Reports: {count}\n\
                     Detected: {detected}\n\
                     Status: {status}\n\n\
                     Alert ID: {id}",
                    location = alert.location,
                    severity = percent(alert.severity),
                    count = alert.event_count,
                    detected = alert.timestamp.format("%Y-%m-%d %H:%M UTC"),
                    status = status,
                    id = alert.id,
                ),
            )
        }
        NotificationPayload::Verification { event, verification } => {
            let location = event.location.as_deref().unwrap_or(&verification.location);
            (
                format!("[VERIFIED] {} report confirmed near {}", verification.kind, location),
                format!(
                    "A reported event has been confirmed by {source}.\n\n\
                     Report: {report}\n\
                     Reported: {reported}\n\
                     Confirmation: {confirmation}\n\
                     Confirmed: {confirmed}\n\
                     Severity: {severity}%\n\n\
                     Event ID: {id}",
                    source = verification.source,
                    report = excerpt(&event.text),
                    reported = event.timestamp.format("%Y-%m-%d %H:%M UTC"),
                    confirmation = excerpt(&verification.text),
                    confirmed = verification.timestamp.format("%Y-%m-%d %H:%M UTC"),
                    severity = percent(event.severity),
                    id = event.id,
                ),
            )
        }
        NotificationPayload::SystemStatus(summary) => (
            format!("[STATUS] Disaster watch pipeline {}", summary.status),
            format!(
                "Pipeline status: {status}\n\n\
                 Events created: {events}\n\
                 Alerts created: {alerts}\n\
                 Events verified: {verified}\n\
                 Notifications sent: {sent}\n\
                 Cycles completed: {cycles}\n\
                 Generated: {at}",
                status = summary.status,
                events = summary.events_created,
                alerts = summary.alerts_created,
                verified = summary.events_verified,
                sent = summary.notifications_sent,
                cycles = summary.cycles_completed,
                at = summary.generated_at.to_rfc3339(),
            ),
        ),
    };

    DispatchMessage {
        subject,
        body,
        attributes: MessageAttributes {
            severity: payload.severity(),
            location: payload.location().map(str::to_string),
            verified: payload.verified(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_message_subject_by_kind() {
        let alert = Alert::new(
            "Penang".to_string(),
            0.85,
            vec![Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()],
            Utc::now(),
        );
        let payload = NotificationPayload::Alert(alert);

        let emergency = format_message(NotificationKind::EmergencyAlert, &payload);
        assert_eq!(emergency.subject, "[EMERGENCY] 3 reports near Penang");
        assert!(emergency.body.contains("Severity: 85%"));
        assert!(emergency.body.contains("Unverified"));
        assert_eq!(emergency.attributes.location.as_deref(), Some("Penang"));
        assert!(!emergency.attributes.verified);

        let disaster = format_message(NotificationKind::DisasterAlert, &payload);
        assert!(disaster.subject.starts_with("[DISASTER ALERT]"));
    }

    #[test]
    fn test_status_message_has_no_location() {
        let payload = NotificationPayload::SystemStatus(StatusSummary {
            status: "healthy".to_string(),
            events_created: 4,
            alerts_created: 1,
            events_verified: 3,
            notifications_sent: 6,
            cycles_completed: 12,
            generated_at: Utc::now(),
        });
        let message = format_message(NotificationKind::SystemStatus, &payload);
        assert_eq!(message.subject, "[STATUS] Disaster watch pipeline healthy");
        assert!(message.body.contains("Cycles completed: 12"));
        assert!(message.attributes.location.is_none());
        assert_eq!(payload.subject_id(), None);
    }

    #[test]
    fn test_excerpt_cuts_long_text() {
        let long = "a".repeat(400);
        let cut = excerpt(&long);
        assert_eq!(cut.chars().count(), EXCERPT_CHARS + 3);
        assert!(cut.ends_with("..."));
        assert_eq!(excerpt("short"), "short");
    }
}
