//! Repository and ledger tests, including concurrent conditional writes

mod helpers;

use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use dsw_common::models::{ChannelType, LedgerEntry, NotificationKind, Preferences, Verification};
use dsw_pipeline::db;
use dsw_pipeline::services::notification_dispatcher::DispatchStatus;
use dsw_pipeline::services::spike_detector::build_alerts;
use dsw_pipeline::{LedgerAvailability, NotificationLedger, Repository};
use helpers::{create_test_repository, event_at, post, store_event, subscriber, Harness};

#[tokio::test]
async fn concurrent_verification_has_one_winner() {
    let (_temp_dir, store) = create_test_repository().await.unwrap();
    let event = event_at("Penang", Utc::now(), 0.5);
    store_event(&*store, &event).await;

    let mut handles = Vec::new();
    for worker in 0..8 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .mark_event_verified(event.id, &format!("feed-{}", worker), Utc::now())
                .await
                .unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert!(!store.mark_event_verified(event.id, "late", Utc::now()).await.unwrap());
}

#[tokio::test]
async fn concurrent_ledger_claims_have_one_winner() {
    let (_temp_dir, store) = create_test_repository().await.unwrap();
    let subject = Uuid::new_v4();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .claim(subject, NotificationKind::DisasterAlert, Utc::now())
                .await
                .unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    let entries = db::ledger::count_entries(store.pool(), subject, NotificationKind::DisasterAlert)
        .await
        .unwrap();
    assert_eq!(entries, 1);

    // Same subject, different kind is its own gate
    assert!(store
        .claim(subject, NotificationKind::EmergencyAlert, Utc::now())
        .await
        .unwrap());
}

#[tokio::test]
async fn alert_flip_happens_once() {
    let (_temp_dir, store) = create_test_repository().await.unwrap();
    let now = Utc::now();
    let first = event_at("Ipoh", now, 0.5);
    let second = event_at("Ipoh", now, 0.5);
    store_event(&*store, &first).await;
    store_event(&*store, &second).await;
    let alert = dsw_common::models::Alert::new("Ipoh".to_string(), 0.7, vec![first.id, second.id], now);
    store.save_alert(&alert).await.unwrap();

    let flipped = store.mark_alerts_verified_for_event(first.id, now).await.unwrap();
    let again = store.mark_alerts_verified_for_event(second.id, now).await.unwrap();

    assert_eq!(flipped, vec![alert.id]);
    assert!(again.is_empty());
    assert_eq!(db::alerts::count_alerts(store.pool()).await.unwrap(), 1);
}

#[tokio::test]
async fn alert_saved_after_its_event_was_verified_is_verified() {
    let (_temp_dir, store) = create_test_repository().await.unwrap();
    let now = Utc::now();
    for minutes in [1, 2, 3] {
        store_event(&*store, &event_at("Penang", now - Duration::minutes(minutes), 0.5)).await;
    }
    let snapshot = store.events_between(now - Duration::minutes(10), now).await.unwrap();

    // Matcher runs between the window read and the alert save
    assert!(store.mark_event_verified(snapshot[0].id, "bomba", now).await.unwrap());
    assert!(store.mark_alerts_verified_for_event(snapshot[0].id, now).await.unwrap().is_empty());

    let alerts = build_alerts(&snapshot, now);
    assert_eq!(alerts.len(), 1);
    assert!(!alerts[0].verified);
    let verified_at = store.save_alert(&alerts[0]).await.unwrap();

    assert!(verified_at.is_some());
    let stored = store.get_alert(alerts[0].id).await.unwrap().unwrap();
    assert!(stored.verified);
    assert!(stored.verified_at.is_some());
    assert_eq!(store.alerts_verified_since(now - Duration::seconds(1)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn identical_event_insert_is_refused() {
    let (_temp_dir, store) = create_test_repository().await.unwrap();
    let now = Utc::now();
    let original = event_at("Kuantan", now, 0.5);
    let copy = dsw_common::models::Event {
        id: Uuid::new_v4(),
        ..original.clone()
    };
    let other_author = dsw_common::models::Event {
        id: Uuid::new_v4(),
        author: "someone-else".to_string(),
        ..original.clone()
    };
    let since = now - Duration::hours(24);

    assert!(store.save_event(&original, since).await.unwrap());
    assert!(!store.save_event(&copy, since).await.unwrap());
    assert!(store.save_event(&other_author, since).await.unwrap());
    assert!(store.get_event(copy.id).await.unwrap().is_none());
    assert_eq!(db::events::count_events(store.pool()).await.unwrap(), 2);
}

#[tokio::test]
async fn missing_ledger_table_is_reported_and_fails_open() {
    let harness = Harness::new().await;
    harness
        .add_subscriber(&subscriber(
            "amy",
            ChannelType::Email,
            Preferences {
                disaster_alerts: true,
                ..Default::default()
            },
            None,
        ))
        .await;
    sqlx::query("DROP TABLE notification_ledger")
        .execute(harness.store.pool())
        .await
        .unwrap();

    match harness.ledger.availability().await {
        LedgerAvailability::Unavailable(reason) => assert!(reason.contains("notification_ledger")),
        LedgerAvailability::Available => panic!("ledger reported available without its table"),
    }

    let alert = dsw_common::models::Alert::new("Penang".to_string(), 0.5, Vec::new(), Utc::now());
    let dispatcher = harness.dispatcher();
    let first = dispatcher.dispatch_alert(&alert).await;
    let second = dispatcher.dispatch_alert(&alert).await;

    assert_eq!(first.status, DispatchStatus::Sent);
    assert_eq!(second.status, DispatchStatus::Sent);
    assert!(first.fail_open && second.fail_open);
    assert_eq!(harness.email.count(), 2);
}

#[tokio::test]
async fn expired_ledger_entries_are_purged() {
    let (_temp_dir, store) = create_test_repository().await.unwrap();
    let now = Utc::now();
    let old_sent = now - Duration::days(31);
    let stale = LedgerEntry {
        subject_id: Uuid::new_v4(),
        kind: NotificationKind::DisasterAlert,
        sent_at: old_sent,
        recipient_count: 2,
        successful: 2,
        failed: 0,
        ttl: LedgerEntry::expiry_for(old_sent),
    };
    let fresh = LedgerEntry {
        subject_id: Uuid::new_v4(),
        sent_at: now,
        ttl: LedgerEntry::expiry_for(now),
        ..stale.clone()
    };
    store.record(&stale).await.unwrap();
    store.record(&fresh).await.unwrap();

    assert_eq!(store.purge_expired(now).await.unwrap(), 1);
    assert!(store.find(stale.subject_id, stale.kind).await.unwrap().is_none());
    let kept = store.find(fresh.subject_id, fresh.kind).await.unwrap().unwrap();
    assert_eq!(kept.recipient_count, 2);
}

#[tokio::test]
async fn posts_and_verifications_are_stored_once() {
    let (_temp_dir, store) = create_test_repository().await.unwrap();

    let report = post("Flood near the river", Some("Kuantan"), "amy");
    store.save_post(&report).await.unwrap();
    store.save_post(&report).await.unwrap();
    let loaded = db::posts::load_post(store.pool(), report.id).await.unwrap().unwrap();
    assert_eq!(loaded.text, report.text);
    assert_eq!(loaded.location.as_deref(), Some("Kuantan"));

    let verification = Verification {
        id: Uuid::new_v4(),
        source: "met".to_string(),
        kind: "flood".to_string(),
        location: "Kuantan".to_string(),
        text: "Flood warning".to_string(),
        confidence: 0.9,
        timestamp: Utc::now(),
        matched_event_id: None,
        fingerprint: "abc123".to_string(),
    };
    assert!(store.save_verification(&verification).await.unwrap());
    let replay = Verification {
        id: Uuid::new_v4(),
        ..verification.clone()
    };
    assert!(!store.save_verification(&replay).await.unwrap());
    assert_eq!(db::verifications::count_verifications(store.pool()).await.unwrap(), 1);
}

#[tokio::test]
async fn duplicate_lookup_respects_the_cutoff() {
    let (_temp_dir, store) = create_test_repository().await.unwrap();
    let now = Utc::now();
    let mut event = event_at("Melaka", now, 0.5);
    event.created_at = now - Duration::hours(25);
    store_event(&*store, &event).await;

    let recent = store
        .has_recent_duplicate(&event.author, &event.text, now - Duration::hours(24))
        .await
        .unwrap();
    assert!(!recent);
    let wider = store
        .has_recent_duplicate(&event.author, &event.text, now - Duration::hours(26))
        .await
        .unwrap();
    assert!(wider);
    assert_eq!(db::events::count_events(store.pool()).await.unwrap(), 1);
}
