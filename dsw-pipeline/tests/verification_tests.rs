//! Verification matcher integration tests

mod helpers;

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio_util::sync::CancellationToken;

use dsw_common::models::{ChannelType, NotificationKind, Preferences};
use dsw_common::time::{from_epoch_millis, to_epoch_millis};
use dsw_pipeline::adapters::ConfirmationFeed;
use dsw_pipeline::services::verification_matcher::fingerprint;
use dsw_pipeline::{NotificationLedger, Repository};
use helpers::{count_rows, event_at, feed_item, store_event, subscriber, Harness, ScriptedFeed};

/// Millisecond-aligned timestamp, matching what the store keeps
fn aligned(ts: DateTime<Utc>) -> DateTime<Utc> {
    from_epoch_millis(to_epoch_millis(ts))
}

fn verification_watcher() -> Preferences {
    Preferences {
        verifications: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn scenario_d_confirmation_verifies_events_and_alert() {
    let harness = Harness::new().await;
    harness
        .add_subscriber(&subscriber("ops", ChannelType::Email, verification_watcher(), None))
        .await;

    let t0 = aligned(Utc::now() - Duration::hours(1));
    let mut events = Vec::new();
    for minutes in [0, 2, 4] {
        let event = event_at("Penang", t0 + Duration::minutes(minutes), 0.5);
        store_event(&*harness.repository, &event).await;
        events.push(event);
    }
    let alerts = harness
        .spike_detector()
        .detect(t0 + Duration::minutes(5))
        .await
        .unwrap();
    assert_eq!(alerts.len(), 1);
    let alert_id = alerts[0].id;

    let feed: Arc<dyn ConfirmationFeed> = Arc::new(ScriptedFeed::new(
        "bomba",
        vec![feed_item("Penang", "Fire confirmed at the Penang night market", t0 + Duration::minutes(30))],
    ));
    let matcher = harness.matcher(vec![feed]);

    let report = matcher.poll().await;

    assert_eq!(report.items_fetched, 1);
    assert_eq!(report.verifications_accepted, 1);
    assert_eq!(report.verifications_new, 1);
    assert_eq!(report.events_verified.len(), 3);
    assert_eq!(report.alerts_verified, vec![alert_id]);

    for event in &events {
        let stored = harness.repository.get_event(event.id).await.unwrap().unwrap();
        assert!(stored.verified);
        assert_eq!(stored.verification_source.as_deref(), Some("bomba"));
        assert_eq!(stored.verification_timestamp, Some(t0 + Duration::minutes(30)));
        assert!(harness
            .ledger
            .find(event.id, NotificationKind::Verification)
            .await
            .unwrap()
            .is_some());
    }
    let alert = harness.repository.get_alert(alert_id).await.unwrap().unwrap();
    assert!(alert.verified);
    assert!(alert.verified_at.is_some());

    assert_eq!(harness.email.count(), 3);
    assert!(harness.email.subjects().iter().all(|s| s.starts_with("[VERIFIED]")));

    let stats = harness.stats.snapshot();
    assert_eq!(stats.events_verified, 3);
    assert_eq!(stats.alerts_verified, 1);
    assert_eq!(stats.verifications_stored, 1);
}

#[tokio::test]
async fn repeated_poll_changes_nothing() {
    let harness = Harness::new().await;
    harness
        .add_subscriber(&subscriber("ops", ChannelType::Email, verification_watcher(), None))
        .await;
    let t0 = aligned(Utc::now() - Duration::minutes(40));
    let event = event_at("Kuantan", t0, 0.6);
    store_event(&*harness.repository, &event).await;

    let feed: Arc<dyn ConfirmationFeed> = Arc::new(ScriptedFeed::new(
        "met",
        vec![feed_item("Kuantan", "Flood warning for Kuantan district", t0 + Duration::minutes(20))],
    ));
    let matcher = harness.matcher(vec![feed]);

    let first = matcher.poll().await;
    let second = matcher.poll().await;

    assert_eq!(first.events_verified, vec![event.id]);
    assert_eq!(second.verifications_accepted, 1);
    assert_eq!(second.verifications_new, 0);
    assert!(second.events_verified.is_empty());
    assert_eq!(count_rows(harness.store.pool(), "verifications").await, 1);
    assert_eq!(harness.email.count(), 1);
}

#[tokio::test]
async fn first_confirmation_keeps_the_verification() {
    let harness = Harness::new().await;
    harness
        .add_subscriber(&subscriber("ops", ChannelType::Email, verification_watcher(), None))
        .await;
    let t0 = aligned(Utc::now() - Duration::minutes(50));
    let event = event_at("Penang", t0, 0.5);
    store_event(&*harness.repository, &event).await;

    let bomba: Arc<dyn ConfirmationFeed> = Arc::new(ScriptedFeed::new(
        "bomba",
        vec![feed_item("Penang", "Fire confirmed at the Penang night market", t0 + Duration::minutes(20))],
    ));
    let met: Arc<dyn ConfirmationFeed> = Arc::new(ScriptedFeed::new(
        "met",
        vec![feed_item("Penang", "Flood warning issued for George Town", t0 + Duration::minutes(30))],
    ));
    let report = harness.matcher(vec![bomba, met]).poll().await;

    assert_eq!(report.verifications_new, 2);
    assert_eq!(report.events_verified, vec![event.id]);
    let stored = harness.repository.get_event(event.id).await.unwrap().unwrap();
    assert_eq!(stored.verification_source.as_deref(), Some("bomba"));
    assert_eq!(stored.verification_timestamp, Some(t0 + Duration::minutes(20)));
    assert_eq!(count_rows(harness.store.pool(), "verifications").await, 2);
    assert_eq!(harness.email.count(), 1);
    assert_eq!(harness.stats.snapshot().events_verified, 1);
}

#[tokio::test]
async fn two_hour_window_is_inclusive() {
    let harness = Harness::new().await;
    let confirmed_at = aligned(Utc::now());

    let at_edge = event_at("Ipoh", confirmed_at - Duration::hours(2), 0.5);
    let too_old = event_at("Ipoh", confirmed_at - Duration::hours(2) - Duration::seconds(1), 0.5);
    let after = event_at("Ipoh", confirmed_at + Duration::seconds(1), 0.5);
    for event in [&at_edge, &too_old, &after] {
        store_event(&*harness.repository, event).await;
    }

    let feed: Arc<dyn ConfirmationFeed> = Arc::new(ScriptedFeed::new(
        "met",
        vec![feed_item("ipoh", "Landslide confirmed on the Ipoh bypass", confirmed_at)],
    ));
    let report = harness.matcher(vec![feed]).poll().await;

    assert_eq!(report.events_verified, vec![at_edge.id]);
    for event in [&too_old, &after] {
        let stored = harness.repository.get_event(event.id).await.unwrap().unwrap();
        assert!(!stored.verified);
    }
}

#[tokio::test]
async fn other_locations_are_untouched() {
    let harness = Harness::new().await;
    let now = aligned(Utc::now());
    let event = event_at("Kuching", now - Duration::minutes(10), 0.5);
    store_event(&*harness.repository, &event).await;

    let feed: Arc<dyn ConfirmationFeed> = Arc::new(ScriptedFeed::new(
        "met",
        vec![feed_item("Sibu", "Flood warning issued", now)],
    ));
    let report = harness.matcher(vec![feed]).poll().await;

    assert_eq!(report.verifications_new, 1);
    assert!(report.events_verified.is_empty());
}

#[tokio::test]
async fn items_without_keywords_are_ignored() {
    let harness = Harness::new().await;
    let now = aligned(Utc::now());
    let event = event_at("Penang", now - Duration::minutes(10), 0.5);
    store_event(&*harness.repository, &event).await;

    let feed: Arc<dyn ConfirmationFeed> = Arc::new(ScriptedFeed::new(
        "council",
        vec![feed_item("Penang", "Road resurfacing scheduled for Sunday", now)],
    ));
    let report = harness.matcher(vec![feed]).poll().await;

    assert_eq!(report.items_fetched, 1);
    assert_eq!(report.verifications_accepted, 0);
    assert_eq!(count_rows(harness.store.pool(), "verifications").await, 0);
    assert!(!harness.repository.get_event(event.id).await.unwrap().unwrap().verified);
}

#[tokio::test]
async fn broken_feed_does_not_stop_the_others() {
    let harness = Harness::new().await;
    let now = aligned(Utc::now());
    let event = event_at("Melaka", now - Duration::minutes(15), 0.5);
    store_event(&*harness.repository, &event).await;

    let broken: Arc<dyn ConfirmationFeed> = Arc::new(ScriptedFeed::broken("seismic"));
    let good: Arc<dyn ConfirmationFeed> = Arc::new(ScriptedFeed::new(
        "met",
        vec![feed_item("Melaka", "Flash flood warning for Melaka", now)],
    ));
    let report = harness.matcher(vec![broken, good]).poll().await;

    assert_eq!(report.feed_failures, 1);
    assert_eq!(report.events_verified, vec![event.id]);
}

#[tokio::test]
async fn stored_verification_records_kind_and_match() {
    let harness = Harness::new().await;
    let now = aligned(Utc::now());
    let event = event_at("Kota Bharu", now - Duration::minutes(5), 0.5);
    store_event(&*harness.repository, &event).await;

    let mut item = feed_item("Kota Bharu", "Banjir amaran: flood waters rising in Kota Bharu", now);
    let feed: Arc<dyn ConfirmationFeed> = Arc::new(ScriptedFeed::new("met", vec![item.clone()]));
    harness.matcher(vec![feed]).poll().await;

    item.source = "met".to_string();
    let stored = dsw_pipeline::db::verifications::load_by_fingerprint(harness.store.pool(), &fingerprint(&item))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.kind, "flood");
    assert_eq!(stored.location, "Kota Bharu");
    assert_eq!(stored.matched_event_id, Some(event.id));
}

#[tokio::test]
async fn run_loop_stops_on_cancellation() {
    let harness = Harness::new().await;
    let feed = Arc::new(ScriptedFeed::new("met", Vec::new()));
    let matcher = Arc::new(harness.matcher(vec![feed.clone() as Arc<dyn ConfirmationFeed>]));
    let cancel = CancellationToken::new();

    let task = tokio::spawn(matcher.run(StdDuration::from_millis(20), cancel.clone()));
    tokio::time::sleep(StdDuration::from_millis(60)).await;
    cancel.cancel();

    tokio::time::timeout(StdDuration::from_secs(2), task)
        .await
        .expect("matcher did not stop")
        .unwrap();
    assert!(harness.stats.snapshot().last_verification_poll_at.is_some());
}
