mod common;

use std::sync::Arc;

use chatlink_core::{BannerContent, BannerOutcome, PushNotification};
use chatlink_session::{PushCorrelator, PushDisposition};
use chatlink_testutil::{DelegateEvent, FakeRuntimeFactory, ScriptedBanner, eventually, settle};
use common::harness;
use serde_json::{Value, json};

fn notification(value: Value) -> PushNotification {
    match value {
        Value::Object(map) => PushNotification::new(map),
        other => panic!("fixture must be an object, got {other}"),
    }
}

fn operator_push() -> PushNotification {
    notification(json!({
        "operator": {"id": "op-1", "name": "Ann", "image": "https://img.example/ann.png"},
        "message": "Are you still there?"
    }))
}

#[tokio::test]
async fn foreign_pushes_are_left_alone() {
    let h = harness(FakeRuntimeFactory::new());
    h.start_restored().await;
    let correlator = PushCorrelator::new(h.session.clone());
    let push = notification(json!({"aps": {"alert": "Sale!"}}));

    assert!(!correlator.is_widget_push(&push));
    assert!(correlator.should_display_alert(&push));
    assert_eq!(
        correlator.on_notification_opened(&push, None),
        PushDisposition::NotOurs
    );
    settle().await;
    assert_eq!(h.host.presents(), 0);
}

#[tokio::test]
async fn opening_a_widget_push_presents_the_chat() {
    let h = harness(FakeRuntimeFactory::new());
    h.start_restored().await;
    let correlator = PushCorrelator::new(h.session.clone());

    assert_eq!(
        correlator.on_notification_opened(&operator_push(), None),
        PushDisposition::Presented
    );
    eventually(|| h.session.is_chat_visible()).await;
    assert_eq!(h.host.presents(), 1);
}

#[tokio::test]
async fn pushes_without_a_session_are_not_acted_on() {
    let h = harness(FakeRuntimeFactory::new());
    h.configure();
    let correlator = PushCorrelator::new(h.session.clone());

    assert_eq!(
        correlator.on_notification_opened(&operator_push(), None),
        PushDisposition::SessionInactive
    );
}

#[tokio::test]
async fn tapped_banner_presents_the_chat() {
    let h = harness(FakeRuntimeFactory::new());
    h.start_restored().await;
    let banner = Arc::new(ScriptedBanner::new(BannerOutcome::Tapped));
    let correlator = PushCorrelator::new(h.session.clone()).with_banner(banner.clone());

    let disposition = correlator.handle_foreground(&operator_push(), None).await;
    assert_eq!(disposition, PushDisposition::Presented);
    eventually(|| h.session.is_chat_visible()).await;

    assert_eq!(
        banner.shown(),
        vec![BannerContent {
            title: "Ann".into(),
            body: Some("Are you still there?".into()),
            image: Some("https://img.example/ann.png".into()),
        }]
    );
    assert_eq!(h.delegate.count(&DelegateEvent::Presented), 1);
}

#[tokio::test]
async fn dismissed_banner_leaves_the_chat_hidden() {
    let h = harness(FakeRuntimeFactory::new());
    h.start_restored().await;
    let banner = Arc::new(ScriptedBanner::new(BannerOutcome::Dismissed));
    let correlator = PushCorrelator::new(h.session.clone()).with_banner(banner);

    let push = notification(json!({
        "operator": {"id": "op-1", "name": "Ann", "image": ""}
    }))
    .with_body("New message");
    assert_eq!(
        correlator.handle_foreground(&push, None).await,
        PushDisposition::BannerDismissed
    );
    settle().await;
    assert!(!h.session.is_chat_visible());
}

#[tokio::test]
async fn foreground_push_needs_a_banner_and_a_valid_payload() {
    let h = harness(FakeRuntimeFactory::new());
    h.start_restored().await;

    let plain = PushCorrelator::new(h.session.clone());
    assert_eq!(
        plain.handle_foreground(&operator_push(), None).await,
        PushDisposition::NoBanner
    );

    let banner = Arc::new(ScriptedBanner::new(BannerOutcome::Tapped));
    let with_banner = PushCorrelator::new(h.session.clone()).with_banner(banner.clone());
    let broken = notification(json!({"operator": {"id": "op-1"}}));
    assert_eq!(
        with_banner.handle_foreground(&broken, None).await,
        PushDisposition::Unparseable
    );
    assert!(banner.shown().is_empty());
}

#[tokio::test]
async fn visible_chat_suppresses_widget_alerts() {
    let h = harness(FakeRuntimeFactory::new());
    h.start_restored().await;
    let banner = Arc::new(ScriptedBanner::new(BannerOutcome::Tapped));
    let correlator = PushCorrelator::new(h.session.clone()).with_banner(banner.clone());
    assert!(correlator.should_display_alert(&operator_push()));

    h.session.present(None);
    eventually(|| h.session.is_chat_visible()).await;

    assert!(!correlator.should_display_alert(&operator_push()));
    assert_eq!(
        correlator.handle_foreground(&operator_push(), None).await,
        PushDisposition::ChatVisible
    );
    assert!(banner.shown().is_empty());
}

#[tokio::test]
async fn racing_presents_end_in_one_presentation() {
    let h = harness(FakeRuntimeFactory::new());
    h.start_restored().await;
    let correlator = PushCorrelator::new(h.session.clone());

    h.session.present(None);
    assert_eq!(
        correlator.on_notification_opened(&operator_push(), None),
        PushDisposition::Presented
    );
    eventually(|| h.session.is_chat_visible()).await;
    settle().await;

    assert_eq!(h.host.presents(), 1);
    assert_eq!(h.delegate.count(&DelegateEvent::Presented), 1);
}
