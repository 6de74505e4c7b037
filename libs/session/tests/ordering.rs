mod common;

use std::time::Duration;

use chatlink_core::VisitorProfile;
use chatlink_testutil::{FakeRuntimeFactory, LoadMode, envelope_contains_text, eventually};
use common::harness;
use serde_json::json;

#[tokio::test]
async fn sends_issued_before_load_reach_the_runtime_in_issue_order() {
    let h = harness(FakeRuntimeFactory::new().with_load_mode(LoadMode::Manual));
    h.start();
    let runtime = h.wait_runtime(1).await;

    h.session.set_device_token("t1");
    h.session.open_faq_article("billing");
    h.session.set_device_token("t2");
    h.session.open_faq();
    h.session.set_device_token("t3");

    eventually(|| runtime.load_pending()).await;
    assert!(runtime.sent().is_empty());
    assert!(runtime.complete_load(Ok(())));

    eventually(|| runtime.sent().len() == 6).await;
    assert_eq!(
        runtime.sent_actions(),
        vec![
            "startSession",
            "setDeviceToken",
            "openFAQ",
            "setDeviceToken",
            "openFAQ",
            "setDeviceToken",
        ]
    );
    let payloads: Vec<_> = runtime
        .sent()
        .into_iter()
        .skip(1)
        .map(|envelope| envelope.get("payload").cloned())
        .collect();
    assert_eq!(
        payloads,
        vec![
            Some(json!("t1")),
            Some(json!({"article": "billing"})),
            Some(json!("t2")),
            None,
            Some(json!("t3")),
        ]
    );
}

#[tokio::test]
async fn presenting_during_load_does_not_overtake_earlier_sends() {
    let h = harness(FakeRuntimeFactory::new().with_load_mode(LoadMode::Manual));
    h.start();
    let runtime = h.wait_runtime(1).await;

    h.session.open_faq();
    h.session.present(None);
    h.session.set_device_token("t1");
    eventually(|| h.session.is_chat_visible()).await;

    eventually(|| runtime.load_pending()).await;
    runtime.complete_load(Ok(()));
    eventually(|| runtime.sent().len() == 4).await;
    assert_eq!(
        runtime.sent_actions(),
        vec!["startSession", "openFAQ", "setClosable", "setDeviceToken"]
    );
}

#[tokio::test]
async fn visitor_data_set_before_restore_is_sent_once_after_start_session() {
    let h = harness(FakeRuntimeFactory::new().with_load_mode(LoadMode::Manual));
    h.start();
    h.session
        .set_visitor_data(VisitorProfile::default().with_name("Bob"), None);
    let runtime = h.wait_runtime(1).await;

    eventually(|| runtime.load_pending()).await;
    runtime.complete_load(Ok(()));
    h.wait_restored().await;
    eventually(|| runtime.sent().len() >= 2).await;

    let actions = runtime.sent_actions();
    let visitor_sends = runtime.sent_with_action("setVisitorData");
    assert_eq!(visitor_sends.len(), 1);
    assert!(envelope_contains_text(&visitor_sends[0], "Bob"));
    let start = actions.iter().position(|a| a == "startSession").unwrap();
    let visitor = actions.iter().position(|a| a == "setVisitorData").unwrap();
    assert!(start < visitor);
}

#[tokio::test]
async fn visitor_data_after_restore_is_forwarded_immediately_with_hash() {
    let h = harness(FakeRuntimeFactory::new());
    let runtime = h.start_restored().await;

    h.session.set_visitor_data(
        VisitorProfile::default().with_email("bob@example.com"),
        Some("sig".into()),
    );
    eventually(|| runtime.sent_with_action("setVisitorData").len() == 1).await;
    assert_eq!(
        runtime.sent_with_action("setVisitorData")[0]["payload"],
        json!({"visitor": {"email": "bob@example.com"}, "hash": "sig"})
    );
}

#[tokio::test]
async fn credentials_travel_with_the_restore_handshake() {
    let h = harness(FakeRuntimeFactory::new());
    h.configure();
    h.session
        .start_session(Some(chatlink_core::Credentials::new("user-1", "signed")));
    h.wait_restored().await;

    let start = &h.runtime().sent_with_action("startSession")[0];
    assert_eq!(start["payload"], json!({"id": "user-1", "token": "signed"}));
    assert!(start["requestId"].is_string());
}

#[tokio::test]
async fn confirmed_bot_start_is_not_replayed_by_a_later_restore() {
    tokio::time::pause();
    let h = harness(FakeRuntimeFactory::new().with_load_mode(LoadMode::Manual));
    h.start();
    h.session.start_bot("b1");
    let first = h.wait_runtime(1).await;
    eventually(|| first.load_pending()).await;
    first.complete_load(Ok(()));
    h.wait_restored().await;

    eventually(|| first.sent_with_action("startBot").len() == 1).await;
    assert_eq!(first.sent_with_action("startBot")[0]["payload"]["id"], "b1");

    first.emit("chat.start", None);
    eventually(|| h.delegate.count(&chatlink_testutil::DelegateEvent::Started) == 1).await;

    // Idle reclaim, then a presentation reloads and restores a fresh runtime.
    tokio::time::sleep(Duration::from_secs(10 * 60 + 1)).await;
    eventually(|| first.is_torn_down()).await;
    h.session.present(None);
    let second = h.wait_runtime(2).await;
    eventually(|| second.load_pending()).await;
    second.complete_load(Ok(()));
    h.wait_restored().await;

    eventually(|| second.sent_with_action("startSession").len() == 1).await;
    assert!(second.sent_with_action("startBot").is_empty());
}

#[tokio::test]
async fn unconfirmed_bot_start_is_replayed_after_reload() {
    tokio::time::pause();
    let h = harness(FakeRuntimeFactory::new());
    let first = h.start_restored().await;
    h.session.start_bot("b2");
    eventually(|| first.sent_with_action("startBot").len() == 1).await;

    tokio::time::sleep(Duration::from_secs(10 * 60 + 1)).await;
    eventually(|| first.is_torn_down()).await;
    h.session.present(None);
    let second = h.wait_runtime(2).await;
    h.wait_restored().await;

    eventually(|| second.sent_with_action("startBot").len() == 1).await;
    let actions = second.sent_actions();
    let start = actions.iter().position(|a| a == "startSession").unwrap();
    let bot = actions.iter().position(|a| a == "startBot").unwrap();
    assert!(start < bot);
}
