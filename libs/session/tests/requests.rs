mod common;

use std::time::Duration;

use chatlink_core::{ChatError, ChatErrorKind};
use chatlink_testutil::{FakeRuntimeFactory, LoadMode, eventually};
use common::harness;
use serde_json::json;
use tokio::time::Instant;

#[tokio::test]
async fn unread_message_is_decoded_from_the_ack() {
    let h = harness(
        FakeRuntimeFactory::new().ack(
            "getUnreadMessage",
            json!({"count": 2, "lastMessageText": "see you", "lastMessageAt": 1700000000.5}),
        ),
    );
    h.start_restored().await;

    let info = h.session.get_unread_message().await.unwrap();
    assert_eq!(info.count, 2);
    assert_eq!(info.last_message_text.as_deref(), Some("see you"));
    assert_eq!(
        info.last_message_at.map(|at| at.unix_timestamp()),
        Some(1_700_000_000)
    );
}

#[tokio::test]
async fn request_issued_during_load_is_answered_after_restore() {
    let h = harness(
        FakeRuntimeFactory::new()
            .with_load_mode(LoadMode::Manual)
            .ack("getUnreadMessage", json!({"count": 0})),
    );
    h.start();
    let runtime = h.wait_runtime(1).await;

    let session = h.session.clone();
    let request = tokio::spawn(async move { session.get_unread_message().await });
    eventually(|| runtime.load_pending()).await;
    runtime.complete_load(Ok(()));

    let info = request.await.unwrap().unwrap();
    assert_eq!(info.count, 0);
    assert_eq!(runtime.sent_actions(), vec!["startSession", "getUnreadMessage"]);
}

#[tokio::test]
async fn malformed_unread_payload_is_an_invalid_response() {
    let h = harness(FakeRuntimeFactory::new().ack("getUnreadMessage", json!({"unread": "lots"})));
    h.start_restored().await;

    let err = h.session.get_unread_message().await.unwrap_err();
    assert_eq!(err.kind(), ChatErrorKind::InvalidResponse);
}

#[tokio::test]
async fn requests_without_a_session_fail_fast() {
    let h = harness(FakeRuntimeFactory::new());
    h.configure();

    assert_eq!(
        h.session.get_unread_message().await,
        Err(ChatError::RuntimeNotReady)
    );
    assert_eq!(
        h.session.can_start_bot(None).await,
        Err(ChatError::RuntimeNotReady)
    );
    assert_eq!(h.factory.created(), 0);
}

#[tokio::test]
#[tracing_test::traced_test]
async fn unanswered_request_times_out() {
    tokio::time::pause();
    let h = harness(FakeRuntimeFactory::new());
    h.start_restored().await;

    let started = Instant::now();
    let err = h.session.get_unread_message().await.unwrap_err();
    assert_eq!(err, ChatError::Unknown("request timed out".into()));
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert!(logs_contain("request timed out without ack"));
}

#[tokio::test]
async fn ack_errors_are_reported_to_the_caller() {
    let h = harness(FakeRuntimeFactory::new().fail_ack("getUnreadMessage", json!({"code": 401})));
    h.start_restored().await;

    let err = h.session.get_unread_message().await.unwrap_err();
    assert_eq!(err.kind(), ChatErrorKind::ChatError);
    assert_eq!(err.payload().unwrap()["code"], "401");
}

#[tokio::test]
async fn outstanding_requests_fail_when_the_session_stops() {
    let h = harness(FakeRuntimeFactory::new());
    let runtime = h.start_restored().await;

    let session = h.session.clone();
    let request = tokio::spawn(async move { session.get_unread_message().await });
    eventually(|| runtime.sent_with_action("getUnreadMessage").len() == 1).await;
    h.session.stop_session(true).await;

    assert_eq!(request.await.unwrap(), Err(ChatError::RuntimeNotReady));
}

#[tokio::test]
async fn can_start_bot_accepts_boolean_and_wrapped_answers() {
    let h = harness(FakeRuntimeFactory::new().ack("canStartBot", json!(true)));
    let runtime = h.start_restored().await;
    assert_eq!(h.session.can_start_bot(Some("b1".into())).await, Ok(true));
    assert_eq!(
        runtime.sent_with_action("canStartBot")[0]["payload"],
        json!({"botId": "b1"})
    );

    let h = harness(FakeRuntimeFactory::new().ack("canStartBot", json!({"canStart": 0})));
    h.start_restored().await;
    assert_eq!(h.session.can_start_bot(None).await, Ok(false));
}

#[tokio::test]
async fn can_start_bot_rejects_unexpected_answers() {
    let h = harness(FakeRuntimeFactory::new().ack("canStartBot", json!("maybe")));
    h.start_restored().await;

    let err = h.session.can_start_bot(None).await.unwrap_err();
    assert_eq!(err.kind(), ChatErrorKind::InvalidResponse);
}

#[tokio::test]
async fn each_request_gets_its_own_reply() {
    let h = harness(
        FakeRuntimeFactory::new()
            .ack("getUnreadMessage", json!({"count": 5}))
            .ack("canStartBot", json!(false)),
    );
    let runtime = h.start_restored().await;

    let (unread, can_start) = tokio::join!(
        h.session.get_unread_message(),
        h.session.can_start_bot(None)
    );
    assert_eq!(unread.unwrap().count, 5);
    assert_eq!(can_start, Ok(false));

    let ids: Vec<_> = runtime
        .sent()
        .into_iter()
        .filter_map(|envelope| envelope["requestId"].as_str().map(str::to_string))
        .collect();
    let mut unique = ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(ids.len(), unique.len());
}
