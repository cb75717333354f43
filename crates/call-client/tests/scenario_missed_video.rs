//! Buyer starts a video call that nobody answers.
//!
//! After the no-answer timeout the buyer's call is missed, the registry is
//! told so, the buyer leaves the room, and the vendor's badge goes away.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use call_client::coordinator::{
    CallCoordinator, CallPhase, CallRequest, CoordinatorSettings, Outcome, StatusEvent,
};
use call_client::models::{EndReason, Medium};
use call_client::service::{CallServiceClient, ServiceOp};
use call_client::surfaces::{BadgeChange, IncomingCallBadge};
use call_test_utils::{
    MockBackend, MockMediaTransport, MockRegistry, TestClient, TestSession, BUYER_EMAIL,
    VENDOR_EMAIL,
};
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn test_unanswered_video_call_is_missed_on_both_sides() {
    let backend = MockBackend::new();
    let mut buyer = TestClient::spawn(&backend, BUYER_EMAIL).await;
    let mut vendor = TestClient::spawn(&backend, VENDOR_EMAIL).await;
    let mut badge = IncomingCallBadge::mount(vendor.handle.clone()).await.unwrap();

    let session = buyer
        .handle
        .initiate(CallRequest::new(VENDOR_EMAIL, Medium::Video))
        .await
        .unwrap();
    let room = session.room_name.clone();
    assert!(buyer.media.joins().first().unwrap().tracks.video);

    // Vendor's badge shows the call
    match badge.next_change().await.unwrap() {
        BadgeChange::Ringing(call) => assert_eq!(call.room(), &room),
        other => panic!("unexpected badge change {other:?}"),
    }

    // Nothing for 29 seconds
    tokio::time::advance(Duration::from_secs(29)).await;
    assert_eq!(
        buyer.handle.snapshot().await.unwrap().phase,
        CallPhase::Ringing
    );

    tokio::time::advance(Duration::from_secs(2)).await;

    let terminal = buyer.wait_finished().await;
    assert_eq!(terminal.outcome, Outcome::Missed);
    assert_eq!(terminal.message.as_deref(), Some("No answer"));
    assert!(!buyer.media.is_capturing(&room));

    // The terminal push clears the vendor side without joining media
    let vendor_end = vendor.wait_finished().await;
    assert_eq!(backend.registry().end_reasons(), vec![EndReason::Missed]);
    assert_eq!(vendor_end.outcome, Outcome::Missed);
    assert_eq!(
        vendor_end.message.as_deref(),
        Some("Missed call from buyer@market.test")
    );
    match badge.next_change().await.unwrap() {
        BadgeChange::Cleared { room: cleared } => assert_eq!(cleared, room),
        other => panic!("unexpected badge change {other:?}"),
    }
    assert_eq!(vendor.media.join_count(), 0);

    // Both slots release after the auto-close delay
    tokio::time::advance(Duration::from_secs(3)).await;
    buyer
        .wait_for(|e| matches!(e, StatusEvent::Cleared { .. }))
        .await;
    vendor
        .wait_for(|e| matches!(e, StatusEvent::Cleared { .. }))
        .await;

    // A late remote join no longer matters
    buyer.media.participant_joins(&room, VENDOR_EMAIL).await;
    assert_eq!(backend.registry().call_count(ServiceOp::End), 1);
    assert_eq!(buyer.handle.snapshot().await.unwrap().phase, CallPhase::Idle);
}

#[tokio::test]
async fn test_missed_call_reaches_registry_over_http() {
    let registry = MockRegistry::start().await;
    let session = TestSession::new(41, Medium::Video).with_access_token("caller-grant-41");
    registry.on_initiate(&session).await;
    // A slow registry must not hold the camera open
    registry
        .expect_session_end_after(&session, "missed", 1, Duration::from_secs(2))
        .await;

    let client = CallServiceClient::new(&registry.uri(), None, Duration::from_secs(5)).unwrap();
    let media = Arc::new(MockMediaTransport::new());
    let (handle, _task) = CallCoordinator::spawn(
        CoordinatorSettings {
            local_email: BUYER_EMAIL.to_string(),
            no_answer_timeout: Duration::from_millis(200),
            terminal_auto_close: Duration::from_millis(100),
        },
        Arc::new(client),
        media.clone(),
        CancellationToken::new(),
    );
    let mut events = handle.subscribe().await.unwrap();

    let opened = handle
        .initiate(CallRequest::new(VENDOR_EMAIL, Medium::Video))
        .await
        .unwrap();
    assert_eq!(opened.room_name.as_str(), "room-41");
    assert_eq!(media.joins().first().unwrap().credential, "caller-grant-41");

    let terminal = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if let Some(StatusEvent::Finished { terminal, .. }) = events.recv().await {
                return terminal;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(terminal.outcome, Outcome::Missed);
    assert!(!media.any_capturing());

    let end = registry
        .wait_for_request("/api/calls/41/end")
        .await
        .expect("end request sent");
    assert_eq!(end["email"], BUYER_EMAIL);
    assert_eq!(end["reason"], "missed");
}
