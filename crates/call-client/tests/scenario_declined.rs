//! Vendor declines an incoming call from the badge before joining media.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use call_client::coordinator::{CallPhase, CallRequest, Outcome, StatusEvent};
use call_client::models::{Medium, SessionStatus};
use call_client::service::{ServiceCall, ServiceOp};
use call_client::surfaces::{BadgeChange, CallModal, IncomingCallBadge, ModalHost, ModalView};
use call_test_utils::{MockBackend, TestClient, BUYER_EMAIL, VENDOR_EMAIL};

#[tokio::test(start_paused = true)]
async fn test_vendor_declines_before_joining() {
    let backend = MockBackend::new();
    let mut buyer = TestClient::spawn(&backend, BUYER_EMAIL).await;
    let vendor = TestClient::spawn(&backend, VENDOR_EMAIL).await;

    let mut host = ModalHost::new(buyer.handle.clone()).await.unwrap();
    let mut badge = IncomingCallBadge::mount(vendor.handle.clone()).await.unwrap();

    let session = buyer
        .handle
        .initiate(CallRequest::new(VENDOR_EMAIL, Medium::Voice))
        .await
        .unwrap();
    let room = session.room_name.clone();

    // Buyer's voice modal mounts and waits
    let mut modal: CallModal = host.next_opened().await.unwrap();
    assert_eq!(modal.medium(), Medium::Voice);
    assert_eq!(modal.view(), &ModalView::Connecting);

    // Vendor sees the badge and declines
    assert!(matches!(
        badge.next_change().await.unwrap(),
        BadgeChange::Ringing(_)
    ));
    badge.decline().await.unwrap();
    assert!(badge.ringing().is_none());
    assert_eq!(
        vendor.handle.snapshot().await.unwrap().phase,
        CallPhase::Idle
    );

    // Buyer hears about it once the registry took the reject
    let terminal = buyer.wait_finished().await;
    assert_eq!(terminal.outcome, Outcome::Declined);

    // Reject sent, media never touched on the vendor side
    assert!(backend.registry().calls().contains(&ServiceCall::Reject {
        id: session.id,
        callee_email: VENDOR_EMAIL.to_string(),
    }));
    assert_eq!(backend.registry().call_count(ServiceOp::End), 0);
    assert_eq!(vendor.media.join_count(), 0);
    assert_eq!(
        backend.registry().status_of(session.id),
        Some(SessionStatus::Rejected)
    );

    // Buyer's modal shows the decline and closes by itself
    let view = modal.next_view().await.unwrap();
    assert_eq!(view.banner(), Some("vendor@shop.test declined the call"));
    assert!(!buyer.media.is_capturing(&room));

    tokio::time::advance(Duration::from_secs(3)).await;
    assert_eq!(modal.next_view().await, Some(ModalView::Closed));
    buyer
        .wait_for(|e| matches!(e, StatusEvent::Cleared { .. }))
        .await;
    assert_eq!(buyer.handle.snapshot().await.unwrap().phase, CallPhase::Idle);

    // The buyer never ended the call; the decline was the vendor's
    assert_eq!(backend.registry().call_count(ServiceOp::End), 0);
}

#[tokio::test]
async fn test_decline_survives_registry_failure() {
    let backend = MockBackend::new();
    backend.registry().set_failing(ServiceOp::Reject, true);
    let buyer = TestClient::spawn(&backend, BUYER_EMAIL).await;
    let mut vendor = TestClient::spawn(&backend, VENDOR_EMAIL).await;

    let session = buyer
        .handle
        .initiate(CallRequest::new(VENDOR_EMAIL, Medium::Video))
        .await
        .unwrap();
    vendor
        .wait_for(|e| matches!(e, StatusEvent::IncomingCall { .. }))
        .await;

    vendor.handle.decline(&session.room_name).await.unwrap();
    assert_eq!(
        vendor.wait_finished().await.outcome,
        Outcome::Declined
    );
    assert_eq!(vendor.media.join_count(), 0);
}
