//! Buyer calls vendor by voice, vendor answers, vendor hangs up.
//!
//! Both coordinators share one backend; each has its own media transport.
//! The second test routes pushes through the STOMP broker and real
//! Notification Transports instead of delivering them directly.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use call_client::coordinator::{CallPhase, CallRequest, Outcome, StatusEvent};
use call_client::models::{EndReason, Medium};
use call_client::service::{EndTarget, ServiceCall, ServiceOp};
use call_client::transport::ConnectionState;
use call_test_utils::{
    MockBackend, MockSignalingServer, TestClient, BUYER_EMAIL, VENDOR_EMAIL,
};

async fn run_voice_call(buyer: &mut TestClient, vendor: &mut TestClient, backend: &MockBackend) {
    // Buyer places the call
    let session = buyer
        .handle
        .initiate(CallRequest::new(VENDOR_EMAIL, Medium::Voice))
        .await
        .unwrap();
    let room = session.room_name.clone();
    assert_eq!(
        buyer.handle.snapshot().await.unwrap().phase,
        CallPhase::Ringing
    );
    assert!(buyer.media.is_capturing(&room));

    // Vendor's client rings for the same room
    let incoming = vendor
        .wait_for(|e| matches!(e, StatusEvent::IncomingCall { .. }))
        .await;
    assert_eq!(incoming.room(), Some(&room));
    assert_eq!(vendor.media.join_count(), 0);

    // Vendor answers and joins with their own credential
    vendor.handle.accept(&room).await.unwrap();
    let vendor_join = vendor.media.joins();
    assert_eq!(vendor_join.len(), 1);
    assert!(vendor_join.first().unwrap().credential.starts_with("callee-grant-"));
    assert!(!vendor_join.first().unwrap().tracks.video);

    // Buyer learns the call was answered
    buyer
        .wait_for(|e| matches!(e, StatusEvent::Connecting { .. }))
        .await;

    // Both parties show up in each other's room
    vendor.media.participant_joins(&room, BUYER_EMAIL).await;
    buyer.media.participant_joins(&room, VENDOR_EMAIL).await;
    for client in [&mut *buyer, &mut *vendor] {
        let connected = client
            .wait_for(|e| matches!(e, StatusEvent::Connected { .. }))
            .await;
        assert!(matches!(
            connected,
            StatusEvent::Connected { participants: 1, .. }
        ));
    }

    // Vendor hangs up
    vendor.handle.hang_up(&room).await.unwrap();

    let vendor_end = vendor.wait_finished().await;
    assert_eq!(vendor_end.outcome, Outcome::Ended);
    let buyer_end = buyer.wait_finished().await;
    assert_eq!(buyer_end.outcome, Outcome::Ended);
    assert_eq!(buyer_end.message.as_deref(), Some("Call ended"));

    // Devices released on both sides
    assert!(!vendor.media.any_capturing());
    assert!(!buyer.media.any_capturing());

    // Exactly one end request, from the vendor, on the room endpoint
    assert_eq!(backend.registry().call_count(ServiceOp::End), 1);
    assert!(backend.registry().calls().contains(&ServiceCall::End {
        target: EndTarget::Room {
            room: room.clone(),
            medium: Medium::Voice,
        },
        party_email: VENDOR_EMAIL.to_string(),
        reason: EndReason::Hangup,
    }));

    // The buyer's hang-up after the fact is a no-op
    buyer.handle.hang_up(&room).await.unwrap();
    assert_eq!(backend.registry().call_count(ServiceOp::End), 1);
}

#[tokio::test]
async fn test_voice_call_answered_then_vendor_hangs_up() {
    let backend = MockBackend::new();
    let mut buyer = TestClient::spawn(&backend, BUYER_EMAIL).await;
    let mut vendor = TestClient::spawn(&backend, VENDOR_EMAIL).await;

    run_voice_call(&mut buyer, &mut vendor, &backend).await;
}

#[tokio::test]
async fn test_voice_call_over_signaling_broker() {
    let broker = MockSignalingServer::start().await;
    let backend = MockBackend::new().with_signaling(broker.pusher());
    let mut buyer = TestClient::spawn_detached(&backend, BUYER_EMAIL).await;
    let mut vendor = TestClient::spawn_detached(&backend, VENDOR_EMAIL).await;

    let (buyer_transport, _buyer_task) = buyer.attach_transport(&broker.url());
    let (vendor_transport, _vendor_task) = vendor.attach_transport(&broker.url());
    assert!(buyer_transport.wait_for(ConnectionState::Connected).await);
    assert!(vendor_transport.wait_for(ConnectionState::Connected).await);
    broker.wait_for_subscriptions(BUYER_EMAIL).await;
    broker.wait_for_subscriptions(VENDOR_EMAIL).await;

    run_voice_call(&mut buyer, &mut vendor, &backend).await;

    buyer_transport.shutdown();
    vendor_transport.shutdown();
}
