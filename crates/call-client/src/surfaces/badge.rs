//! Incoming-call badge.

use crate::coordinator::{ActiveCall, CallCoordinatorHandle, CallPhase, StatusEvent, Subscription};
use crate::errors::CallError;
use common::types::RoomName;
use tracing::{debug, info};

/// A visible change of the badge.
#[derive(Debug, Clone)]
pub enum BadgeChange {
    /// An incoming call started ringing.
    Ringing(ActiveCall),
    /// The badge for `room` was taken down.
    Cleared { room: RoomName },
}

/// Global badge announcing the ringing incoming call.
///
/// Shown for an incoming call until it is accepted, declined, or finished
/// by either side.
pub struct IncomingCallBadge {
    handle: CallCoordinatorHandle,
    events: Subscription,
    ringing: Option<ActiveCall>,
}

impl IncomingCallBadge {
    /// Mount the badge, picking up a call that is already ringing.
    pub async fn mount(handle: CallCoordinatorHandle) -> Result<Self, CallError> {
        let events = handle.subscribe().await?;
        let snapshot = handle.snapshot().await?;
        let ringing = snapshot
            .call
            .filter(|call| !call.is_initiator && snapshot.phase == CallPhase::Ringing);

        Ok(Self {
            handle,
            events,
            ringing,
        })
    }

    /// The call the badge is showing.
    #[must_use]
    pub fn ringing(&self) -> Option<&ActiveCall> {
        self.ringing.as_ref()
    }

    /// Apply one status event. Returns the visible change, if any.
    pub fn apply(&mut self, event: &StatusEvent) -> Option<BadgeChange> {
        match event {
            StatusEvent::IncomingCall { call } => {
                self.ringing = Some(call.clone());
                Some(BadgeChange::Ringing(call.clone()))
            }
            StatusEvent::SessionOpened { .. }
            | StatusEvent::Finished { .. }
            | StatusEvent::Cleared { .. } => {
                let room = event.room()?;
                if self.ringing.as_ref().map(ActiveCall::room) != Some(room) {
                    return None;
                }
                self.ringing = None;
                debug!(target: "call.surface", room = %room, "Incoming call badge cleared");
                Some(BadgeChange::Cleared { room: room.clone() })
            }
            _ => None,
        }
    }

    /// Wait for the next visible change, or `None` once the coordinator
    /// stopped.
    pub async fn next_change(&mut self) -> Option<BadgeChange> {
        while let Some(event) = self.events.recv().await {
            if let Some(change) = self.apply(&event) {
                return Some(change);
            }
        }
        None
    }

    /// Accept gesture.
    pub async fn accept(&mut self) -> Result<(), CallError> {
        let room = self.ringing_room()?;
        info!(target: "call.surface", room = %room, "Incoming call accepted");
        self.handle.accept(&room).await
    }

    /// Decline gesture.
    pub async fn decline(&mut self) -> Result<(), CallError> {
        let room = self.ringing_room()?;
        info!(target: "call.surface", room = %room, "Incoming call declined");
        self.ringing = None;
        self.handle.decline(&room).await
    }

    fn ringing_room(&self) -> Result<RoomName, CallError> {
        self.ringing
            .as_ref()
            .map(|call| call.room().clone())
            .ok_or(CallError::NoActiveCall)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::coordinator::{CallCoordinator, CoordinatorSettings};
    use crate::media::MockMediaTransport;
    use crate::service::{MockCallService, ServiceOp};
    use crate::transport::CallNotification;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn incoming(id: i64) -> crate::models::CallSession {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "roomName": format!("room-{id}"),
            "callerEmail": "buyer@market.test",
            "calleeEmail": "vendor@shop.test",
            "callType": "VOICE",
            "status": "RINGING",
            "createdAt": "2026-10-01T10:00:00Z"
        }))
        .unwrap()
    }

    fn spawn(service: MockCallService) -> (CallCoordinatorHandle, Arc<MockCallService>) {
        let service = Arc::new(service);
        let (handle, _task) = CallCoordinator::spawn(
            CoordinatorSettings {
                local_email: "vendor@shop.test".to_string(),
                no_answer_timeout: Duration::from_secs(30),
                terminal_auto_close: Duration::from_millis(2500),
            },
            service.clone(),
            Arc::new(MockMediaTransport::new()),
            CancellationToken::new(),
        );
        (handle, service)
    }

    async fn next(badge: &mut IncomingCallBadge) -> BadgeChange {
        tokio::time::timeout(Duration::from_secs(5), badge.next_change())
            .await
            .expect("badge change in time")
            .expect("coordinator running")
    }

    #[tokio::test]
    async fn test_badge_shows_then_clears_on_remote_end() {
        let (handle, _service) = spawn(MockCallService::new());
        let mut badge = IncomingCallBadge::mount(handle.clone()).await.unwrap();
        assert!(badge.ringing().is_none());

        let session = incoming(3);
        handle
            .notify(CallNotification::Incoming(session.clone()))
            .await
            .unwrap();
        assert!(matches!(next(&mut badge).await, BadgeChange::Ringing(_)));
        assert_eq!(badge.ringing().unwrap().remote_email(), "buyer@market.test");

        // Caller gave up before we answered
        handle
            .notify(CallNotification::Missed(session))
            .await
            .unwrap();
        match next(&mut badge).await {
            BadgeChange::Cleared { room } => assert_eq!(room.as_str(), "room-3"),
            other => panic!("unexpected change {other:?}"),
        }
        assert!(badge.ringing().is_none());
    }

    #[tokio::test]
    async fn test_badge_decline_forwards_reject() {
        let (handle, service) = spawn(MockCallService::new());
        let mut badge = IncomingCallBadge::mount(handle.clone()).await.unwrap();

        handle
            .notify(CallNotification::Incoming(incoming(5)))
            .await
            .unwrap();
        next(&mut badge).await;

        badge.decline().await.unwrap();
        assert!(badge.ringing().is_none());
        // The reject goes out in the background
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(service.call_count(ServiceOp::Reject), 1);
    }

    #[tokio::test]
    async fn test_badge_accept_clears_on_session_opened() {
        let session = incoming(6);
        let (handle, _service) = spawn(MockCallService::new().with_session(session.clone()));
        let mut badge = IncomingCallBadge::mount(handle.clone()).await.unwrap();

        handle
            .notify(CallNotification::Incoming(session))
            .await
            .unwrap();
        next(&mut badge).await;

        badge.accept().await.unwrap();
        assert!(matches!(next(&mut badge).await, BadgeChange::Cleared { .. }));
    }

    #[tokio::test]
    async fn test_badge_without_call() {
        let (handle, _service) = spawn(MockCallService::new());
        let mut badge = IncomingCallBadge::mount(handle).await.unwrap();
        assert!(matches!(badge.accept().await, Err(CallError::NoActiveCall)));
    }

    #[tokio::test]
    async fn test_badge_mount_picks_up_ringing_call() {
        let (handle, _service) = spawn(MockCallService::new());
        handle
            .notify(CallNotification::Incoming(incoming(2)))
            .await
            .unwrap();

        let badge = IncomingCallBadge::mount(handle).await.unwrap();
        assert_eq!(badge.ringing().unwrap().room().as_str(), "room-2");
    }
}
