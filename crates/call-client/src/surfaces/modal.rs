//! Voice/video call modal.

use crate::coordinator::{
    ActiveCall, CallCoordinatorHandle, CallPhase, StatusEvent, Subscription, Terminal,
};
use crate::errors::CallError;
use crate::models::Medium;
use common::types::RoomName;
use tracing::{debug, info};

/// What the modal renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModalView {
    /// Waiting for the other party or for media.
    Connecting,
    /// Both parties are in the room.
    Connected { participants: usize },
    /// Finished with a message; closes by itself shortly.
    Ending { message: String },
    /// Finished with an error banner; stays until closed.
    Error { message: String },
    /// Unmounted.
    Closed,
}

impl ModalView {
    fn from_phase(phase: &CallPhase) -> Self {
        match phase {
            CallPhase::Idle => ModalView::Closed,
            CallPhase::Initiating { .. } | CallPhase::Ringing | CallPhase::Connecting => {
                ModalView::Connecting
            }
            CallPhase::Active { participants } => ModalView::Connected {
                participants: *participants,
            },
            CallPhase::Finished(terminal) => Self::from_terminal(terminal),
        }
    }

    fn from_terminal(terminal: &Terminal) -> Self {
        match (&terminal.message, terminal.auto_close) {
            (None, _) => ModalView::Closed,
            (Some(message), Some(_)) => ModalView::Ending {
                message: message.clone(),
            },
            (Some(message), None) => ModalView::Error {
                message: message.clone(),
            },
        }
    }

    /// Banner text, if the view carries one.
    #[must_use]
    pub fn banner(&self) -> Option<&str> {
        match self {
            ModalView::Ending { message } | ModalView::Error { message } => Some(message),
            _ => None,
        }
    }

    fn is_finished(&self) -> bool {
        matches!(
            self,
            ModalView::Ending { .. } | ModalView::Error { .. } | ModalView::Closed
        )
    }
}

/// Modal for one call room.
///
/// Follows coordinator events for its own room only and closes itself when
/// the call reaches a terminal state. Dropping the modal unsubscribes it.
pub struct CallModal {
    handle: CallCoordinatorHandle,
    events: Subscription,
    call: ActiveCall,
    view: ModalView,
    audio_enabled: bool,
    video_enabled: bool,
}

impl CallModal {
    /// Mount a modal for `call`.
    ///
    /// Subscribes before reading the snapshot so no transition is lost
    /// between the two.
    pub async fn open(handle: CallCoordinatorHandle, call: ActiveCall) -> Result<Self, CallError> {
        let events = handle.subscribe().await?;
        let snapshot = handle.snapshot().await?;

        let view = if snapshot.room() == Some(call.room()) {
            ModalView::from_phase(&snapshot.phase)
        } else {
            // The slot already moved on
            ModalView::Closed
        };
        let (audio_enabled, video_enabled) = match handle.media_state().await? {
            Some(media) if view != ModalView::Closed => (media.audio_enabled, media.video_enabled),
            _ => (true, call.medium().captures_video()),
        };

        info!(
            target: "call.surface",
            room = %call.room(),
            medium = %call.medium(),
            initiator = call.is_initiator,
            view = ?view,
            "Call modal opened"
        );

        Ok(Self {
            handle,
            events,
            call,
            view,
            audio_enabled,
            video_enabled,
        })
    }

    #[must_use]
    pub fn view(&self) -> &ModalView {
        &self.view
    }

    #[must_use]
    pub fn call(&self) -> &ActiveCall {
        &self.call
    }

    #[must_use]
    pub fn room(&self) -> &RoomName {
        self.call.room()
    }

    /// Voice or video modal.
    #[must_use]
    pub fn medium(&self) -> Medium {
        self.call.medium()
    }

    #[must_use]
    pub fn is_muted(&self) -> bool {
        !self.audio_enabled
    }

    #[must_use]
    pub fn is_camera_on(&self) -> bool {
        self.video_enabled
    }

    /// Apply one status event. Returns whether the view changed.
    pub fn apply(&mut self, event: &StatusEvent) -> bool {
        if event.room() != Some(self.call.room()) || self.view == ModalView::Closed {
            return false;
        }

        let next = match event {
            StatusEvent::Connecting { .. } if !self.view.is_finished() => ModalView::Connecting,
            StatusEvent::Connected { participants, .. } if !self.view.is_finished() => {
                ModalView::Connected {
                    participants: *participants,
                }
            }
            StatusEvent::MediaChanged {
                audio_enabled,
                video_enabled,
                ..
            } => {
                self.audio_enabled = *audio_enabled;
                self.video_enabled = *video_enabled;
                return false;
            }
            StatusEvent::Finished { terminal, .. } => ModalView::from_terminal(terminal),
            StatusEvent::Cleared { .. } => ModalView::Closed,
            _ => return false,
        };

        if next == self.view {
            return false;
        }
        debug!(target: "call.surface", room = %self.call.room(), view = ?next, "Modal view changed");
        self.view = next;
        true
    }

    /// Wait for the next view change.
    ///
    /// Returns `None` once the modal is closed or the coordinator stopped.
    pub async fn next_view(&mut self) -> Option<ModalView> {
        if self.view == ModalView::Closed {
            return None;
        }
        while let Some(event) = self.events.recv().await {
            if self.apply(&event) {
                return Some(self.view.clone());
            }
        }
        None
    }

    /// Mute gesture. Returns whether the microphone is now muted.
    pub async fn toggle_mute(&mut self) -> Result<bool, CallError> {
        self.audio_enabled = self.handle.toggle_audio().await?;
        Ok(!self.audio_enabled)
    }

    /// Camera gesture. Returns whether the camera is now on; always `false`
    /// in a voice modal.
    pub async fn toggle_camera(&mut self) -> Result<bool, CallError> {
        if !self.medium().captures_video() {
            return Ok(false);
        }
        self.video_enabled = self.handle.toggle_video().await?;
        Ok(self.video_enabled)
    }

    /// End-call gesture.
    pub async fn end(&mut self) -> Result<(), CallError> {
        info!(target: "call.surface", room = %self.call.room(), "End call pressed");
        self.handle.hang_up(self.call.room()).await
    }

    /// Close gesture. Hangs up a live call and releases a finished one.
    pub async fn close(&mut self) -> Result<(), CallError> {
        match self.view {
            ModalView::Closed => return Ok(()),
            ModalView::Connecting | ModalView::Connected { .. } => {
                self.handle.hang_up(self.call.room()).await?;
            }
            ModalView::Ending { .. } | ModalView::Error { .. } => {
                self.handle.dismiss(self.call.room()).await?;
            }
        }
        self.view = ModalView::Closed;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::coordinator::{CallCoordinator, CallRequest, CoordinatorSettings, Outcome};
    use crate::media::{MediaError, MockMediaTransport};
    use crate::service::MockCallService;
    use crate::transport::CallNotification;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn spawn(media: MockMediaTransport) -> (CallCoordinatorHandle, Arc<MockMediaTransport>) {
        let media = Arc::new(media);
        let (handle, _task) = CallCoordinator::spawn(
            CoordinatorSettings {
                local_email: "buyer@market.test".to_string(),
                no_answer_timeout: Duration::from_secs(30),
                terminal_auto_close: Duration::from_millis(2500),
            },
            Arc::new(MockCallService::new()),
            media.clone(),
            CancellationToken::new(),
        );
        (handle, media)
    }

    async fn open_for_new_call(
        handle: &CallCoordinatorHandle,
        medium: Medium,
    ) -> Result<CallModal, CallError> {
        let session = handle
            .initiate(CallRequest::new("vendor@shop.test", medium))
            .await?;
        let call = handle.snapshot().await?.call.unwrap_or(ActiveCall {
            session,
            is_initiator: true,
        });
        CallModal::open(handle.clone(), call).await
    }

    async fn next(modal: &mut CallModal) -> Option<ModalView> {
        tokio::time::timeout(Duration::from_secs(5), modal.next_view())
            .await
            .expect("view change in time")
    }

    #[tokio::test]
    async fn test_modal_follows_call_to_connected() {
        let (handle, media) = spawn(MockMediaTransport::new());
        let mut modal = open_for_new_call(&handle, Medium::Video).await.unwrap();
        assert_eq!(modal.view(), &ModalView::Connecting);
        assert!(modal.is_camera_on());

        media
            .participant_joins(modal.room(), "vendor@shop.test")
            .await;
        assert_eq!(
            next(&mut modal).await,
            Some(ModalView::Connected { participants: 1 })
        );
    }

    #[tokio::test]
    async fn test_modal_closes_on_local_hang_up() {
        let (handle, media) = spawn(MockMediaTransport::new());
        let mut modal = open_for_new_call(&handle, Medium::Voice).await.unwrap();

        modal.end().await.unwrap();
        assert_eq!(next(&mut modal).await, Some(ModalView::Closed));
        assert_eq!(next(&mut modal).await, None);
        assert!(!media.any_capturing());
    }

    #[tokio::test]
    async fn test_modal_shows_ending_message_for_remote_decline() {
        let (handle, _media) = spawn(MockMediaTransport::new());
        let mut modal = open_for_new_call(&handle, Medium::Voice).await.unwrap();

        handle
            .notify(CallNotification::Rejected(modal.call().session.clone()))
            .await
            .unwrap();

        let view = next(&mut modal).await.unwrap();
        assert!(matches!(view, ModalView::Ending { .. }));
        assert_eq!(view.banner(), Some("vendor@shop.test declined the call"));
    }

    #[tokio::test]
    async fn test_modal_error_banner_after_failed_join_until_closed() {
        let (handle, _media) = spawn(
            MockMediaTransport::new()
                .failing(MediaError::DeviceUnavailable("microphone".to_string())),
        );
        let result = handle
            .initiate(CallRequest::new("vendor@shop.test", Medium::Voice))
            .await;
        assert!(result.is_err());

        let call = handle.snapshot().await.unwrap().call.unwrap();
        let mut modal = CallModal::open(handle.clone(), call).await.unwrap();
        assert_eq!(
            modal.view(),
            &ModalView::Error {
                message: "No microphone is available".to_string()
            }
        );

        modal.close().await.unwrap();
        assert_eq!(modal.view(), &ModalView::Closed);
        assert_eq!(handle.snapshot().await.unwrap().phase, CallPhase::Idle);
    }

    #[tokio::test]
    async fn test_modal_ignores_other_rooms() {
        let (handle, _media) = spawn(MockMediaTransport::new());
        let mut modal = open_for_new_call(&handle, Medium::Voice).await.unwrap();

        let foreign = StatusEvent::Finished {
            room: RoomName::new("room-77"),
            terminal: Terminal {
                outcome: Outcome::Ended,
                message: None,
                auto_close: None,
            },
        };
        assert!(!modal.apply(&foreign));
        assert_eq!(modal.view(), &ModalView::Connecting);
    }

    #[tokio::test]
    async fn test_mute_and_voice_camera() {
        let (handle, _media) = spawn(MockMediaTransport::new());
        let mut modal = open_for_new_call(&handle, Medium::Voice).await.unwrap();

        assert!(modal.toggle_mute().await.unwrap());
        assert!(modal.is_muted());
        assert!(!modal.toggle_camera().await.unwrap());
        assert!(!modal.is_camera_on());
    }

    #[tokio::test]
    async fn test_open_after_slot_cleared_is_closed() {
        let (handle, _media) = spawn(MockMediaTransport::new());
        let session = handle
            .initiate(CallRequest::new("vendor@shop.test", Medium::Voice))
            .await
            .unwrap();
        handle.hang_up(&session.room_name).await.unwrap();

        let modal = CallModal::open(
            handle.clone(),
            ActiveCall {
                session,
                is_initiator: true,
            },
        )
        .await
        .unwrap();
        assert_eq!(modal.view(), &ModalView::Closed);
    }
}
