//! Coordinator mailbox messages.
//!
//! Public commands come from [`super::CallCoordinatorHandle`]; internal
//! messages come from the no-answer and auto-close timers, the media
//! bridge, and the task that joins the media room. Request-response
//! commands carry a `oneshot` reply channel.

use super::state::{CallSnapshot, StatusEvent};
use crate::errors::CallError;
use crate::media::{MediaError, MediaSession, MediaState};
use crate::models::{CallContext, CallSession, Medium};
use crate::transport::CallNotification;
use common::types::RoomName;
use tokio::sync::{mpsc, oneshot};

/// Parameters for placing a call from this client.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub callee_email: String,
    pub callee_name: Option<String>,
    pub caller_name: Option<String>,
    pub medium: Medium,
    pub context: CallContext,
}

impl CallRequest {
    /// Call `callee_email` with no display names or context.
    #[must_use]
    pub fn new(callee_email: impl Into<String>, medium: Medium) -> Self {
        Self {
            callee_email: callee_email.into(),
            callee_name: None,
            caller_name: None,
            medium,
            context: CallContext::default(),
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: CallContext) -> Self {
        self.context = context;
        self
    }
}

/// What the media bridge reports for the joined room.
#[derive(Debug)]
pub(crate) enum MediaSignal {
    ParticipantJoined { identity: String },
    ParticipantLeft { identity: String, remaining: usize },
    Disconnected,
    Error(MediaError),
}

pub(crate) enum CoordinatorMessage {
    Initiate {
        request: CallRequest,
        respond_to: oneshot::Sender<Result<CallSession, CallError>>,
    },
    Accept {
        room: RoomName,
        respond_to: oneshot::Sender<Result<(), CallError>>,
    },
    Decline {
        room: RoomName,
        respond_to: oneshot::Sender<Result<(), CallError>>,
    },
    HangUp {
        room: RoomName,
        respond_to: oneshot::Sender<Result<(), CallError>>,
    },
    ToggleAudio {
        respond_to: oneshot::Sender<Result<bool, CallError>>,
    },
    ToggleVideo {
        respond_to: oneshot::Sender<Result<bool, CallError>>,
    },
    Dismiss {
        room: RoomName,
        respond_to: oneshot::Sender<Result<(), CallError>>,
    },
    Snapshot {
        respond_to: oneshot::Sender<CallSnapshot>,
    },
    MediaState {
        respond_to: oneshot::Sender<Option<MediaState>>,
    },
    Subscribe {
        respond_to: oneshot::Sender<(u64, mpsc::Receiver<StatusEvent>)>,
    },
    Unsubscribe {
        id: u64,
    },
    Notification(CallNotification),

    // Internal
    NoAnswerTimeout {
        room: RoomName,
    },
    AutoClose {
        room: RoomName,
    },
    Media {
        room: RoomName,
        signal: MediaSignal,
    },
    /// The join task finished. `session` is joined iff `result` is `Ok`.
    JoinCompleted {
        join_id: u64,
        room: RoomName,
        session: MediaSession,
        result: Result<(), MediaError>,
    },
}
