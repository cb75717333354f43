//! Call state owned by the coordinator and the events it broadcasts.

use crate::models::{CallSession, Medium};
use common::types::RoomName;
use std::fmt;
use std::time::Duration;

/// How a call finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ended,
    Declined,
    Missed,
}

impl Outcome {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Outcome::Ended => "ended",
            Outcome::Declined => "declined",
            Outcome::Missed => "missed",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A terminal call state.
///
/// With a message and an auto-close delay, the slot clears itself after the
/// delay. With a message and no delay (errors), it stays until dismissed.
/// Without a message it clears immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Terminal {
    pub outcome: Outcome,
    pub message: Option<String>,
    pub auto_close: Option<Duration>,
}

/// Phase of the active-call slot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CallPhase {
    /// No call.
    #[default]
    Idle,
    /// Local `initiate` request in flight; no room yet.
    Initiating { medium: Medium },
    /// Session exists, remote party has not joined (caller), or an incoming
    /// call is waiting for accept/decline (callee).
    Ringing,
    /// Answer in progress or media join pending.
    Connecting,
    /// Both parties are in the media room.
    Active { participants: usize },
    /// Finished. Accepts no further transitions.
    Finished(Terminal),
}

impl CallPhase {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallPhase::Finished(_))
    }

    /// Whether the slot holds a call that is not finished.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        !matches!(self, CallPhase::Idle | CallPhase::Finished(_))
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CallPhase::Idle => "idle",
            CallPhase::Initiating { .. } => "initiating",
            CallPhase::Ringing => "ringing",
            CallPhase::Connecting => "connecting",
            CallPhase::Active { .. } => "active",
            CallPhase::Finished(t) => t.outcome.as_str(),
        }
    }
}

/// The call occupying the active slot.
///
/// `is_initiator` is local: it records which side created the session on
/// this client and is never synchronized.
#[derive(Debug, Clone)]
pub struct ActiveCall {
    pub session: CallSession,
    pub is_initiator: bool,
}

impl ActiveCall {
    #[must_use]
    pub fn room(&self) -> &RoomName {
        &self.session.room_name
    }

    #[must_use]
    pub fn medium(&self) -> Medium {
        self.session.call_type
    }

    /// Email of the other party.
    #[must_use]
    pub fn remote_email(&self) -> &str {
        if self.is_initiator {
            &self.session.callee_email
        } else {
            &self.session.caller_email
        }
    }

    /// Display name of the other party, falling back to their email.
    #[must_use]
    pub fn remote_name(&self) -> &str {
        let name = if self.is_initiator {
            &self.session.callee_name
        } else {
            &self.session.caller_name
        };
        name.as_deref().unwrap_or_else(|| self.remote_email())
    }
}

/// Point-in-time view of the coordinator.
#[derive(Debug, Clone, Default)]
pub struct CallSnapshot {
    pub phase: CallPhase,
    pub call: Option<ActiveCall>,
}

impl CallSnapshot {
    #[must_use]
    pub fn room(&self) -> Option<&RoomName> {
        self.call.as_ref().map(ActiveCall::room)
    }
}

/// Status change broadcast to every subscribed surface.
#[derive(Debug, Clone)]
pub enum StatusEvent {
    /// Local `initiate` started.
    Initiating { medium: Medium, callee_email: String },
    /// Local `initiate` failed; the slot is idle again.
    InitiateFailed { message: String },
    /// An incoming call is ringing on this client.
    IncomingCall { call: ActiveCall },
    /// A call is ready for its modal: created locally, or accepted.
    SessionOpened { call: ActiveCall },
    /// Answer or media join in progress.
    Connecting { room: RoomName },
    /// Remote party present in the media room.
    Connected { room: RoomName, participants: usize },
    /// Local track state changed.
    MediaChanged {
        room: RoomName,
        audio_enabled: bool,
        video_enabled: bool,
    },
    /// The call reached its terminal state.
    Finished { room: RoomName, terminal: Terminal },
    /// The slot was released back to idle.
    Cleared { room: RoomName },
}

impl StatusEvent {
    /// Room the event refers to, if any.
    #[must_use]
    pub fn room(&self) -> Option<&RoomName> {
        match self {
            StatusEvent::Initiating { .. } | StatusEvent::InitiateFailed { .. } => None,
            StatusEvent::IncomingCall { call } | StatusEvent::SessionOpened { call } => {
                Some(call.room())
            }
            StatusEvent::Connecting { room }
            | StatusEvent::Connected { room, .. }
            | StatusEvent::MediaChanged { room, .. }
            | StatusEvent::Finished { room, .. }
            | StatusEvent::Cleared { room } => Some(room),
        }
    }
}
