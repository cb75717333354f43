//! Per-user push channels and the notifications they carry.
//!
//! Each logged-in identity subscribes to one inbound queue for incoming calls
//! and four status queues. Every message body is a JSON `CallSession`.

use crate::models::CallSession;
use common::types::RoomName;
use std::fmt;

/// A per-user push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    IncomingCall,
    CallAnswered,
    CallRejected,
    CallMissed,
    CallEnded,
}

impl Channel {
    /// Every channel a client subscribes to, in subscription order.
    pub const ALL: [Channel; 5] = [
        Channel::IncomingCall,
        Channel::CallAnswered,
        Channel::CallRejected,
        Channel::CallMissed,
        Channel::CallEnded,
    ];

    /// Queue name under the user destination prefix.
    #[must_use]
    pub const fn queue(&self) -> &'static str {
        match self {
            Channel::IncomingCall => "incoming-call",
            Channel::CallAnswered => "call-answered",
            Channel::CallRejected => "call-rejected",
            Channel::CallMissed => "call-missed",
            Channel::CallEnded => "call-ended",
        }
    }

    /// Subscription destination for `email`.
    #[must_use]
    pub fn destination(&self, email: &str) -> String {
        format!("/user/{email}/queue/{}", self.queue())
    }

    /// Resolve a MESSAGE destination back to its channel.
    ///
    /// Brokers may rewrite the user prefix (e.g. to a session-suffixed
    /// queue), so only the trailing queue segment is matched.
    #[must_use]
    pub fn from_destination(destination: &str) -> Option<Self> {
        let queue = destination.rsplit('/').next()?;
        // Session-suffixed queues look like `call-ended-user1a2b`
        Channel::ALL
            .into_iter()
            .find(|c| queue == c.queue() || queue.starts_with(&format!("{}-user", c.queue())))
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.queue())
    }
}

/// A parsed call-lifecycle push.
#[derive(Debug, Clone)]
pub enum CallNotification {
    Incoming(CallSession),
    Answered(CallSession),
    Rejected(CallSession),
    Missed(CallSession),
    Ended(CallSession),
}

impl CallNotification {
    /// Parse a message body received on `channel`.
    ///
    /// # Errors
    ///
    /// Returns the JSON error for malformed payloads.
    pub fn parse(channel: Channel, body: &str) -> Result<Self, serde_json::Error> {
        let session: CallSession = serde_json::from_str(body)?;
        Ok(match channel {
            Channel::IncomingCall => CallNotification::Incoming(session),
            Channel::CallAnswered => CallNotification::Answered(session),
            Channel::CallRejected => CallNotification::Rejected(session),
            Channel::CallMissed => CallNotification::Missed(session),
            Channel::CallEnded => CallNotification::Ended(session),
        })
    }

    /// Channel this notification arrived on.
    #[must_use]
    pub fn channel(&self) -> Channel {
        match self {
            CallNotification::Incoming(_) => Channel::IncomingCall,
            CallNotification::Answered(_) => Channel::CallAnswered,
            CallNotification::Rejected(_) => Channel::CallRejected,
            CallNotification::Missed(_) => Channel::CallMissed,
            CallNotification::Ended(_) => Channel::CallEnded,
        }
    }

    #[must_use]
    pub fn session(&self) -> &CallSession {
        match self {
            CallNotification::Incoming(s)
            | CallNotification::Answered(s)
            | CallNotification::Rejected(s)
            | CallNotification::Missed(s)
            | CallNotification::Ended(s) => s,
        }
    }

    #[must_use]
    pub fn room(&self) -> &RoomName {
        &self.session().room_name
    }

    /// Rejected, missed and ended pushes finish a call.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallNotification::Rejected(_) | CallNotification::Missed(_) | CallNotification::Ended(_)
        )
    }
}
