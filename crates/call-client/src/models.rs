//! Call session data model.
//!
//! Mirrors the backend call registry payloads (camelCase JSON). The same
//! `CallSession` shape arrives from REST responses and from push
//! notifications on the transport.

use chrono::{DateTime, Utc};
use common::secret::SecretString;
use common::types::{CallId, RoomName};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Call medium. Fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Medium {
    Voice,
    Video,
}

impl Medium {
    /// Returns the medium as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Medium::Voice => "voice",
            Medium::Video => "video",
        }
    }

    /// Whether local video capture is needed for this medium.
    #[must_use]
    pub const fn captures_video(&self) -> bool {
        matches!(self, Medium::Video)
    }
}

impl fmt::Display for Medium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-side status of a call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Initiated,
    Ringing,
    Answered,
    Rejected,
    Missed,
    Ended,
}

impl SessionStatus {
    /// Terminal statuses accept no further transitions.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Rejected | SessionStatus::Missed | SessionStatus::Ended
        )
    }
}

/// Optional product/shop association. Informational only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shop_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shop_name: Option<String>,
}

/// One call attempt, end to end.
///
/// The access credential is scoped to the party that received this payload;
/// the caller gets theirs from `initiate`, the callee from `answer`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSession {
    pub id: CallId,
    pub room_name: RoomName,
    pub caller_email: String,
    pub callee_email: String,
    #[serde(default)]
    pub caller_name: Option<String>,
    #[serde(default)]
    pub callee_name: Option<String>,
    pub call_type: Medium,
    pub status: SessionStatus,
    #[serde(flatten)]
    pub context: CallContext,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub answered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub access_token: Option<SecretString>,
}

impl CallSession {
    /// Identity of the other party, seen from `local_email`.
    #[must_use]
    pub fn remote_party(&self, local_email: &str) -> &str {
        if self.caller_email == local_email {
            &self.callee_email
        } else {
            &self.caller_email
        }
    }

    /// Display name of the other party, falling back to their email.
    #[must_use]
    pub fn remote_display_name(&self, local_email: &str) -> &str {
        let (name, email) = if self.caller_email == local_email {
            (&self.callee_name, &self.callee_email)
        } else {
            (&self.caller_name, &self.caller_email)
        };
        name.as_deref().unwrap_or(email)
    }
}

/// Parameters for placing a call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    pub caller_email: String,
    pub callee_email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callee_name: Option<String>,
    pub call_type: Medium,
    #[serde(flatten)]
    pub context: CallContext,
}

/// Why a party ended a call. Sent to the backend with `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Explicit local hang-up.
    Hangup,
    /// Caller-side no-answer timeout.
    Missed,
    /// Media room dropped underneath the call.
    Disconnected,
    /// Joining the media room failed.
    MediaError,
}

impl EndReason {
    /// Returns the reason as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EndReason::Hangup => "hangup",
            EndReason::Missed => "missed",
            EndReason::Disconnected => "disconnected",
            EndReason::MediaError => "media_error",
        }
    }
}
