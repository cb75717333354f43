//! Call Session Service: request/response client for the backend call registry.
//!
//! # Components
//!
//! - `client` - reqwest implementation against the REST endpoints
//! - `mock` - scripted implementation for tests (`test-utils` feature)
//!
//! The coordinator only sees the [`CallSessionApi`] trait, so the backend
//! can be swapped for a mock without touching call state logic.

pub mod client;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use client::CallServiceClient;
#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockCallService, ServiceCall, ServiceOp};

use crate::errors::CallError;
use crate::models::{CallSession, EndReason, InitiateRequest, Medium};
use common::types::{CallId, RoomName};
use std::fmt;

/// What an `end` request addresses.
///
/// The generic endpoint is keyed by session id; the medium-specific
/// endpoints are keyed by room name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndTarget {
    Session(CallId),
    Room { room: RoomName, medium: Medium },
}

impl fmt::Display for EndTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndTarget::Session(id) => write!(f, "session {id}"),
            EndTarget::Room { room, medium } => write!(f, "{medium} room {room}"),
        }
    }
}

/// Operations against the backend call registry.
///
/// Every call either returns or fails; none retry. Server-side each
/// operation also pushes a notification to the other party.
#[async_trait::async_trait]
pub trait CallSessionApi: Send + Sync {
    /// Create a session. The response carries the room name and, for most
    /// media, the caller's access credential.
    async fn initiate(&self, request: &InitiateRequest) -> Result<CallSession, CallError>;

    /// Mark the session answered and obtain the callee's access credential.
    async fn answer(&self, id: CallId, callee_email: &str) -> Result<CallSession, CallError>;

    /// Mark the session rejected.
    async fn reject(&self, id: CallId, callee_email: &str) -> Result<(), CallError>;

    /// Mark the session ended. Ending an already-ended session succeeds.
    async fn end(
        &self,
        target: &EndTarget,
        party_email: &str,
        reason: EndReason,
    ) -> Result<(), CallError>;

    /// List past sessions for a party.
    async fn history(&self, email: &str) -> Result<Vec<CallSession>, CallError>;
}
