//! Call client error types.
//!
//! `CallError` is what the coordinator and service client return.
//! `client_message()` produces the banner text a call modal shows; internal
//! details (URLs, status bodies, channel failures) are logged but never
//! placed in that text.

use crate::media::MediaError;
use thiserror::Error;

/// Call client error type.
#[derive(Debug, Error)]
pub enum CallError {
    /// Backend call registry unreachable or returned 5xx.
    #[error("Call service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Backend rejected the request payload (400).
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Backend rejected our credentials (401/403).
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Session or room unknown to the backend (404).
    #[error("Call not found: {0}")]
    NotFound(String),

    /// Backend refused the transition (409), e.g. the session was already answered.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Backend returned a payload we could not parse.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Another call already occupies the active-call slot.
    #[error("A call is already in progress")]
    CallInProgress,

    /// Command needs an active call but the slot is empty.
    #[error("No active call")]
    NoActiveCall,

    /// Command not valid in the current call phase.
    #[error("Invalid call state: {0}")]
    InvalidState(String),

    /// The call finished while the command was still in flight.
    #[error("Call ended: {0}")]
    CallEnded(String),

    /// Joining or controlling the media room failed.
    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    /// Internal error (actor mailbox closed, response dropped).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CallError {
    /// Returns a user-facing error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            CallError::ServiceUnavailable(_) | CallError::InvalidResponse(_) => {
                "Could not reach the call service, please try again".to_string()
            }
            CallError::BadRequest(_) => "The call request was invalid".to_string(),
            CallError::Unauthorized(_) => "Please sign in again to place calls".to_string(),
            CallError::NotFound(_) => "This call no longer exists".to_string(),
            CallError::Conflict(_) => "This call has already been handled".to_string(),
            CallError::CallInProgress => "You are already on a call".to_string(),
            CallError::NoActiveCall => "There is no active call".to_string(),
            CallError::InvalidState(_) => "That action is not available right now".to_string(),
            CallError::CallEnded(_) => "The call has ended".to_string(),
            CallError::Media(e) => e.client_message(),
            CallError::Config(_) | CallError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }

    /// Whether this error means the backend already considers the call over.
    ///
    /// Ending a call is idempotent, so these are treated as success by `end`.
    #[must_use]
    pub fn is_already_ended(&self) -> bool {
        matches!(self, CallError::NotFound(_) | CallError::Conflict(_))
    }
}
