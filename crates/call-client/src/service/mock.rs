//! In-memory call registry for tests.
//!
//! Mints sessions with sequential ids (`room-1`, `room-2`, ...) and records
//! every request so tests can assert on what the coordinator sent.
//!
//! # Example
//!
//! ```rust,ignore
//! let service = MockCallService::new()
//!     .failing(ServiceOp::Initiate)
//!     .with_delay(ServiceOp::End, Duration::from_secs(1));
//! ```

use super::{CallSessionApi, EndTarget};
use crate::errors::CallError;
use crate::models::{CallSession, EndReason, InitiateRequest, Medium, SessionStatus};
use chrono::Utc;
use common::secret::SecretString;
use common::types::{CallId, RoomName};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Registry operation, used to inject failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceOp {
    Initiate,
    Answer,
    Reject,
    End,
    History,
}

/// One recorded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    Initiate {
        callee_email: String,
        medium: Medium,
    },
    Answer {
        id: CallId,
        callee_email: String,
    },
    Reject {
        id: CallId,
        callee_email: String,
    },
    End {
        target: EndTarget,
        party_email: String,
        reason: EndReason,
    },
    History {
        email: String,
    },
}

impl ServiceCall {
    /// Which operation this request was.
    #[must_use]
    pub fn op(&self) -> ServiceOp {
        match self {
            ServiceCall::Initiate { .. } => ServiceOp::Initiate,
            ServiceCall::Answer { .. } => ServiceOp::Answer,
            ServiceCall::Reject { .. } => ServiceOp::Reject,
            ServiceCall::End { .. } => ServiceOp::End,
            ServiceCall::History { .. } => ServiceOp::History,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    sessions: HashMap<CallId, CallSession>,
    failing: HashSet<ServiceOp>,
    calls: Vec<ServiceCall>,
    omit_caller_token: bool,
    delays: HashMap<ServiceOp, Duration>,
}

/// Mock call registry.
#[derive(Debug, Default)]
pub struct MockCallService {
    inner: Mutex<Inner>,
}

impl MockCallService {
    /// Create a mock that accepts every request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make one operation fail with `ServiceUnavailable`.
    #[must_use]
    pub fn failing(self, op: ServiceOp) -> Self {
        self.lock().failing.insert(op);
        self
    }

    /// Delay responses to one operation. The request is recorded before
    /// the delay. Works with paused tokio time.
    #[must_use]
    pub fn with_delay(self, op: ServiceOp, delay: Duration) -> Self {
        self.set_delay(op, delay);
        self
    }

    /// Change an operation's delay after construction.
    pub fn set_delay(&self, op: ServiceOp, delay: Duration) {
        let mut inner = self.lock();
        if delay.is_zero() {
            inner.delays.remove(&op);
        } else {
            inner.delays.insert(op, delay);
        }
    }

    /// Register a session the backend already knows, e.g. one announced to
    /// the callee by an incoming-call push.
    #[must_use]
    pub fn with_session(self, session: CallSession) -> Self {
        self.lock().sessions.insert(session.id, session);
        self
    }

    /// Return sessions from `initiate` without a caller credential.
    #[must_use]
    pub fn without_caller_token(self) -> Self {
        self.lock().omit_caller_token = true;
        self
    }

    /// Toggle failure injection after construction.
    pub fn set_failing(&self, op: ServiceOp, failing: bool) {
        let mut inner = self.lock();
        if failing {
            inner.failing.insert(op);
        } else {
            inner.failing.remove(&op);
        }
    }

    /// All requests received so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.lock().calls.clone()
    }

    /// Number of requests of one kind.
    #[must_use]
    pub fn call_count(&self, op: ServiceOp) -> usize {
        self.lock().calls.iter().filter(|c| c.op() == op).count()
    }

    /// Reasons of every `end` request, in order.
    #[must_use]
    pub fn end_reasons(&self) -> Vec<EndReason> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                ServiceCall::End { reason, .. } => Some(*reason),
                _ => None,
            })
            .collect()
    }

    /// Current server-side status of a session.
    #[must_use]
    pub fn status_of(&self, id: CallId) -> Option<SessionStatus> {
        self.lock().sessions.get(&id).map(|s| s.status)
    }

    /// Stored session an `end` target refers to.
    #[must_use]
    pub fn session(&self, target: &EndTarget) -> Option<CallSession> {
        let inner = self.lock();
        match target {
            EndTarget::Session(id) => inner.sessions.get(id).cloned(),
            EndTarget::Room { room, .. } => inner
                .sessions
                .values()
                .find(|s| &s.room_name == room)
                .cloned(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn pause(&self, op: ServiceOp) {
        let delay = self.lock().delays.get(&op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Record the request and report whether it should fail.
    fn record(&self, call: ServiceCall) -> Result<(), CallError> {
        let mut inner = self.lock();
        let op = call.op();
        inner.calls.push(call);
        if inner.failing.contains(&op) {
            return Err(CallError::ServiceUnavailable(format!(
                "Mock call service failing {op:?}"
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CallSessionApi for MockCallService {
    async fn initiate(&self, request: &InitiateRequest) -> Result<CallSession, CallError> {
        self.record(ServiceCall::Initiate {
            callee_email: request.callee_email.clone(),
            medium: request.call_type,
        })?;
        self.pause(ServiceOp::Initiate).await;

        let mut inner = self.lock();
        inner.next_id += 1;
        let id = CallId(inner.next_id);
        let access_token = if inner.omit_caller_token {
            None
        } else {
            Some(SecretString::from(format!("caller-grant-{id}")))
        };

        let session = CallSession {
            id,
            room_name: RoomName::new(format!("room-{id}")),
            caller_email: request.caller_email.clone(),
            callee_email: request.callee_email.clone(),
            caller_name: request.caller_name.clone(),
            callee_name: request.callee_name.clone(),
            call_type: request.call_type,
            status: SessionStatus::Initiated,
            context: request.context.clone(),
            created_at: Utc::now(),
            answered_at: None,
            ended_at: None,
            access_token,
        };
        inner.sessions.insert(id, session.clone());
        Ok(session)
    }

    async fn answer(&self, id: CallId, callee_email: &str) -> Result<CallSession, CallError> {
        self.record(ServiceCall::Answer {
            id,
            callee_email: callee_email.to_string(),
        })?;
        self.pause(ServiceOp::Answer).await;

        let mut inner = self.lock();
        let session = inner
            .sessions
            .get_mut(&id)
            .ok_or_else(|| CallError::NotFound(id.to_string()))?;
        if session.status.is_terminal() {
            return Err(CallError::Conflict(format!("Call {id} already finished")));
        }

        session.status = SessionStatus::Answered;
        session.answered_at = Some(Utc::now());
        let mut answered = session.clone();
        answered.access_token = Some(SecretString::from(format!("callee-grant-{id}")));
        Ok(answered)
    }

    async fn reject(&self, id: CallId, callee_email: &str) -> Result<(), CallError> {
        self.record(ServiceCall::Reject {
            id,
            callee_email: callee_email.to_string(),
        })?;
        self.pause(ServiceOp::Reject).await;

        if let Some(session) = self.lock().sessions.get_mut(&id) {
            session.status = SessionStatus::Rejected;
            session.ended_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn end(
        &self,
        target: &EndTarget,
        party_email: &str,
        reason: EndReason,
    ) -> Result<(), CallError> {
        self.record(ServiceCall::End {
            target: target.clone(),
            party_email: party_email.to_string(),
            reason,
        })?;
        self.pause(ServiceOp::End).await;

        let mut inner = self.lock();
        let session = match target {
            EndTarget::Session(id) => inner.sessions.get_mut(id),
            EndTarget::Room { room, .. } => {
                inner.sessions.values_mut().find(|s| &s.room_name == room)
            }
        };
        if let Some(session) = session {
            if !session.status.is_terminal() {
                session.status = if reason == EndReason::Missed {
                    SessionStatus::Missed
                } else {
                    SessionStatus::Ended
                };
                session.ended_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn history(&self, email: &str) -> Result<Vec<CallSession>, CallError> {
        self.record(ServiceCall::History {
            email: email.to_string(),
        })?;

        let inner = self.lock();
        let mut sessions: Vec<CallSession> = inner
            .sessions
            .values()
            .filter(|s| s.caller_email == email || s.callee_email == email)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| std::cmp::Reverse(s.id.0));
        Ok(sessions)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::CallContext;
    use common::secret::ExposeSecret;

    fn request(callee: &str) -> InitiateRequest {
        InitiateRequest {
            caller_email: "buyer@market.test".to_string(),
            callee_email: callee.to_string(),
            caller_name: None,
            callee_name: None,
            call_type: Medium::Video,
            context: CallContext::default(),
        }
    }

    #[tokio::test]
    async fn test_mock_initiate_mints_sequential_rooms() {
        let mock = MockCallService::new();

        let first = mock.initiate(&request("a@shop.test")).await.unwrap();
        let second = mock.initiate(&request("b@shop.test")).await.unwrap();

        assert_eq!(first.room_name.as_str(), "room-1");
        assert_eq!(second.room_name.as_str(), "room-2");
        assert_eq!(
            first.access_token.unwrap().expose_secret(),
            "caller-grant-1"
        );
        assert_eq!(mock.call_count(ServiceOp::Initiate), 2);
    }

    #[tokio::test]
    async fn test_mock_answer_then_end() {
        let mock = MockCallService::new();
        let session = mock.initiate(&request("v@shop.test")).await.unwrap();

        let answered = mock.answer(session.id, "v@shop.test").await.unwrap();
        assert_eq!(answered.status, SessionStatus::Answered);
        assert_eq!(
            answered.access_token.unwrap().expose_secret(),
            "callee-grant-1"
        );

        mock.end(
            &EndTarget::Session(session.id),
            "v@shop.test",
            EndReason::Hangup,
        )
        .await
        .unwrap();
        assert_eq!(mock.status_of(session.id), Some(SessionStatus::Ended));

        // Answering a finished call conflicts
        assert!(matches!(
            mock.answer(session.id, "v@shop.test").await,
            Err(CallError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_failing_still_records() {
        let mock = MockCallService::new().failing(ServiceOp::Initiate);

        let result = mock.initiate(&request("v@shop.test")).await;
        assert!(matches!(result, Err(CallError::ServiceUnavailable(_))));
        assert_eq!(mock.call_count(ServiceOp::Initiate), 1);

        mock.set_failing(ServiceOp::Initiate, false);
        assert!(mock.initiate(&request("v@shop.test")).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_delay_records_before_sleeping() {
        let mock = std::sync::Arc::new(
            MockCallService::new().with_delay(ServiceOp::End, Duration::from_secs(10)),
        );
        let session = mock.initiate(&request("v@shop.test")).await.unwrap();

        let ending = {
            let mock = std::sync::Arc::clone(&mock);
            tokio::spawn(async move {
                mock.end(
                    &EndTarget::Session(session.id),
                    "v@shop.test",
                    EndReason::Hangup,
                )
                .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(mock.call_count(ServiceOp::End), 1);
        assert!(!ending.is_finished());

        tokio::time::advance(Duration::from_secs(11)).await;
        ending.await.unwrap().unwrap();
        assert_eq!(mock.status_of(CallId(1)), Some(SessionStatus::Ended));
    }

    #[tokio::test]
    async fn test_mock_end_by_room_marks_missed() {
        let mock = MockCallService::new();
        let session = mock.initiate(&request("v@shop.test")).await.unwrap();

        let target = EndTarget::Room {
            room: session.room_name.clone(),
            medium: Medium::Video,
        };
        mock.end(&target, "buyer@market.test", EndReason::Missed)
            .await
            .unwrap();

        assert_eq!(mock.status_of(session.id), Some(SessionStatus::Missed));
        assert_eq!(mock.end_reasons(), vec![EndReason::Missed]);
    }

    #[tokio::test]
    async fn test_mock_history_filters_by_party() {
        let mock = MockCallService::new();
        mock.initiate(&request("a@shop.test")).await.unwrap();
        mock.initiate(&request("b@shop.test")).await.unwrap();

        let history = mock.history("b@shop.test").await.unwrap();
        assert_eq!(history.len(), 1);

        let history = mock.history("buyer@market.test").await.unwrap();
        assert_eq!(history.len(), 2);
        // Newest first
        assert_eq!(history.first().unwrap().id, CallId(2));
    }
}
