//! In-process call registry that notifies the other party.
//!
//! Wraps [`MockCallService`] and, after every successful operation, pushes
//! the notification the real backend would send:
//!
//! | Operation | Push | To |
//! |-----------|------|----|
//! | initiate | incoming-call | callee |
//! | answer | call-answered | caller |
//! | reject | call-rejected | caller |
//! | end (missed) | call-missed | other party |
//! | end | call-ended | other party |
//!
//! Pushes go straight into registered coordinators, or through a
//! [`MockSignalingServer`](crate::mock_signaling::MockSignalingServer) when one is attached.

use crate::mock_signaling::SignalingPusher;
use call_client::coordinator::{
    CallCoordinator, CallCoordinatorHandle, CoordinatorSettings, StatusEvent, Subscription,
    Terminal,
};
use call_client::errors::CallError;
use call_client::media::MockMediaTransport;
use call_client::models::{CallSession, EndReason, InitiateRequest};
use call_client::service::{CallSessionApi, EndTarget, MockCallService};
use call_client::transport::{
    CallNotification, NotificationTransport, Silent, TransportHandle, TransportSettings,
};
use common::types::CallId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Shared registry for two or more test clients.
#[derive(Clone, Default)]
pub struct MockBackend {
    registry: Arc<MockCallService>,
    direct: Arc<Mutex<HashMap<String, mpsc::Sender<CallNotification>>>>,
    signaling: Option<SignalingPusher>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver pushes through the mock broker instead of directly.
    pub fn with_signaling(mut self, pusher: SignalingPusher) -> Self {
        self.signaling = Some(pusher);
        self
    }

    /// The underlying registry, for call assertions.
    pub fn registry(&self) -> &MockCallService {
        &self.registry
    }

    /// Route direct pushes for `email` into `sink`.
    pub fn register(&self, email: &str, sink: mpsc::Sender<CallNotification>) {
        self.direct
            .lock()
            .unwrap()
            .insert(email.to_string(), sink);
    }

    async fn push(&self, email: &str, notification: CallNotification) {
        if let Some(pusher) = &self.signaling {
            pusher.push_notification(email, notification.channel(), notification.session());
            return;
        }
        let sink = self.direct.lock().unwrap().get(email).cloned();
        if let Some(sink) = sink {
            let _ = sink.send(notification).await;
        }
    }

    fn stored(&self, target: &EndTarget) -> Option<CallSession> {
        let mut session = self.registry.session(target)?;
        session.access_token = None;
        Some(session)
    }
}

#[async_trait::async_trait]
impl CallSessionApi for MockBackend {
    async fn initiate(&self, request: &InitiateRequest) -> Result<CallSession, CallError> {
        let session = self.registry.initiate(request).await?;
        let mut pushed = session.clone();
        pushed.access_token = None;
        self.push(&session.callee_email, CallNotification::Incoming(pushed))
            .await;
        Ok(session)
    }

    async fn answer(&self, id: CallId, callee_email: &str) -> Result<CallSession, CallError> {
        let session = self.registry.answer(id, callee_email).await?;
        let mut pushed = session.clone();
        pushed.access_token = None;
        self.push(&session.caller_email, CallNotification::Answered(pushed))
            .await;
        Ok(session)
    }

    async fn reject(&self, id: CallId, callee_email: &str) -> Result<(), CallError> {
        self.registry.reject(id, callee_email).await?;
        if let Some(session) = self.stored(&EndTarget::Session(id)) {
            let caller = session.caller_email.clone();
            self.push(&caller, CallNotification::Rejected(session)).await;
        }
        Ok(())
    }

    async fn end(
        &self,
        target: &EndTarget,
        party_email: &str,
        reason: EndReason,
    ) -> Result<(), CallError> {
        self.registry.end(target, party_email, reason).await?;
        if let Some(session) = self.stored(target) {
            let other = session.remote_party(party_email).to_string();
            let notification = if reason == EndReason::Missed {
                CallNotification::Missed(session)
            } else {
                CallNotification::Ended(session)
            };
            self.push(&other, notification).await;
        }
        Ok(())
    }

    async fn history(&self, email: &str) -> Result<Vec<CallSession>, CallError> {
        self.registry.history(email).await
    }
}

/// One party: a coordinator wired to the shared backend and its own mock
/// media transport.
pub struct TestClient {
    pub email: String,
    pub handle: CallCoordinatorHandle,
    pub media: Arc<MockMediaTransport>,
    pub events: Subscription,
    pub task: JoinHandle<()>,
}

impl TestClient {
    /// Spawn a client whose pushes arrive directly from `backend`.
    pub async fn spawn(backend: &MockBackend, email: &str) -> Self {
        let client = Self::spawn_detached(backend, email).await;
        backend.register(email, client.handle.notification_sink());
        client
    }

    /// Spawn a client without registering it for direct pushes, e.g. when
    /// pushes travel through a real transport.
    pub async fn spawn_detached(backend: &MockBackend, email: &str) -> Self {
        let media = Arc::new(MockMediaTransport::new());
        let (handle, task) = CallCoordinator::spawn(
            CoordinatorSettings {
                local_email: email.to_string(),
                no_answer_timeout: Duration::from_secs(30),
                terminal_auto_close: Duration::from_millis(2500),
            },
            Arc::new(backend.clone()),
            media.clone(),
            CancellationToken::new(),
        );
        let events = handle.subscribe().await.expect("subscribe to coordinator");
        Self {
            email: email.to_string(),
            handle,
            media,
            events,
            task,
        }
    }

    /// Connect a Notification Transport for this client to `url`.
    pub fn attach_transport(&self, url: &str) -> (TransportHandle, JoinHandle<()>) {
        NotificationTransport::spawn(
            TransportSettings {
                url: url.to_string(),
                user_email: self.email.clone(),
                auth_token: None,
                connect_timeout: Duration::from_secs(2),
                reconnect_delay: Duration::from_millis(100),
            },
            self.handle.notification_sink(),
            Arc::new(Silent),
            CancellationToken::new(),
        )
    }

    /// Wait for the first status event matching `predicate`.
    pub async fn wait_for(&mut self, predicate: impl Fn(&StatusEvent) -> bool) -> StatusEvent {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let event = self.events.recv().await.expect("coordinator running");
                if predicate(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("status event in time")
    }

    /// Wait for the call to finish and return its terminal state.
    pub async fn wait_finished(&mut self) -> Terminal {
        match self
            .wait_for(|e| matches!(e, StatusEvent::Finished { .. }))
            .await
        {
            StatusEvent::Finished { terminal, .. } => terminal,
            _ => unreachable!("filtered to Finished"),
        }
    }
}
