//! `CallCoordinator` - the single owner of the active-call slot.
//!
//! Three independent sources feed one mailbox:
//! - local commands from surfaces (initiate, accept, decline, hang up)
//! - pushes from the Notification Transport
//! - media room callbacks and the no-answer / auto-close timers
//!
//! The actor applies them one at a time, so every interleaving reduces to a
//! sequence of transitions on one slot.
//!
//! Nothing slow runs inside the loop. Media joins run in their own task and
//! report back with `JoinCompleted`; backend end/reject notices are spawned
//! after the slot has already finished and released the devices. A stalled
//! join or a slow registry therefore never delays a hang-up or the
//! no-answer timeout.
//!
//! # Guards
//!
//! - Events are matched against the room of the active call; anything for
//!   another room is dropped.
//! - A finished call accepts no further transitions.
//! - Recently finished rooms are remembered so a late or duplicate push can
//!   never bring a call back.

use super::messages::{CallRequest, CoordinatorMessage, MediaSignal};
use super::state::{ActiveCall, CallPhase, CallSnapshot, Outcome, StatusEvent, Terminal};
use crate::config::Config;
use crate::errors::CallError;
use crate::media::{MediaError, MediaListener, MediaSession, MediaState, MediaTransport};
use crate::models::{CallSession, EndReason, InitiateRequest, Medium};
use crate::observability::metrics;
use crate::service::{CallSessionApi, EndTarget};
use crate::transport::CallNotification;
use common::secret::SecretString;
use common::types::RoomName;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the coordinator mailbox.
const COORDINATOR_CHANNEL_BUFFER: usize = 100;

/// Buffer for pushes handed over by the transport.
const NOTIFICATION_CHANNEL_BUFFER: usize = 64;

/// Per-subscriber buffer. A full subscriber misses events rather than
/// stalling the coordinator.
const SUBSCRIBER_BUFFER: usize = 64;

/// How many finished rooms are remembered for the stale-event guard.
const FINISHED_ROOMS_CAPACITY: usize = 32;

/// Coordinator settings.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Identity of the local party.
    pub local_email: String,
    /// Caller-side wait for the remote party to join the media room.
    pub no_answer_timeout: Duration,
    /// Delay before a finished call with a message clears itself.
    pub terminal_auto_close: Duration,
}

impl CoordinatorSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            local_email: config.user_email.clone(),
            no_answer_timeout: config.no_answer_timeout,
            terminal_auto_close: config.terminal_auto_close,
        }
    }
}

/// Handle to the coordinator.
///
/// Cheap to clone; every surface holds one.
#[derive(Clone)]
pub struct CallCoordinatorHandle {
    sender: mpsc::Sender<CoordinatorMessage>,
    notifications: mpsc::Sender<CallNotification>,
    cancel_token: CancellationToken,
    local_email: Arc<str>,
}

impl CallCoordinatorHandle {
    /// Identity of the local party.
    #[must_use]
    pub fn local_email(&self) -> &str {
        &self.local_email
    }

    /// Sender the Notification Transport delivers pushes into.
    #[must_use]
    pub fn notification_sink(&self) -> mpsc::Sender<CallNotification> {
        self.notifications.clone()
    }

    /// Deliver a push through the command mailbox, ordered with commands.
    pub async fn notify(&self, notification: CallNotification) -> Result<(), CallError> {
        self.send(CoordinatorMessage::Notification(notification))
            .await
    }

    /// Place a call. Resolves once the session exists and the local media
    /// join finished.
    ///
    /// # Errors
    ///
    /// - `CallError::CallInProgress` if the slot is occupied
    /// - service errors from `initiate`
    /// - `CallError::Media` if joining the room failed (the call is ended)
    /// - `CallError::CallEnded` if the call finished before the join did
    pub async fn initiate(&self, request: CallRequest) -> Result<CallSession, CallError> {
        self.request(|respond_to| CoordinatorMessage::Initiate {
            request,
            respond_to,
        })
        .await?
    }

    /// Accept the ringing incoming call for `room`. Resolves once the local
    /// media join finished, or with `CallError::CallEnded` if the call
    /// finished first.
    pub async fn accept(&self, room: &RoomName) -> Result<(), CallError> {
        let room = room.clone();
        self.request(|respond_to| CoordinatorMessage::Accept { room, respond_to })
            .await?
    }

    /// Decline the ringing incoming call for `room`. Never joins media.
    pub async fn decline(&self, room: &RoomName) -> Result<(), CallError> {
        let room = room.clone();
        self.request(|respond_to| CoordinatorMessage::Decline { room, respond_to })
            .await?
    }

    /// Hang up the call for `room`. Succeeds if it already finished.
    pub async fn hang_up(&self, room: &RoomName) -> Result<(), CallError> {
        let room = room.clone();
        self.request(|respond_to| CoordinatorMessage::HangUp { room, respond_to })
            .await?
    }

    /// Flip local audio. Returns the new enabled flag.
    pub async fn toggle_audio(&self) -> Result<bool, CallError> {
        self.request(|respond_to| CoordinatorMessage::ToggleAudio { respond_to })
            .await?
    }

    /// Flip local video. Returns the new enabled flag.
    pub async fn toggle_video(&self) -> Result<bool, CallError> {
        self.request(|respond_to| CoordinatorMessage::ToggleVideo { respond_to })
            .await?
    }

    /// Release a finished call for `room` back to idle.
    pub async fn dismiss(&self, room: &RoomName) -> Result<(), CallError> {
        let room = room.clone();
        self.request(|respond_to| CoordinatorMessage::Dismiss { room, respond_to })
            .await?
    }

    /// Current phase and active call.
    pub async fn snapshot(&self) -> Result<CallSnapshot, CallError> {
        self.request(|respond_to| CoordinatorMessage::Snapshot { respond_to })
            .await
    }

    /// Media state of the active call, if media is joined.
    pub async fn media_state(&self) -> Result<Option<MediaState>, CallError> {
        self.request(|respond_to| CoordinatorMessage::MediaState { respond_to })
            .await
    }

    /// Register for status events. Dropping the subscription unregisters.
    pub async fn subscribe(&self) -> Result<Subscription, CallError> {
        let (id, events) = self
            .request(|respond_to| CoordinatorMessage::Subscribe { respond_to })
            .await?;
        Ok(Subscription {
            id,
            events,
            mailbox: self.sender.downgrade(),
        })
    }

    /// Cancel the coordinator.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn send(&self, message: CoordinatorMessage) -> Result<(), CallError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| CallError::Internal(format!("channel send failed: {e}")))
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> CoordinatorMessage,
    ) -> Result<T, CallError> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx)).await?;
        rx.await
            .map_err(|e| CallError::Internal(format!("response receive failed: {e}")))
    }
}

/// A registered status listener.
///
/// Does not keep the coordinator alive: once every handle is gone the
/// actor stops and `recv` returns `None`.
pub struct Subscription {
    id: u64,
    events: mpsc::Receiver<StatusEvent>,
    mailbox: mpsc::WeakSender<CoordinatorMessage>,
}

impl Subscription {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next status event, or `None` once the coordinator stopped.
    pub async fn recv(&mut self) -> Option<StatusEvent> {
        self.events.recv().await
    }

    /// Next buffered status event without waiting.
    pub fn try_recv(&mut self) -> Option<StatusEvent> {
        self.events.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Closed receivers are pruned on the next broadcast anyway
        if let Some(mailbox) = self.mailbox.upgrade() {
            let _ = mailbox.try_send(CoordinatorMessage::Unsubscribe { id: self.id });
        }
    }
}

/// What the backend should be told when a call finishes locally.
enum Notice {
    None,
    End(EndReason),
    Reject,
}

/// Where a room stands relative to the slot.
enum Lookup {
    Active(ActiveCall),
    Finished,
    Unknown,
}

/// Who is waiting for a media join to finish.
enum JoinWaiter {
    Initiate {
        session: Box<CallSession>,
        respond_to: oneshot::Sender<Result<CallSession, CallError>>,
    },
    Accept {
        respond_to: oneshot::Sender<Result<(), CallError>>,
    },
}

impl JoinWaiter {
    fn reply(self, result: Result<(), CallError>) {
        match self {
            JoinWaiter::Initiate {
                session,
                respond_to,
            } => {
                let _ = respond_to.send(result.map(|()| *session));
            }
            JoinWaiter::Accept { respond_to } => {
                let _ = respond_to.send(result);
            }
        }
    }
}

/// A media join running outside the actor loop.
struct PendingJoin {
    id: u64,
    room: RoomName,
    cancel: CancellationToken,
    waiter: JoinWaiter,
}

/// Forwards media callbacks into the coordinator mailbox.
struct MediaBridge {
    mailbox: mpsc::WeakSender<CoordinatorMessage>,
    room: RoomName,
}

impl MediaBridge {
    async fn post(&self, signal: MediaSignal) {
        if let Some(mailbox) = self.mailbox.upgrade() {
            let _ = mailbox
                .send(CoordinatorMessage::Media {
                    room: self.room.clone(),
                    signal,
                })
                .await;
        }
    }
}

#[async_trait::async_trait]
impl MediaListener for MediaBridge {
    async fn on_participant_joined(&self, identity: &str) {
        self.post(MediaSignal::ParticipantJoined {
            identity: identity.to_string(),
        })
        .await;
    }

    async fn on_participant_left(&self, identity: &str, remaining: usize) {
        self.post(MediaSignal::ParticipantLeft {
            identity: identity.to_string(),
            remaining,
        })
        .await;
    }

    async fn on_disconnected(&self) {
        self.post(MediaSignal::Disconnected).await;
    }

    async fn on_error(&self, error: MediaError) {
        self.post(MediaSignal::Error(error)).await;
    }
}

/// The coordinator actor.
pub struct CallCoordinator {
    settings: CoordinatorSettings,
    service: Arc<dyn CallSessionApi>,
    media_transport: Arc<dyn MediaTransport>,
    receiver: mpsc::Receiver<CoordinatorMessage>,
    notifications: mpsc::Receiver<CallNotification>,
    /// Weak so timers and media callbacks never keep the actor alive.
    mailbox: mpsc::WeakSender<CoordinatorMessage>,
    cancel_token: CancellationToken,

    phase: CallPhase,
    active: Option<ActiveCall>,
    media: Option<MediaSession>,
    pending_join: Option<PendingJoin>,
    next_join_id: u64,
    no_answer: Option<CancellationToken>,
    auto_close: Option<CancellationToken>,
    finished_rooms: VecDeque<RoomName>,

    subscribers: HashMap<u64, mpsc::Sender<StatusEvent>>,
    next_subscriber_id: u64,
}

impl CallCoordinator {
    /// Spawn the coordinator.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        settings: CoordinatorSettings,
        service: Arc<dyn CallSessionApi>,
        media_transport: Arc<dyn MediaTransport>,
        cancel_token: CancellationToken,
    ) -> (CallCoordinatorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(COORDINATOR_CHANNEL_BUFFER);
        let (notifications_tx, notifications) = mpsc::channel(NOTIFICATION_CHANNEL_BUFFER);

        let local_email: Arc<str> = Arc::from(settings.local_email.as_str());
        let actor = Self {
            settings,
            service,
            media_transport,
            receiver,
            notifications,
            mailbox: sender.downgrade(),
            cancel_token: cancel_token.clone(),
            phase: CallPhase::Idle,
            active: None,
            media: None,
            pending_join: None,
            next_join_id: 0,
            no_answer: None,
            auto_close: None,
            finished_rooms: VecDeque::with_capacity(FINISHED_ROOMS_CAPACITY),
            subscribers: HashMap::new(),
            next_subscriber_id: 0,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = CallCoordinatorHandle {
            sender,
            notifications: notifications_tx,
            cancel_token,
            local_email,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "call.coordinator", fields(local = %self.settings.local_email))]
    async fn run(mut self) {
        info!(target: "call.coordinator", "CallCoordinator started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(target: "call.coordinator", "CallCoordinator received cancellation signal");
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!(target: "call.coordinator", "CallCoordinator channel closed, exiting");
                            break;
                        }
                    }
                }

                Some(notification) = self.notifications.recv() => {
                    self.handle_notification(notification);
                }
            }
        }

        self.release_local_resources();
        info!(
            target: "call.coordinator",
            phase = self.phase.as_str(),
            "CallCoordinator stopped"
        );
    }

    async fn handle_message(&mut self, message: CoordinatorMessage) {
        match message {
            CoordinatorMessage::Initiate {
                request,
                respond_to,
            } => {
                self.handle_initiate(request, respond_to).await;
            }
            CoordinatorMessage::Accept { room, respond_to } => {
                self.handle_accept(&room, respond_to).await;
            }
            CoordinatorMessage::Decline { room, respond_to } => {
                let _ = respond_to.send(self.handle_decline(&room));
            }
            CoordinatorMessage::HangUp { room, respond_to } => {
                let _ = respond_to.send(self.handle_hang_up(&room));
            }
            CoordinatorMessage::ToggleAudio { respond_to } => {
                let _ = respond_to.send(self.handle_toggle(false));
            }
            CoordinatorMessage::ToggleVideo { respond_to } => {
                let _ = respond_to.send(self.handle_toggle(true));
            }
            CoordinatorMessage::Dismiss { room, respond_to } => {
                let _ = respond_to.send(self.handle_dismiss(&room));
            }
            CoordinatorMessage::Snapshot { respond_to } => {
                let _ = respond_to.send(CallSnapshot {
                    phase: self.phase.clone(),
                    call: self.active.clone(),
                });
            }
            CoordinatorMessage::MediaState { respond_to } => {
                let _ = respond_to.send(self.media.as_ref().map(MediaSession::state));
            }
            CoordinatorMessage::Subscribe { respond_to } => {
                let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
                let id = self.next_subscriber_id;
                self.next_subscriber_id += 1;
                self.subscribers.insert(id, tx);
                debug!(target: "call.coordinator", subscriber = id, "Subscriber registered");
                let _ = respond_to.send((id, rx));
            }
            CoordinatorMessage::Unsubscribe { id } => {
                if self.subscribers.remove(&id).is_some() {
                    debug!(target: "call.coordinator", subscriber = id, "Subscriber removed");
                }
            }
            CoordinatorMessage::Notification(notification) => {
                self.handle_notification(notification);
            }
            CoordinatorMessage::NoAnswerTimeout { room } => {
                self.handle_no_answer(&room);
            }
            CoordinatorMessage::AutoClose { room } => {
                if self.matches_active(&room) && self.phase.is_terminal() {
                    self.clear_slot();
                }
            }
            CoordinatorMessage::Media { room, signal } => {
                self.handle_media(&room, signal);
            }
            CoordinatorMessage::JoinCompleted {
                join_id,
                room,
                session,
                result,
            } => {
                self.handle_join_completed(join_id, &room, session, result);
            }
        }
    }

    // ------------------------------------------------------------------
    // Local commands
    // ------------------------------------------------------------------

    async fn handle_initiate(
        &mut self,
        request: CallRequest,
        respond_to: oneshot::Sender<Result<CallSession, CallError>>,
    ) {
        if self.phase.is_busy() {
            debug!(
                target: "call.coordinator",
                phase = self.phase.as_str(),
                "Rejecting initiate while a call is active"
            );
            let _ = respond_to.send(Err(CallError::CallInProgress));
            return;
        }
        if self.phase.is_terminal() {
            self.clear_slot();
        }

        let medium = request.medium;
        self.set_phase(CallPhase::Initiating { medium });
        self.broadcast(StatusEvent::Initiating {
            medium,
            callee_email: request.callee_email.clone(),
        });
        metrics::record_call_initiated(medium);

        let body = InitiateRequest {
            caller_email: self.settings.local_email.clone(),
            callee_email: request.callee_email,
            caller_name: request.caller_name,
            callee_name: request.callee_name,
            call_type: medium,
            context: request.context,
        };

        let session = match self.service.initiate(&body).await {
            Ok(session) => session,
            Err(e) => {
                warn!(target: "call.coordinator", error = %e, "Failed to initiate call");
                self.set_phase(CallPhase::Idle);
                self.broadcast(StatusEvent::InitiateFailed {
                    message: e.client_message(),
                });
                metrics::record_call_outcome("failed");
                let _ = respond_to.send(Err(e));
                return;
            }
        };

        let room = session.room_name.clone();
        info!(
            target: "call.coordinator",
            room = %room,
            session_id = %session.id,
            medium = %medium,
            "Call initiated"
        );

        let call = ActiveCall {
            session: session.clone(),
            is_initiator: true,
        };
        self.active = Some(call.clone());
        self.set_phase(CallPhase::Ringing);
        metrics::set_call_active(true);
        self.broadcast(StatusEvent::SessionOpened { call });
        self.arm_no_answer(&room);

        let credential = session.access_token.clone();
        self.start_join(
            &room,
            medium,
            credential,
            JoinWaiter::Initiate {
                session: Box::new(session),
                respond_to,
            },
        );
    }

    async fn handle_accept(
        &mut self,
        room: &RoomName,
        respond_to: oneshot::Sender<Result<(), CallError>>,
    ) {
        let call = match self.lookup(room) {
            Lookup::Active(call) => call,
            Lookup::Finished => {
                let _ = respond_to.send(Err(CallError::InvalidState(
                    "The call has already finished".to_string(),
                )));
                return;
            }
            Lookup::Unknown => {
                let _ = respond_to.send(Err(CallError::NoActiveCall));
                return;
            }
        };
        if call.is_initiator || self.phase != CallPhase::Ringing {
            let _ = respond_to.send(Err(CallError::InvalidState(format!(
                "Cannot accept a call that is {}",
                self.phase.as_str()
            ))));
            return;
        }

        self.set_phase(CallPhase::Connecting);
        self.broadcast(StatusEvent::SessionOpened { call: call.clone() });
        self.broadcast(StatusEvent::Connecting { room: room.clone() });

        let answered = match self
            .service
            .answer(call.session.id, &self.settings.local_email)
            .await
        {
            Ok(answered) => answered,
            Err(e) => {
                warn!(target: "call.coordinator", room = %room, error = %e, "Failed to answer call");
                let auto_close = e.is_already_ended();
                self.finish(
                    room,
                    Outcome::Ended,
                    Some(e.client_message()),
                    auto_close,
                    Notice::None,
                );
                let _ = respond_to.send(Err(e));
                return;
            }
        };

        if let Some(active) = self.active.as_mut() {
            active.session.status = answered.status;
            active.session.answered_at = answered.answered_at;
        }
        info!(target: "call.coordinator", room = %room, session_id = %call.session.id, "Call answered");

        self.start_join(
            room,
            call.medium(),
            answered.access_token,
            JoinWaiter::Accept { respond_to },
        );
    }

    fn handle_decline(&mut self, room: &RoomName) -> Result<(), CallError> {
        let call = match self.lookup(room) {
            Lookup::Active(call) => call,
            Lookup::Finished => return Ok(()),
            Lookup::Unknown => return Err(CallError::NoActiveCall),
        };
        if call.is_initiator || self.phase != CallPhase::Ringing {
            return Err(CallError::InvalidState(format!(
                "Cannot decline a call that is {}",
                self.phase.as_str()
            )));
        }

        info!(target: "call.coordinator", room = %room, "Declining incoming call");
        self.finish(room, Outcome::Declined, None, false, Notice::Reject);
        Ok(())
    }

    fn handle_hang_up(&mut self, room: &RoomName) -> Result<(), CallError> {
        let call = match self.lookup(room) {
            Lookup::Active(call) => call,
            Lookup::Finished => {
                debug!(target: "call.coordinator", room = %room, "Hang up for finished call");
                return Ok(());
            }
            Lookup::Unknown => return Err(CallError::NoActiveCall),
        };

        // Hanging up an unanswered incoming call is a decline
        if !call.is_initiator && self.phase == CallPhase::Ringing {
            self.finish(room, Outcome::Declined, None, false, Notice::Reject);
            return Ok(());
        }

        info!(target: "call.coordinator", room = %room, "Hanging up");
        self.finish(
            room,
            Outcome::Ended,
            None,
            false,
            Notice::End(EndReason::Hangup),
        );
        Ok(())
    }

    fn handle_toggle(&mut self, video: bool) -> Result<bool, CallError> {
        let (Some(media), Some(call)) = (self.media.as_ref(), self.active.as_ref()) else {
            return Err(CallError::NoActiveCall);
        };
        let enabled = if video {
            media.toggle_video()
        } else {
            media.toggle_audio()
        };
        let state = media.state();
        let room = call.room().clone();
        self.broadcast(StatusEvent::MediaChanged {
            room,
            audio_enabled: state.audio_enabled,
            video_enabled: state.video_enabled,
        });
        Ok(enabled)
    }

    fn handle_dismiss(&mut self, room: &RoomName) -> Result<(), CallError> {
        if !self.matches_active(room) {
            return Ok(());
        }
        if !self.phase.is_terminal() {
            return Err(CallError::InvalidState(
                "The call is still in progress".to_string(),
            ));
        }
        self.clear_slot();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transport pushes
    // ------------------------------------------------------------------

    fn handle_notification(&mut self, notification: CallNotification) {
        let room = notification.room().clone();
        let channel = notification.channel();

        if let CallNotification::Incoming(session) = notification {
            self.handle_incoming(session);
            return;
        }

        if !self.matches_active(&room) || self.phase.is_terminal() {
            debug!(
                target: "call.coordinator",
                room = %room,
                channel = %channel,
                "Ignoring stale call notification"
            );
            return;
        }

        let Some(call) = self.active.clone() else {
            return;
        };
        match notification {
            CallNotification::Answered(_) => {
                if call.is_initiator && self.phase == CallPhase::Ringing {
                    info!(target: "call.coordinator", room = %room, "Callee answered");
                    // The no-answer timer keeps running until the callee is in the room
                    self.set_phase(CallPhase::Connecting);
                    self.broadcast(StatusEvent::Connecting { room });
                }
            }
            CallNotification::Rejected(_) => {
                let message = format!("{} declined the call", call.remote_name());
                self.finish(&room, Outcome::Declined, Some(message), true, Notice::None);
            }
            CallNotification::Missed(_) => {
                let message = if call.is_initiator {
                    "No answer".to_string()
                } else {
                    format!("Missed call from {}", call.remote_name())
                };
                self.finish(&room, Outcome::Missed, Some(message), true, Notice::None);
            }
            CallNotification::Ended(_) => {
                self.finish(
                    &room,
                    Outcome::Ended,
                    Some("Call ended".to_string()),
                    true,
                    Notice::None,
                );
            }
            CallNotification::Incoming(_) => {}
        }
    }

    fn handle_incoming(&mut self, session: CallSession) {
        let room = session.room_name.clone();

        if self.finished_rooms.contains(&room) {
            debug!(target: "call.coordinator", room = %room, "Ignoring incoming call for finished room");
            return;
        }
        if self.matches_active(&room) {
            debug!(target: "call.coordinator", room = %room, "Ignoring duplicate incoming call");
            return;
        }
        if self.phase.is_busy() {
            info!(
                target: "call.coordinator",
                room = %room,
                phase = self.phase.as_str(),
                "Ignoring incoming call while another call is active"
            );
            return;
        }
        if session.status.is_terminal() {
            debug!(target: "call.coordinator", room = %room, "Ignoring incoming call that already finished");
            return;
        }
        if self.phase.is_terminal() {
            self.clear_slot();
        }

        info!(
            target: "call.coordinator",
            room = %room,
            session_id = %session.id,
            medium = %session.call_type,
            "Incoming call"
        );
        let call = ActiveCall {
            session,
            is_initiator: false,
        };
        self.active = Some(call.clone());
        self.set_phase(CallPhase::Ringing);
        metrics::set_call_active(true);
        self.broadcast(StatusEvent::IncomingCall { call });
    }

    // ------------------------------------------------------------------
    // Media and timers
    // ------------------------------------------------------------------

    /// Start joining the media room in a separate task.
    ///
    /// The outcome comes back as `JoinCompleted`; until then the loop keeps
    /// serving commands, pushes and timers.
    fn start_join(
        &mut self,
        room: &RoomName,
        medium: Medium,
        credential: Option<SecretString>,
        waiter: JoinWaiter,
    ) {
        self.abandon_join();

        let id = self.next_join_id;
        self.next_join_id += 1;
        let cancel = self.cancel_token.child_token();
        let bridge = Arc::new(MediaBridge {
            mailbox: self.mailbox.clone(),
            room: room.clone(),
        });
        let session = MediaSession::new(Arc::clone(&self.media_transport), medium, bridge);

        debug!(target: "call.coordinator", room = %room, join_id = id, "Joining media room");
        tokio::spawn(run_join(
            self.mailbox.clone(),
            id,
            room.clone(),
            session,
            credential,
            cancel.clone(),
        ));
        self.pending_join = Some(PendingJoin {
            id,
            room: room.clone(),
            cancel,
            waiter,
        });
    }

    fn handle_join_completed(
        &mut self,
        join_id: u64,
        room: &RoomName,
        mut session: MediaSession,
        result: Result<(), MediaError>,
    ) {
        let current = self
            .pending_join
            .as_ref()
            .is_some_and(|pending| pending.id == join_id && &pending.room == room);
        if !current {
            debug!(target: "call.coordinator", room = %room, join_id, "Discarding stale media join");
            session.leave();
            return;
        }
        let Some(pending) = self.pending_join.take() else {
            return;
        };

        match result {
            Ok(()) => {
                let present = session.state().remote_participants.len();
                self.media = Some(session);
                if present > 0 && !matches!(self.phase, CallPhase::Active { .. }) {
                    self.remote_present(room, present);
                }
                pending.waiter.reply(Ok(()));
            }
            Err(e) => {
                warn!(target: "call.coordinator", room = %room, error = %e, "Media join failed");
                drop(session);
                self.finish(
                    room,
                    Outcome::Ended,
                    Some(e.client_message()),
                    false,
                    Notice::End(EndReason::MediaError),
                );
                pending.waiter.reply(Err(CallError::Media(e)));
            }
        }
    }

    /// Cancel an in-flight join and fail whoever is waiting on it.
    fn abandon_join(&mut self) {
        if let Some(pending) = self.pending_join.take() {
            debug!(target: "call.coordinator", room = %pending.room, join_id = pending.id, "Abandoning media join");
            pending.cancel.cancel();
            pending.waiter.reply(Err(CallError::CallEnded(
                "The call ended before media connected".to_string(),
            )));
        }
    }

    fn handle_media(&mut self, room: &RoomName, signal: MediaSignal) {
        if !self.matches_active(room) || self.phase.is_terminal() {
            debug!(target: "call.coordinator", room = %room, signal = ?signal, "Ignoring stale media event");
            return;
        }

        match signal {
            MediaSignal::ParticipantJoined { identity } => {
                let participants = self
                    .media
                    .as_ref()
                    .map_or(1, |m| m.state().remote_participants.len())
                    .max(1);
                info!(target: "call.coordinator", room = %room, identity = %identity, "Remote party joined");
                self.remote_present(room, participants);
            }
            MediaSignal::ParticipantLeft {
                identity,
                remaining,
            } => {
                debug!(target: "call.coordinator", room = %room, identity = %identity, remaining, "Remote party left");
                if remaining > 0 && matches!(self.phase, CallPhase::Active { .. }) {
                    self.set_phase(CallPhase::Active {
                        participants: remaining,
                    });
                    self.broadcast(StatusEvent::Connected {
                        room: room.clone(),
                        participants: remaining,
                    });
                }
            }
            MediaSignal::Disconnected => {
                self.finish(
                    room,
                    Outcome::Ended,
                    Some("Call ended".to_string()),
                    true,
                    Notice::End(EndReason::Disconnected),
                );
            }
            MediaSignal::Error(e) => {
                self.finish(
                    room,
                    Outcome::Ended,
                    Some(e.client_message()),
                    false,
                    Notice::End(EndReason::Disconnected),
                );
            }
        }
    }

    fn handle_no_answer(&mut self, room: &RoomName) {
        let armed = self
            .no_answer
            .as_ref()
            .is_some_and(|token| !token.is_cancelled());
        let waiting = matches!(self.phase, CallPhase::Ringing | CallPhase::Connecting);
        if !armed || !waiting || !self.matches_active(room) {
            debug!(target: "call.coordinator", room = %room, "Ignoring stale no-answer timeout");
            return;
        }

        info!(target: "call.coordinator", room = %room, "No answer before timeout");
        self.finish(
            room,
            Outcome::Missed,
            Some("No answer".to_string()),
            true,
            Notice::End(EndReason::Missed),
        );
    }

    fn remote_present(&mut self, room: &RoomName, participants: usize) {
        self.disarm_no_answer();
        self.set_phase(CallPhase::Active { participants });
        self.broadcast(StatusEvent::Connected {
            room: room.clone(),
            participants,
        });
    }

    fn arm_no_answer(&mut self, room: &RoomName) {
        self.disarm_no_answer();
        let token = self.cancel_token.child_token();
        self.no_answer = Some(token.clone());
        spawn_timer(
            self.mailbox.clone(),
            token,
            self.settings.no_answer_timeout,
            CoordinatorMessage::NoAnswerTimeout { room: room.clone() },
        );
    }

    fn disarm_no_answer(&mut self) {
        if let Some(token) = self.no_answer.take() {
            token.cancel();
        }
    }

    // ------------------------------------------------------------------
    // Slot management
    // ------------------------------------------------------------------

    /// Move the active call to its terminal state.
    ///
    /// No-op unless `room` is the active, unfinished call. Devices are
    /// released before `Finished` is broadcast. The backend notice runs in
    /// the background and its failures are only logged.
    fn finish(
        &mut self,
        room: &RoomName,
        outcome: Outcome,
        message: Option<String>,
        auto_close: bool,
        notice: Notice,
    ) {
        if !self.matches_active(room) || self.phase.is_terminal() {
            return;
        }
        let Some(call) = self.active.clone() else {
            return;
        };

        self.release_local_resources();
        let terminal = Terminal {
            outcome,
            auto_close: (auto_close && message.is_some()).then_some(self.settings.terminal_auto_close),
            message,
        };
        self.set_phase(CallPhase::Finished(terminal.clone()));
        self.remember_finished(room);
        metrics::record_call_outcome(outcome.as_str());
        info!(
            target: "call.coordinator",
            room = %room,
            session_id = %call.session.id,
            outcome = %outcome,
            "Call finished"
        );

        self.send_notice(&call, notice);
        self.broadcast(StatusEvent::Finished {
            room: room.clone(),
            terminal: terminal.clone(),
        });

        match (&terminal.message, terminal.auto_close) {
            (None, _) => self.clear_slot(),
            (Some(_), Some(delay)) => self.arm_auto_close(room, delay),
            (Some(_), None) => {}
        }
    }

    /// Tell the backend how the call ended without holding up the loop.
    fn send_notice(&self, call: &ActiveCall, notice: Notice) {
        let service = Arc::clone(&self.service);
        let email = self.settings.local_email.clone();
        let room = call.room().clone();
        match notice {
            Notice::None => {}
            Notice::End(reason) => {
                let target = end_target(call, reason);
                tokio::spawn(async move {
                    if let Err(e) = service.end(&target, &email, reason).await {
                        warn!(target: "call.coordinator", room = %room, error = %e, "Failed to end call on backend");
                    }
                });
            }
            Notice::Reject => {
                let id = call.session.id;
                tokio::spawn(async move {
                    if let Err(e) = service.reject(id, &email).await {
                        warn!(target: "call.coordinator", room = %room, error = %e, "Failed to reject call on backend");
                    }
                });
            }
        }
    }

    fn arm_auto_close(&mut self, room: &RoomName, delay: Duration) {
        if let Some(token) = self.auto_close.take() {
            token.cancel();
        }
        let token = self.cancel_token.child_token();
        self.auto_close = Some(token.clone());
        spawn_timer(
            self.mailbox.clone(),
            token,
            delay,
            CoordinatorMessage::AutoClose { room: room.clone() },
        );
    }

    /// Release the slot back to idle.
    fn clear_slot(&mut self) {
        if let Some(token) = self.auto_close.take() {
            token.cancel();
        }
        self.release_local_resources();
        let previous = self.active.take();
        self.set_phase(CallPhase::Idle);
        metrics::set_call_active(false);
        if let Some(call) = previous {
            debug!(target: "call.coordinator", room = %call.room(), "Call slot cleared");
            self.broadcast(StatusEvent::Cleared {
                room: call.room().clone(),
            });
        }
    }

    /// Stop timers, drop any pending join and leave media. Runs on every
    /// exit path.
    fn release_local_resources(&mut self) {
        self.disarm_no_answer();
        self.abandon_join();
        if let Some(mut media) = self.media.take() {
            media.leave();
        }
    }

    fn remember_finished(&mut self, room: &RoomName) {
        if self.finished_rooms.contains(room) {
            return;
        }
        if self.finished_rooms.len() >= FINISHED_ROOMS_CAPACITY {
            self.finished_rooms.pop_front();
        }
        self.finished_rooms.push_back(room.clone());
    }

    fn matches_active(&self, room: &RoomName) -> bool {
        self.active.as_ref().is_some_and(|call| call.room() == room)
    }

    fn lookup(&self, room: &RoomName) -> Lookup {
        match &self.active {
            Some(call) if call.room() == room => {
                if self.phase.is_terminal() {
                    Lookup::Finished
                } else {
                    Lookup::Active(call.clone())
                }
            }
            _ if self.finished_rooms.contains(room) => Lookup::Finished,
            _ => Lookup::Unknown,
        }
    }

    fn set_phase(&mut self, phase: CallPhase) {
        debug!(
            target: "call.coordinator",
            from = self.phase.as_str(),
            to = phase.as_str(),
            "Phase transition"
        );
        self.phase = phase;
    }

    fn broadcast(&mut self, event: StatusEvent) {
        self.subscribers
            .retain(|id, subscriber| match subscriber.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(target: "call.coordinator", subscriber = id, "Subscriber lagging, status event dropped");
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            });
    }
}

/// Local hang-ups and media drops use the medium-specific room endpoint;
/// timeouts and join failures end by session id.
fn end_target(call: &ActiveCall, reason: EndReason) -> EndTarget {
    match reason {
        EndReason::Hangup | EndReason::Disconnected => EndTarget::Room {
            room: call.room().clone(),
            medium: call.medium(),
        },
        EndReason::Missed | EndReason::MediaError => EndTarget::Session(call.session.id),
    }
}

/// Join the room and hand the session back to the coordinator.
async fn run_join(
    mailbox: mpsc::WeakSender<CoordinatorMessage>,
    join_id: u64,
    room: RoomName,
    mut session: MediaSession,
    credential: Option<SecretString>,
    cancel: CancellationToken,
) {
    let result = tokio::select! {
        () = cancel.cancelled() => None,
        result = session.join(&room, credential.as_ref()) => Some(result),
    };
    let Some(result) = result else {
        debug!(target: "call.coordinator", room = %room, join_id, "Media join abandoned");
        return;
    };
    if let Some(mailbox) = mailbox.upgrade() {
        let _ = mailbox
            .send(CoordinatorMessage::JoinCompleted {
                join_id,
                room,
                session,
                result,
            })
            .await;
    }
}

fn spawn_timer(
    mailbox: mpsc::WeakSender<CoordinatorMessage>,
    token: CancellationToken,
    delay: Duration,
    message: CoordinatorMessage,
) {
    tokio::spawn(async move {
        tokio::select! {
            () = token.cancelled() => {}
            () = tokio::time::sleep(delay) => {
                if let Some(mailbox) = mailbox.upgrade() {
                    let _ = mailbox.send(message).await;
                }
            }
        }
    });
}
