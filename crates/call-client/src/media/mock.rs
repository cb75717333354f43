//! Scripted media transport for tests.
//!
//! Records every join, tracks whether each room still holds local capture,
//! and lets tests inject room events (remote joins, leaves, drops).
//! A stalling transport never completes its joins, which stands in for a
//! media server that accepted the connection and went quiet.

use super::{LocalTracks, MediaError, MediaRoom, MediaTransport, RoomEvent, TrackKind};
use common::secret::{ExposeSecret, SecretString};
use common::types::RoomName;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

const ROOM_EVENT_BUFFER: usize = 32;

/// One recorded join attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRecord {
    pub room: RoomName,
    pub credential: String,
    pub tracks: LocalTracks,
}

/// Device and track flags of one mock room.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomFlags {
    pub capturing: bool,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub disconnect_calls: usize,
}

struct RoomControl {
    events: mpsc::Sender<RoomEvent>,
    flags: Arc<Mutex<RoomFlags>>,
}

#[derive(Default)]
struct Inner {
    failure: Option<MediaError>,
    stall: bool,
    remote_participants: Vec<String>,
    joins: Vec<JoinRecord>,
    rooms: HashMap<RoomName, RoomControl>,
}

/// Mock media transport.
#[derive(Default)]
pub struct MockMediaTransport {
    inner: Mutex<Inner>,
    in_flight: Arc<AtomicUsize>,
}

/// Counts a join that is still waiting inside `connect`.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockMediaTransport {
    /// Create a transport whose joins succeed into empty rooms.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every join fail with `error`.
    #[must_use]
    pub fn failing(self, error: MediaError) -> Self {
        lock(&self.inner).failure = Some(error);
        self
    }

    /// Make every join hang until the joining task is cancelled.
    #[must_use]
    pub fn stalling(self) -> Self {
        lock(&self.inner).stall = true;
        self
    }

    /// Remote participants reported as already present on join.
    #[must_use]
    pub fn with_remote_participants(self, identities: Vec<String>) -> Self {
        lock(&self.inner).remote_participants = identities;
        self
    }

    /// Change the join failure after construction.
    pub fn set_failure(&self, error: Option<MediaError>) {
        lock(&self.inner).failure = error;
    }

    /// Change whether joins hang after construction.
    pub fn set_stalling(&self, stall: bool) {
        lock(&self.inner).stall = stall;
    }

    /// Joins currently stuck inside `connect`.
    #[must_use]
    pub fn joins_in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// All join attempts, in order.
    #[must_use]
    pub fn joins(&self) -> Vec<JoinRecord> {
        lock(&self.inner).joins.clone()
    }

    /// Number of join attempts.
    #[must_use]
    pub fn join_count(&self) -> usize {
        lock(&self.inner).joins.len()
    }

    /// Flags of a joined room.
    #[must_use]
    pub fn room_flags(&self, room: &RoomName) -> Option<RoomFlags> {
        let inner = lock(&self.inner);
        inner.rooms.get(room).map(|c| lock(&c.flags).clone())
    }

    /// Whether local capture is held for `room`.
    #[must_use]
    pub fn is_capturing(&self, room: &RoomName) -> bool {
        self.room_flags(room).is_some_and(|f| f.capturing)
    }

    /// Whether any joined room still holds local capture.
    #[must_use]
    pub fn any_capturing(&self) -> bool {
        let inner = lock(&self.inner);
        inner.rooms.values().any(|c| lock(&c.flags).capturing)
    }

    /// Inject a room event. Returns `false` if nobody is listening.
    pub async fn emit(&self, room: &RoomName, event: RoomEvent) -> bool {
        let sender = lock(&self.inner).rooms.get(room).map(|c| c.events.clone());
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    /// A remote participant joins `room`.
    pub async fn participant_joins(&self, room: &RoomName, identity: &str) -> bool {
        self.emit(
            room,
            RoomEvent::ParticipantConnected {
                identity: identity.to_string(),
            },
        )
        .await
    }

    /// A remote participant leaves `room`.
    pub async fn participant_leaves(&self, room: &RoomName, identity: &str) -> bool {
        self.emit(
            room,
            RoomEvent::ParticipantDisconnected {
                identity: identity.to_string(),
            },
        )
        .await
    }

    /// The room drops, optionally with an error.
    pub async fn drop_room(&self, room: &RoomName, error: Option<&str>) -> bool {
        self.emit(
            room,
            RoomEvent::Disconnected {
                error: error.map(str::to_string),
            },
        )
        .await
    }
}

struct MockRoom {
    participants: Vec<String>,
    flags: Arc<Mutex<RoomFlags>>,
}

impl MediaRoom for MockRoom {
    fn remote_participants(&self) -> Vec<String> {
        self.participants.clone()
    }

    fn set_track_enabled(&self, kind: TrackKind, enabled: bool) {
        let mut flags = lock(&self.flags);
        match kind {
            TrackKind::Audio => flags.audio_enabled = enabled,
            TrackKind::Video => flags.video_enabled = enabled,
        }
    }

    fn disconnect(&self) {
        let mut flags = lock(&self.flags);
        flags.capturing = false;
        flags.disconnect_calls += 1;
    }
}

#[async_trait::async_trait]
impl MediaTransport for MockMediaTransport {
    async fn connect(
        &self,
        room: &RoomName,
        credential: &SecretString,
        tracks: LocalTracks,
    ) -> Result<(Box<dyn MediaRoom>, mpsc::Receiver<RoomEvent>), MediaError> {
        let stall = {
            let mut inner = lock(&self.inner);
            inner.joins.push(JoinRecord {
                room: room.clone(),
                credential: credential.expose_secret().to_string(),
                tracks,
            });
            if let Some(error) = &inner.failure {
                return Err(error.clone());
            }
            inner.stall
        };

        if stall {
            let _in_flight = InFlight::enter(&self.in_flight);
            std::future::pending::<()>().await;
        }

        let mut inner = lock(&self.inner);

        let flags = Arc::new(Mutex::new(RoomFlags {
            capturing: true,
            audio_enabled: tracks.audio,
            video_enabled: tracks.video,
            disconnect_calls: 0,
        }));
        let (events, receiver) = mpsc::channel(ROOM_EVENT_BUFFER);
        inner.rooms.insert(
            room.clone(),
            RoomControl {
                events,
                flags: Arc::clone(&flags),
            },
        );

        let media_room = MockRoom {
            participants: inner.remote_participants.clone(),
            flags,
        };
        Ok((Box::new(media_room), receiver))
    }
}
