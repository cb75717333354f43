//! `MediaSession` - the adapter the coordinator drives for one call.
//!
//! Owns local capture between `join` and `leave`. Every exit path (leave,
//! failed join, drop) disconnects the room, so devices are never held past
//! the adapter's lifetime.
//!
//! Room events are pumped by a background task that updates the observable
//! [`MediaState`] and invokes the [`MediaListener`]. The last remote
//! participant leaving is reported as a disconnect: in a two-party call the
//! room is over at that point.

use super::{LocalTracks, MediaError, MediaRoom, MediaTransport, RoomEvent, TrackKind};
use crate::models::Medium;
use common::secret::SecretString;
use common::types::RoomName;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Connection status of the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// A subscribed remote track, the handle a renderer attaches a sink to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub identity: String,
    pub kind: TrackKind,
}

/// Observable media state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaState {
    pub status: MediaStatus,
    pub remote_participants: Vec<String>,
    pub local_tracks: LocalTracks,
    pub remote_tracks: Vec<RemoteTrack>,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    /// User-facing message of the last join or room error.
    pub error: Option<String>,
}

impl MediaState {
    fn initial(medium: Medium) -> Self {
        let local_tracks = LocalTracks::for_medium(medium);
        Self {
            status: MediaStatus::Disconnected,
            remote_participants: Vec::new(),
            local_tracks,
            remote_tracks: Vec::new(),
            audio_enabled: local_tracks.audio,
            video_enabled: local_tracks.video,
            error: None,
        }
    }
}

/// Callbacks for room events that matter to call state.
#[async_trait::async_trait]
pub trait MediaListener: Send + Sync {
    /// A remote participant is now in the room.
    async fn on_participant_joined(&self, identity: &str);

    /// A remote participant left; `remaining` remote participants are left.
    async fn on_participant_left(&self, identity: &str, remaining: usize);

    /// The room ended without a local `leave`.
    async fn on_disconnected(&self);

    /// The room reported an error. Always followed by `on_disconnected`.
    async fn on_error(&self, error: MediaError);
}

struct JoinedRoom {
    name: RoomName,
    room: Arc<dyn MediaRoom>,
    cancel: CancellationToken,
    pump: JoinHandle<()>,
}

/// Media Session Adapter for one medium.
pub struct MediaSession {
    transport: Arc<dyn MediaTransport>,
    medium: Medium,
    listener: Arc<dyn MediaListener>,
    joined: Option<JoinedRoom>,
    state: Arc<watch::Sender<MediaState>>,
}

impl MediaSession {
    /// Create an adapter that has not joined any room yet.
    pub fn new(
        transport: Arc<dyn MediaTransport>,
        medium: Medium,
        listener: Arc<dyn MediaListener>,
    ) -> Self {
        let (state, _) = watch::channel(MediaState::initial(medium));
        Self {
            transport,
            medium,
            listener,
            joined: None,
            state: Arc::new(state),
        }
    }

    /// Medium this adapter captures for.
    #[must_use]
    pub fn medium(&self) -> Medium {
        self.medium
    }

    /// Room currently joined, if any.
    #[must_use]
    pub fn room(&self) -> Option<&RoomName> {
        self.joined.as_ref().map(|j| &j.name)
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> MediaState {
        self.state.borrow().clone()
    }

    /// Watch state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<MediaState> {
        self.state.subscribe()
    }

    /// Join `room` with this party's credential.
    ///
    /// Captures audio (and video for the video medium), publishes, and
    /// subscribes to remote tracks. Returns once the local join completes.
    ///
    /// # Errors
    ///
    /// - `MediaError::MissingCredential` if no credential was issued
    /// - `MediaError::AlreadyJoined` if a room is already joined
    /// - any error the transport reports for the join
    #[instrument(skip_all, fields(room = %room, medium = %self.medium))]
    pub async fn join(
        &mut self,
        room: &RoomName,
        credential: Option<&SecretString>,
    ) -> Result<(), MediaError> {
        if let Some(joined) = &self.joined {
            return Err(MediaError::AlreadyJoined(joined.name.to_string()));
        }
        let Some(credential) = credential else {
            warn!(target: "call.media", room = %room, "No access credential for media room");
            self.state.send_modify(|s| {
                s.error = Some(MediaError::MissingCredential.client_message());
            });
            return Err(MediaError::MissingCredential);
        };

        self.state.send_modify(|s| {
            s.status = MediaStatus::Connecting;
            s.error = None;
        });

        let local_tracks = LocalTracks::for_medium(self.medium);
        let (room_handle, events) = match self
            .transport
            .connect(room, credential, local_tracks)
            .await
        {
            Ok(joined) => joined,
            Err(e) => {
                warn!(target: "call.media", room = %room, error = %e, "Failed to join media room");
                self.state.send_modify(|s| {
                    s.status = MediaStatus::Disconnected;
                    s.error = Some(e.client_message());
                });
                return Err(e);
            }
        };

        let room_handle: Arc<dyn MediaRoom> = Arc::from(room_handle);
        let present = room_handle.remote_participants();
        self.state.send_modify(|s| {
            s.status = MediaStatus::Connected;
            s.remote_participants.clone_from(&present);
            s.remote_tracks.clear();
            s.local_tracks = local_tracks;
            s.audio_enabled = local_tracks.audio;
            s.video_enabled = local_tracks.video;
        });

        let cancel = CancellationToken::new();
        let pump = tokio::spawn(pump_room_events(
            room.clone(),
            events,
            Arc::clone(&self.state),
            Arc::clone(&self.listener),
            cancel.clone(),
        ));

        info!(
            target: "call.media",
            room = %room,
            medium = %self.medium,
            remote_participants = present.len(),
            "Joined media room"
        );

        self.joined = Some(JoinedRoom {
            name: room.clone(),
            room: room_handle,
            cancel,
            pump,
        });
        Ok(())
    }

    /// Leave the room and release capture. No-op if never joined.
    pub fn leave(&mut self) {
        if let Some(room) = self.release() {
            info!(target: "call.media", room = %room, "Left media room");
        }
    }

    /// Flip the local audio track. Returns the new enabled flag.
    pub fn toggle_audio(&self) -> bool {
        let enabled = !self.state.borrow().audio_enabled;
        if let Some(joined) = &self.joined {
            joined.room.set_track_enabled(TrackKind::Audio, enabled);
        }
        self.state.send_modify(|s| s.audio_enabled = enabled);
        debug!(target: "call.media", enabled, "Audio toggled");
        enabled
    }

    /// Flip the local video track. Always `false` for the voice medium.
    pub fn toggle_video(&self) -> bool {
        if !self.medium.captures_video() {
            return false;
        }
        let enabled = !self.state.borrow().video_enabled;
        if let Some(joined) = &self.joined {
            joined.room.set_track_enabled(TrackKind::Video, enabled);
        }
        self.state.send_modify(|s| s.video_enabled = enabled);
        debug!(target: "call.media", enabled, "Video toggled");
        enabled
    }

    fn release(&mut self) -> Option<RoomName> {
        let joined = self.joined.take()?;
        joined.cancel.cancel();
        joined.pump.abort();
        joined.room.disconnect();
        self.state.send_modify(|s| {
            s.status = MediaStatus::Disconnected;
            s.remote_participants.clear();
            s.remote_tracks.clear();
        });
        Some(joined.name)
    }
}

impl Drop for MediaSession {
    fn drop(&mut self) {
        if let Some(room) = self.release() {
            debug!(target: "call.media", room = %room, "Released media room on drop");
        }
    }
}

/// Apply room events to state and forward them to the listener.
async fn pump_room_events(
    room: RoomName,
    mut events: mpsc::Receiver<RoomEvent>,
    state: Arc<watch::Sender<MediaState>>,
    listener: Arc<dyn MediaListener>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Some(RoomEvent::ParticipantConnected { identity }) => {
                state.send_modify(|s| {
                    if !s.remote_participants.contains(&identity) {
                        s.remote_participants.push(identity.clone());
                    }
                });
                debug!(target: "call.media", room = %room, identity = %identity, "Participant connected");
                listener.on_participant_joined(&identity).await;
            }
            Some(RoomEvent::ParticipantDisconnected { identity }) => {
                let mut remaining = 0;
                state.send_modify(|s| {
                    s.remote_participants.retain(|p| p != &identity);
                    s.remote_tracks.retain(|t| t.identity != identity);
                    remaining = s.remote_participants.len();
                });
                debug!(target: "call.media", room = %room, identity = %identity, remaining, "Participant disconnected");
                listener.on_participant_left(&identity, remaining).await;
                if remaining == 0 {
                    info!(target: "call.media", room = %room, "Last remote participant left");
                    listener.on_disconnected().await;
                    break;
                }
            }
            Some(RoomEvent::TrackSubscribed { identity, kind }) => {
                state.send_modify(|s| s.remote_tracks.push(RemoteTrack { identity, kind }));
            }
            Some(RoomEvent::TrackUnsubscribed { identity, kind }) => {
                state.send_modify(|s| {
                    s.remote_tracks
                        .retain(|t| !(t.identity == identity && t.kind == kind));
                });
            }
            Some(RoomEvent::Disconnected { error }) => {
                let error = error.map(MediaError::Disconnected);
                state.send_modify(|s| {
                    s.status = MediaStatus::Disconnected;
                    s.remote_participants.clear();
                    s.remote_tracks.clear();
                    s.error = error.as_ref().map(MediaError::client_message);
                });
                info!(target: "call.media", room = %room, error = ?error, "Media room disconnected");
                if let Some(error) = error {
                    listener.on_error(error).await;
                }
                listener.on_disconnected().await;
                break;
            }
            None => {
                // Transport dropped the event stream without a Disconnected event
                state.send_modify(|s| s.status = MediaStatus::Disconnected);
                listener.on_disconnected().await;
                break;
            }
        }
    }
}
