//! Media Session Adapter.
//!
//! Wraps a room-based real-time media transport behind two traits so the
//! third-party SDK stays an external collaborator:
//!
//! - [`MediaTransport`] joins a named room with a per-party credential
//! - [`MediaRoom`] is the joined room (track toggles, disconnect)
//!
//! [`MediaSession`] is the adapter the coordinator drives: join/leave,
//! toggles, observable [`MediaState`], and [`MediaListener`] callbacks.

pub mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use session::{MediaListener, MediaSession, MediaState, MediaStatus, RemoteTrack};
#[cfg(any(test, feature = "test-utils"))]
pub use mock::{JoinRecord, MockMediaTransport, RoomFlags};

use crate::models::Medium;
use common::secret::SecretString;
use common::types::RoomName;
use thiserror::Error;
use tokio::sync::mpsc;

/// Media error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    /// The user denied access to a capture device.
    #[error("Permission denied for {0}")]
    PermissionDenied(String),

    /// No usable capture device.
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The media transport refused or failed the join.
    #[error("Failed to connect to room: {0}")]
    ConnectFailed(String),

    /// No access credential was issued for this party.
    #[error("Missing media access credential")]
    MissingCredential,

    /// `join` called on an adapter that is already in a room.
    #[error("Already joined room {0}")]
    AlreadyJoined(String),

    /// The room dropped with an error while connected.
    #[error("Room disconnected: {0}")]
    Disconnected(String),
}

impl MediaError {
    /// Returns a user-facing error message for the modal banner.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            MediaError::PermissionDenied(device) => {
                format!("Access to your {device} was denied, allow it and try again")
            }
            MediaError::DeviceUnavailable(device) => {
                format!("No {device} is available")
            }
            MediaError::ConnectFailed(_) | MediaError::MissingCredential => {
                "Could not connect to the call".to_string()
            }
            MediaError::AlreadyJoined(_) => "Already connected to a call".to_string(),
            MediaError::Disconnected(_) => "The call connection was lost".to_string(),
        }
    }
}

/// Kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Local tracks to capture and publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalTracks {
    pub audio: bool,
    pub video: bool,
}

impl LocalTracks {
    /// Audio always; video only for the video medium.
    #[must_use]
    pub const fn for_medium(medium: Medium) -> Self {
        Self {
            audio: true,
            video: medium.captures_video(),
        }
    }
}

/// Events a joined room reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    ParticipantConnected { identity: String },
    ParticipantDisconnected { identity: String },
    TrackSubscribed { identity: String, kind: TrackKind },
    TrackUnsubscribed { identity: String, kind: TrackKind },
    /// The room closed underneath us. `error` is set for network or
    /// transport failures, `None` for a clean server-side close.
    Disconnected { error: Option<String> },
}

/// A joined media room.
///
/// Implementations must make `disconnect` idempotent; it releases local
/// capture devices.
pub trait MediaRoom: Send + Sync {
    /// Remote participants already present when the join completed.
    fn remote_participants(&self) -> Vec<String>;

    /// Enable or disable a published local track.
    fn set_track_enabled(&self, kind: TrackKind, enabled: bool);

    /// Leave the room and stop local capture.
    fn disconnect(&self);
}

/// The third-party real-time media transport.
#[async_trait::async_trait]
pub trait MediaTransport: Send + Sync {
    /// Capture local tracks, join `room`, and subscribe to remote tracks.
    ///
    /// Resolves once the local join completes, whether or not a remote
    /// participant is present.
    async fn connect(
        &self,
        room: &RoomName,
        credential: &SecretString,
        tracks: LocalTracks,
    ) -> Result<(Box<dyn MediaRoom>, mpsc::Receiver<RoomEvent>), MediaError>;
}
