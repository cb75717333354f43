//! Notification Transport.
//!
//! A persistent STOMP-over-WebSocket connection to the signaling broker that
//! pushes call-lifecycle events to the logged-in user.
//!
//! # Components
//!
//! - `frame` - STOMP 1.2 frame codec
//! - `channels` - per-user destinations and parsed notifications
//! - `client` - connection task with bounded connect and fixed-delay reconnect
//!
//! Transport failures never surface to the user: they are logged, and the
//! client simply shows no incoming call until the connection is back.

pub mod channels;
pub mod client;
pub mod frame;

pub use channels::{CallNotification, Channel};
pub use client::{NotificationTransport, TransportHandle, TransportSettings};
pub use frame::{Command, Frame, FrameError};

use thiserror::Error;

/// Transport error type. Logged only, never shown to the user.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("WebSocket connect failed: {0}")]
    Connect(String),

    #[error("Broker refused the session: {0}")]
    Refused(String),

    #[error("Connection closed during handshake")]
    HandshakeClosed,

    #[error("Unexpected frame during handshake: {0}")]
    UnexpectedFrame(Command),

    #[error("Connection lost: {0}")]
    Lost(String),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Audible cue for an incoming call.
pub trait NotificationSound: Send + Sync {
    fn play(&self);
}

/// Ringer that does nothing, for headless use.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl NotificationSound for Silent {
    fn play(&self) {}
}
