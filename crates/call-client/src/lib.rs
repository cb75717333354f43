//! Marketplace call client.
//!
//! Coordinates one-to-one voice and video calls between buyers and vendors:
//! a caller creates a session on the backend registry, the callee learns
//! about it through a push notification, both parties join a media room,
//! and every change on either side converges both clients on the same
//! terminal state.
//!
//! # Architecture
//!
//! ```text
//! NotificationTransport ──pushes──┐
//!                                 ▼
//! surfaces ──commands──▶ CallCoordinator ──▶ CallSessionApi (REST)
//!     ▲                           │      └──▶ MediaSession (room SDK)
//!     └────── StatusEvent ────────┘
//! ```
//!
//! [`app::CallClient`] is the composition root: it builds all of the above
//! from one [`config::Config`].
//!
//! # Modules
//!
//! - [`app`] - composition root
//! - [`config`] - client configuration from environment
//! - [`errors`] - error types with user-facing messages
//! - [`models`] - call session payloads
//! - [`service`] - Call Session Service client
//! - [`transport`] - STOMP-over-WebSocket Notification Transport
//! - [`media`] - Media Session Adapter
//! - [`coordinator`] - Call Coordinator actor
//! - [`surfaces`] - modal, badge, and modal host view models
//! - [`observability`] - metrics helpers

pub mod app;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod media;
pub mod models;
pub mod observability;
pub mod service;
pub mod surfaces;
pub mod transport;

pub use app::CallClient;
pub use coordinator::{CallCoordinator, CallCoordinatorHandle, CallRequest, StatusEvent};
pub use errors::CallError;
