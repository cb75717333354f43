//! Call Coordinator: the single owner of call state on a client.
//!
//! # Architecture
//!
//! ```text
//! surfaces ──commands──▶ CallCoordinatorHandle ──▶ ┌─────────────────┐
//! transport ──pushes──────────────────────────────▶ │ CallCoordinator │──▶ CallSessionApi
//! media bridge / timers ──────────────────────────▶ │   (one task)    │──▶ MediaSession
//!                                                   └────────┬────────┘
//!                                                            ▼
//!                                                   StatusEvent subscribers
//! ```
//!
//! At most one call occupies the slot. Every transition is keyed by room
//! name, and a finished call never moves again.

mod actor;
mod messages;
mod state;

pub use actor::{CallCoordinator, CallCoordinatorHandle, CoordinatorSettings, Subscription};
pub use messages::CallRequest;
pub use state::{ActiveCall, CallPhase, CallSnapshot, Outcome, StatusEvent, Terminal};
