//! Call UI surfaces as headless view models.
//!
//! Each surface holds its own coordinator subscription and reacts to status
//! events for the room it tracks. Several can be mounted at once (a modal
//! opened from a product page, the global incoming-call badge); they agree
//! because they all follow the same coordinator.
//!
//! - [`CallModal`] - voice or video modal for one room
//! - [`IncomingCallBadge`] - ringing incoming call, accept/decline
//! - [`ModalHost`] - mounts a modal for every opened session

mod badge;
mod host;
mod modal;

pub use badge::{BadgeChange, IncomingCallBadge};
pub use host::ModalHost;
pub use modal::{CallModal, ModalView};
