//! Observability for the call client.
//!
//! Logging goes through `tracing` with one target per component:
//!
//! | Target | Component |
//! |--------|-----------|
//! | `call.transport` | Notification Transport |
//! | `call.service` | Call Session Service client |
//! | `call.media` | Media Session Adapter |
//! | `call.coordinator` | Call Coordinator |
//! | `call.surface` | Modals and badge |
//!
//! Credentials are never logged. Stale and duplicate events log at `debug`.

pub mod metrics;

pub use metrics::{
    record_call_initiated, record_call_outcome, record_dropped_frame,
    record_transport_reconnect, set_call_active,
};
