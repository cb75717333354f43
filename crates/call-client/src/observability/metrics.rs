//! Metrics for the call client.
//!
//! Recorded through the `metrics` facade; the embedding application decides
//! whether and how to export them.
//!
//! All metrics follow Prometheus naming conventions:
//! - `call_` prefix
//! - `_total` suffix for counters
//!
//! # Cardinality
//!
//! - `medium`: 2 values (voice, video)
//! - `outcome`: 4 values (ended, declined, missed, failed)
//! - `reason`: bounded by the drop reasons below (~4 values)

use crate::models::Medium;
use metrics::{counter, gauge};

/// Count a call placed by the local party.
///
/// Metric: `call_initiated_total`
/// Labels: `medium`
pub fn record_call_initiated(medium: Medium) {
    counter!("call_initiated_total", "medium" => medium.as_str()).increment(1);
}

/// Count a call reaching a terminal state.
///
/// Metric: `call_outcome_total`
/// Labels: `outcome` (ended, declined, missed, failed)
pub fn record_call_outcome(outcome: &'static str) {
    counter!("call_outcome_total", "outcome" => outcome).increment(1);
}

/// Set whether a call currently occupies the active slot.
///
/// Metric: `call_active`
pub fn set_call_active(active: bool) {
    gauge!("call_active").set(if active { 1.0 } else { 0.0 });
}

/// Count a transport reconnect attempt.
///
/// Metric: `call_transport_reconnects_total`
pub fn record_transport_reconnect() {
    counter!("call_transport_reconnects_total").increment(1);
}

/// Count an inbound transport frame that was dropped.
///
/// Metric: `call_transport_dropped_frames_total`
/// Labels: `reason` (malformed_frame, unknown_destination, malformed_payload,
/// missing_destination)
pub fn record_dropped_frame(reason: &'static str) {
    counter!("call_transport_dropped_frames_total", "reason" => reason).increment(1);
}
