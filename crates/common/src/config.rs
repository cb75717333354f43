//! Shared configuration types.

use serde::{Deserialize, Serialize};

/// Default log filter when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "call_client=info";

/// Logging configuration shared by binaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log filter directive (e.g. `call_client=debug`).
    pub log_level: String,
    /// Enable JSON-formatted logs
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_FILTER.to_string(),
            json_logs: false,
        }
    }
}
