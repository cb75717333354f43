//! Call client configuration.
//!
//! Configuration is loaded from environment variables. The bearer token is
//! redacted in Debug output.

use common::config::ObservabilityConfig;
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default no-answer timeout on the caller side, in seconds.
pub const DEFAULT_NO_ANSWER_TIMEOUT_SECONDS: u64 = 30;

/// Default time allowed for the transport connect + CONNECTED handshake.
pub const DEFAULT_TRANSPORT_CONNECT_TIMEOUT_SECONDS: u64 = 10;

/// Default fixed delay between transport reconnect attempts.
pub const DEFAULT_TRANSPORT_RECONNECT_DELAY_SECONDS: u64 = 5;

/// Default HTTP request timeout for the call registry.
pub const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 10;

/// Default auto-close delay for terminal states that carry a message.
pub const DEFAULT_TERMINAL_AUTO_CLOSE_MILLIS: u64 = 2500;

/// Call client configuration.
#[derive(Clone)]
pub struct Config {
    /// Base URL of the backend call registry (e.g. `https://api.example.com`).
    pub api_base_url: String,

    /// WebSocket URL of the STOMP signaling endpoint.
    pub signaling_url: String,

    /// Identity (email) of the local party.
    pub user_email: String,

    /// Optional bearer token for the REST API and the STOMP CONNECT frame.
    pub auth_token: Option<SecretString>,

    /// How long the caller waits for the callee to join the media room.
    pub no_answer_timeout: Duration,

    /// Bound on establishing the transport connection.
    pub transport_connect_timeout: Duration,

    /// Fixed backoff between transport reconnect attempts.
    pub transport_reconnect_delay: Duration,

    /// HTTP request timeout.
    pub http_timeout: Duration,

    /// Delay before a terminal state with a message closes itself.
    pub terminal_auto_close: Duration,

    /// Log filter and format for binaries.
    pub observability: ObservabilityConfig,
}

/// Custom Debug implementation that redacts the auth token.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_base_url", &self.api_base_url)
            .field("signaling_url", &self.signaling_url)
            .field("user_email", &self.user_email)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("no_answer_timeout", &self.no_answer_timeout)
            .field("transport_connect_timeout", &self.transport_connect_timeout)
            .field("transport_reconnect_delay", &self.transport_reconnect_delay)
            .field("http_timeout", &self.http_timeout)
            .field("terminal_auto_close", &self.terminal_auto_close)
            .field("observability", &self.observability)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let api_base_url = required(vars, "CALL_API_BASE_URL")?
            .trim_end_matches('/')
            .to_string();

        let signaling_url = required(vars, "CALL_SIGNALING_URL")?;
        if !signaling_url.starts_with("ws://") && !signaling_url.starts_with("wss://") {
            return Err(ConfigError::InvalidValue(format!(
                "CALL_SIGNALING_URL must be a ws:// or wss:// URL, got {signaling_url}"
            )));
        }

        let user_email = required(vars, "CALL_USER_EMAIL")?;

        let auth_token = vars
            .get("CALL_AUTH_TOKEN")
            .filter(|t| !t.is_empty())
            .map(|t| SecretString::from(t.clone()));

        let no_answer_timeout = Duration::from_secs(positive(
            vars,
            "CALL_NO_ANSWER_TIMEOUT_SECONDS",
            DEFAULT_NO_ANSWER_TIMEOUT_SECONDS,
        )?);

        let transport_connect_timeout = Duration::from_secs(positive(
            vars,
            "CALL_TRANSPORT_CONNECT_TIMEOUT_SECONDS",
            DEFAULT_TRANSPORT_CONNECT_TIMEOUT_SECONDS,
        )?);

        let transport_reconnect_delay = Duration::from_secs(positive(
            vars,
            "CALL_TRANSPORT_RECONNECT_DELAY_SECONDS",
            DEFAULT_TRANSPORT_RECONNECT_DELAY_SECONDS,
        )?);

        let http_timeout = Duration::from_secs(positive(
            vars,
            "CALL_HTTP_TIMEOUT_SECONDS",
            DEFAULT_HTTP_TIMEOUT_SECONDS,
        )?);

        let terminal_auto_close = Duration::from_millis(positive(
            vars,
            "CALL_TERMINAL_AUTO_CLOSE_MILLIS",
            DEFAULT_TERMINAL_AUTO_CLOSE_MILLIS,
        )?);

        let json_logs = match vars.get("CALL_LOG_JSON").map(String::as_str) {
            None | Some("" | "false" | "0") => false,
            Some("true" | "1") => true,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "CALL_LOG_JSON must be true or false, got {other:?}"
                )))
            }
        };
        let observability = ObservabilityConfig {
            log_level: vars
                .get("RUST_LOG")
                .filter(|v| !v.is_empty())
                .cloned()
                .unwrap_or_else(|| ObservabilityConfig::default().log_level),
            json_logs,
        };

        Ok(Config {
            api_base_url,
            signaling_url,
            user_email,
            auth_token,
            no_answer_timeout,
            transport_connect_timeout,
            transport_reconnect_delay,
            http_timeout,
            terminal_auto_close,
            observability,
        })
    }
}

fn required(vars: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    vars.get(key)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

/// Parse an optional positive integer, falling back to `default` when unset.
fn positive(vars: &HashMap<String, String>, key: &str, default: u64) -> Result<u64, ConfigError> {
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => match raw.parse::<u64>() {
            Ok(0) | Err(_) => Err(ConfigError::InvalidValue(format!(
                "{key} must be a positive integer, got {raw:?}"
            ))),
            Ok(value) => Ok(value),
        },
    }
}
