//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for the bearer token sent to the
//! call registry and the per-party media access credential. Both are opaque
//! to this layer and must never show up in logs.
//!
//! `SecretString` implements `Debug` with redaction, so any struct deriving
//! `Debug` that holds one is safe to pass to `tracing` fields.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct JoinGrant {
//!     room: String,
//!     credential: SecretString,
//! }
//!
//! let grant = JoinGrant {
//!     room: "room-42".to_string(),
//!     credential: SecretString::from("eyJhbGciOi..."),
//! };
//!
//! // Debug output keeps the room, hides the credential.
//! assert!(!format!("{grant:?}").contains("eyJhbGciOi"));
//!
//! // Access must be explicit.
//! let raw: &str = grant.credential.expose_secret();
//! assert!(raw.starts_with("eyJ"));
//! ```
//!
//! Use `SecretString` for:
//! - Backend bearer tokens
//! - Media room access credentials
//! - Anything else that authenticates a party

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
