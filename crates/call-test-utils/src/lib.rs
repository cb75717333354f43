//! # Call Test Utilities
//!
//! Shared test utilities for the call client.
//!
//! This crate provides mock collaborators and fixtures so call flows can be
//! tested without a real backend, broker, or media SDK.
//!
//! ## Modules
//!
//! - `fixtures` - call session builders and JSON payloads
//! - `mock_signaling` - STOMP-over-WebSocket broker (axum `ws`)
//! - `mock_registry` - wiremock helpers for the REST call registry
//! - `backend` - in-process registry that pushes to the other party
//!
//! ## Usage
//!
//! ```rust,ignore
//! use call_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let backend = MockBackend::new();
//!     let buyer = TestClient::spawn(&backend, "buyer@market.test").await;
//!     let vendor = TestClient::spawn(&backend, "vendor@shop.test").await;
//!
//!     buyer
//!         .handle
//!         .initiate(CallRequest::new("vendor@shop.test", Medium::Voice))
//!         .await
//!         .unwrap();
//!     // vendor's coordinator now rings...
//! }
//! ```

pub mod backend;
pub mod fixtures;
pub mod mock_registry;
pub mod mock_signaling;

// Re-export commonly used items
pub use backend::*;
pub use call_client::media::{MockMediaTransport, RoomFlags};
pub use call_client::service::{MockCallService, ServiceCall, ServiceOp};
pub use fixtures::*;
pub use mock_registry::*;
pub use mock_signaling::*;
