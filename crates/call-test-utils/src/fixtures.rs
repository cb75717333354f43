//! Pre-configured call session fixtures.
//!
//! `CallSession` only deserializes (it mirrors backend payloads), so the
//! builder produces the JSON a backend would send and parses it.

use call_client::models::{CallSession, Medium, SessionStatus};
use chrono::{DateTime, Utc};
use common::secret::ExposeSecret;
use serde_json::{json, Value};
use uuid::Uuid;

/// Default caller identity in fixtures.
pub const BUYER_EMAIL: &str = "buyer@market.test";

/// Default callee identity in fixtures.
pub const VENDOR_EMAIL: &str = "vendor@shop.test";

/// Test call session builder.
#[derive(Debug, Clone)]
pub struct TestSession {
    pub id: i64,
    pub room_name: String,
    pub caller_email: String,
    pub callee_email: String,
    pub caller_name: Option<String>,
    pub callee_name: Option<String>,
    pub medium: Medium,
    pub status: SessionStatus,
    pub product_id: Option<i64>,
    pub product_name: Option<String>,
    pub access_token: Option<String>,
}

impl TestSession {
    /// Buyer calling vendor with room `room-{id}`.
    #[must_use]
    pub fn new(id: i64, medium: Medium) -> Self {
        Self {
            id,
            room_name: format!("room-{id}"),
            caller_email: BUYER_EMAIL.to_string(),
            callee_email: VENDOR_EMAIL.to_string(),
            caller_name: Some("Bea Buyer".to_string()),
            callee_name: Some("Oak & Co".to_string()),
            medium,
            status: SessionStatus::Initiated,
            product_id: None,
            product_name: None,
            access_token: None,
        }
    }

    /// Session with a random room name.
    #[must_use]
    pub fn random(medium: Medium) -> Self {
        let mut session = Self::new(1, medium);
        session.room_name = format!("room-{}", Uuid::new_v4());
        session
    }

    #[must_use]
    pub fn with_status(mut self, status: SessionStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_parties(mut self, caller: &str, callee: &str) -> Self {
        self.caller_email = caller.to_string();
        self.callee_email = callee.to_string();
        self
    }

    #[must_use]
    pub fn with_product(mut self, id: i64, name: &str) -> Self {
        self.product_id = Some(id);
        self.product_name = Some(name.to_string());
        self
    }

    #[must_use]
    pub fn with_access_token(mut self, token: &str) -> Self {
        self.access_token = Some(token.to_string());
        self
    }

    /// Backend JSON payload (camelCase).
    #[must_use]
    pub fn json(&self) -> Value {
        let mut value = json!({
            "id": self.id,
            "roomName": self.room_name,
            "callerEmail": self.caller_email,
            "calleeEmail": self.callee_email,
            "callerName": self.caller_name,
            "calleeName": self.callee_name,
            "callType": medium_str(self.medium),
            "status": status_str(self.status),
            "createdAt": "2026-10-01T10:00:00Z",
        });
        if let Some(id) = self.product_id {
            value["productId"] = json!(id);
        }
        if let Some(name) = &self.product_name {
            value["productName"] = json!(name);
        }
        if let Some(token) = &self.access_token {
            value["accessToken"] = json!(token);
        }
        value
    }

    /// Parsed session.
    #[must_use]
    pub fn build(&self) -> CallSession {
        serde_json::from_value(self.json()).expect("fixture session parses")
    }
}

/// Serialize a session the way the backend does, without the access
/// credential unless `with_token` is set.
#[must_use]
pub fn session_json(session: &CallSession, with_token: bool) -> Value {
    let mut value = json!({
        "id": session.id.0,
        "roomName": session.room_name.as_str(),
        "callerEmail": session.caller_email,
        "calleeEmail": session.callee_email,
        "callerName": session.caller_name,
        "calleeName": session.callee_name,
        "callType": medium_str(session.call_type),
        "status": status_str(session.status),
        "createdAt": timestamp(session.created_at),
        "answeredAt": session.answered_at.map(timestamp),
        "endedAt": session.ended_at.map(timestamp),
    });
    let context = &session.context;
    if let Some(id) = context.product_id {
        value["productId"] = json!(id);
    }
    if let Some(name) = &context.product_name {
        value["productName"] = json!(name);
    }
    if let Some(id) = context.shop_id {
        value["shopId"] = json!(id);
    }
    if let Some(name) = &context.shop_name {
        value["shopName"] = json!(name);
    }
    if with_token {
        if let Some(token) = &session.access_token {
            value["accessToken"] = json!(token.expose_secret());
        }
    }
    value
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

fn medium_str(medium: Medium) -> &'static str {
    match medium {
        Medium::Voice => "VOICE",
        Medium::Video => "VIDEO",
    }
}

fn status_str(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Initiated => "INITIATED",
        SessionStatus::Ringing => "RINGING",
        SessionStatus::Answered => "ANSWERED",
        SessionStatus::Rejected => "REJECTED",
        SessionStatus::Missed => "MISSED",
        SessionStatus::Ended => "ENDED",
    }
}
