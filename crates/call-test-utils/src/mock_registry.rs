//! wiremock helpers for the backend call registry REST API.

use crate::fixtures::TestSession;
use call_client::models::Medium;
use serde_json::Value;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A wiremock server preloaded with call registry routes.
pub struct MockRegistry {
    server: MockServer,
}

impl MockRegistry {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Base URL to configure the service client with.
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// `POST /api/calls/initiate` returns `session`.
    pub async fn on_initiate(&self, session: &TestSession) {
        Mock::given(method("POST"))
            .and(path("/api/calls/initiate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(session.json()))
            .mount(&self.server)
            .await;
    }

    /// `POST /api/calls/{id}/answer` returns `session`.
    pub async fn on_answer(&self, session: &TestSession) {
        Mock::given(method("POST"))
            .and(path(format!("/api/calls/{}/answer", session.id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(session.json()))
            .mount(&self.server)
            .await;
    }

    /// `POST /api/calls/{id}/reject` succeeds, expected exactly `times`.
    pub async fn expect_reject(&self, session: &TestSession, times: u64) {
        Mock::given(method("POST"))
            .and(path(format!("/api/calls/{}/reject", session.id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(session.json()))
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// `POST /api/calls/{id}/end` with `reason`, expected exactly `times`.
    pub async fn expect_session_end(&self, session: &TestSession, reason: &str, times: u64) {
        self.expect_session_end_after(session, reason, times, Duration::ZERO)
            .await;
    }

    /// Like `expect_session_end`, but the registry takes `delay` to answer.
    pub async fn expect_session_end_after(
        &self,
        session: &TestSession,
        reason: &str,
        times: u64,
        delay: Duration,
    ) {
        Mock::given(method("POST"))
            .and(path(format!("/api/calls/{}/end", session.id)))
            .and(body_partial_json(serde_json::json!({ "reason": reason })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(session.json())
                    .set_delay(delay),
            )
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// `POST /api/{voice|video}-calls/{room}/end`, expected exactly `times`.
    pub async fn expect_room_end(&self, session: &TestSession, times: u64) {
        let prefix = match session.medium {
            Medium::Voice => "voice-calls",
            Medium::Video => "video-calls",
        };
        Mock::given(method("POST"))
            .and(path(format!("/api/{prefix}/{}/end", session.room_name)))
            .respond_with(ResponseTemplate::new(200).set_body_json(session.json()))
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// Any request answers with `status` and no body.
    pub async fn fail_all(&self, status: u16) {
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Wait until a request for `path` has arrived, then return its body.
    pub async fn wait_for_request(&self, path: &str) -> Option<Value> {
        for _ in 0..100 {
            if let Some((_, body)) = self.requests().await.into_iter().find(|(p, _)| p == path) {
                return Some(body);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        None
    }

    /// Paths and JSON bodies of every request received, in order.
    pub async fn requests(&self) -> Vec<(String, Value)> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|r| {
                let body = serde_json::from_slice(&r.body).unwrap_or(Value::Null);
                (r.url.path().to_string(), body)
            })
            .collect()
    }
}
