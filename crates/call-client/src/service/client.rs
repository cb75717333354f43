//! HTTP client for the backend call registry.
//!
//! # Endpoints
//!
//! | Operation | Method | Path |
//! |-----------|--------|------|
//! | initiate | POST | `/api/calls/initiate` |
//! | answer | POST | `/api/calls/{id}/answer` |
//! | reject | POST | `/api/calls/{id}/reject` |
//! | end (session) | POST | `/api/calls/{id}/end` |
//! | end (room) | POST | `/api/{voice,video}-calls/{room}/end` |
//! | history | GET | `/api/calls/history?email=` |
//!
//! Path parameters are percent-encoded as single segments, so a room name
//! can never address a different endpoint. Timeouts prevent hanging
//! requests; nothing here retries.

use super::{CallSessionApi, EndTarget};
use crate::config::Config;
use crate::errors::CallError;
use crate::models::{CallSession, EndReason, InitiateRequest, Medium};
use common::secret::{ExposeSecret, SecretString};
use common::types::CallId;
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Default connect timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CalleeBody<'a> {
    callee_email: &'a str,
}

#[derive(Debug, Serialize)]
struct EndBody<'a> {
    email: &'a str,
    reason: EndReason,
}

/// HTTP client for the call registry.
#[derive(Clone)]
pub struct CallServiceClient {
    /// HTTP client with configured timeouts.
    client: Client,

    /// Base URL; endpoint segments are appended to its path.
    base_url: Url,

    /// Optional bearer token.
    auth_token: Option<SecretString>,
}

impl CallServiceClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns `CallError::Config` if the HTTP client cannot be built or
    /// `base_url` is not an absolute URL.
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, CallError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| {
                error!(target: "call.service", error = %e, "Failed to build HTTP client");
                CallError::Config(format!("Failed to build HTTP client: {e}"))
            })?;

        let raw = base_url.into();
        let base_url = Url::parse(&raw)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| CallError::Config(format!("Invalid call registry URL: {raw}")))?;

        Ok(Self {
            client,
            base_url,
            auth_token,
        })
    }

    /// Create a client from the loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns `CallError::Config` if the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self, CallError> {
        Self::new(
            config.api_base_url.clone(),
            config.auth_token.clone(),
            config.http_timeout,
        )
    }

    fn with_auth(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    /// Base URL with `segments` appended, each percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url, CallError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| CallError::Config(format!("Invalid call registry URL: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<reqwest::Response, CallError> {
        let url = self.url(segments)?;
        debug!(target: "call.service", url = %url, "POST");

        self.with_auth(self.client.post(url))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                warn!(target: "call.service", error = %e, "Call registry request failed");
                CallError::ServiceUnavailable("Call registry is unavailable".to_string())
            })
    }

    /// Map status codes to errors, leaving successful responses untouched.
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, CallError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        match status.as_u16() {
            400 => {
                warn!(target: "call.service", status = %status, body = %body, "Call registry rejected request");
                Err(CallError::BadRequest(body))
            }
            401 | 403 => {
                warn!(target: "call.service", status = %status, "Call registry rejected credentials");
                Err(CallError::Unauthorized(format!("Status {status}")))
            }
            404 => Err(CallError::NotFound(body)),
            409 => Err(CallError::Conflict(body)),
            _ if status.is_server_error() => {
                warn!(target: "call.service", status = %status, "Call registry returned server error");
                Err(CallError::ServiceUnavailable(format!("Status {status}")))
            }
            _ => {
                warn!(target: "call.service", status = %status, "Unexpected call registry response");
                Err(CallError::InvalidResponse(format!("Unexpected status {status}")))
            }
        }
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, CallError> {
        let response = Self::check_status(response).await?;
        response.json().await.map_err(|e| {
            error!(target: "call.service", error = %e, "Failed to parse call registry response");
            CallError::InvalidResponse(e.to_string())
        })
    }

    fn end_segments(target: &EndTarget) -> Vec<String> {
        match target {
            EndTarget::Session(id) => vec![
                "api".to_string(),
                "calls".to_string(),
                id.to_string(),
                "end".to_string(),
            ],
            EndTarget::Room { room, medium } => {
                let prefix = match medium {
                    Medium::Voice => "voice-calls",
                    Medium::Video => "video-calls",
                };
                vec![
                    "api".to_string(),
                    prefix.to_string(),
                    room.as_str().to_string(),
                    "end".to_string(),
                ]
            }
        }
    }
}

#[async_trait::async_trait]
impl CallSessionApi for CallServiceClient {
    #[instrument(skip_all, fields(medium = %request.call_type))]
    async fn initiate(&self, request: &InitiateRequest) -> Result<CallSession, CallError> {
        let response = self.post_json(&["api", "calls", "initiate"], request).await?;
        Self::parse(response).await
    }

    #[instrument(skip_all, fields(session_id = %id))]
    async fn answer(&self, id: CallId, callee_email: &str) -> Result<CallSession, CallError> {
        let response = self
            .post_json(
                &["api", "calls", id.to_string().as_str(), "answer"],
                &CalleeBody { callee_email },
            )
            .await?;
        Self::parse(response).await
    }

    #[instrument(skip_all, fields(session_id = %id))]
    async fn reject(&self, id: CallId, callee_email: &str) -> Result<(), CallError> {
        let response = self
            .post_json(
                &["api", "calls", id.to_string().as_str(), "reject"],
                &CalleeBody { callee_email },
            )
            .await?;
        Self::check_status(response).await.map(|_| ())
    }

    #[instrument(skip_all, fields(end_target = %target, reason = reason.as_str()))]
    async fn end(
        &self,
        target: &EndTarget,
        party_email: &str,
        reason: EndReason,
    ) -> Result<(), CallError> {
        let segments = Self::end_segments(target);
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
        let response = self
            .post_json(
                &segments,
                &EndBody {
                    email: party_email,
                    reason,
                },
            )
            .await?;

        match Self::check_status(response).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_already_ended() => {
                debug!(target: "call.service", end_target = %target, "Call already ended");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip_all)]
    async fn history(&self, email: &str) -> Result<Vec<CallSession>, CallError> {
        let url = self.url(&["api", "calls", "history"])?;
        let response = self
            .with_auth(self.client.get(url).query(&[("email", email)]))
            .send()
            .await
            .map_err(|e| {
                warn!(target: "call.service", error = %e, "Call registry request failed");
                CallError::ServiceUnavailable("Call registry is unavailable".to_string())
            })?;
        Self::parse(response).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{CallContext, SessionStatus};
    use common::types::RoomName;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session_body(id: i64, status: &str, token: Option<&str>) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "roomName": format!("room-{id}"),
            "callerEmail": "buyer@market.test",
            "calleeEmail": "vendor@shop.test",
            "callType": "VOICE",
            "status": status,
            "createdAt": "2026-10-01T10:00:00Z",
            "accessToken": token,
        })
    }

    fn client(server: &MockServer) -> CallServiceClient {
        CallServiceClient::new(
            server.uri(),
            Some(SecretString::from("bearer-1")),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn initiate_request() -> InitiateRequest {
        InitiateRequest {
            caller_email: "buyer@market.test".to_string(),
            callee_email: "vendor@shop.test".to_string(),
            caller_name: None,
            callee_name: None,
            call_type: Medium::Voice,
            context: CallContext {
                shop_id: Some(12),
                ..CallContext::default()
            },
        }
    }

    #[tokio::test]
    async fn test_initiate_success() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/calls/initiate"))
            .and(header("authorization", "Bearer bearer-1"))
            .and(body_json(serde_json::json!({
                "callerEmail": "buyer@market.test",
                "calleeEmail": "vendor@shop.test",
                "callType": "VOICE",
                "shopId": 12
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(session_body(5, "INITIATED", Some("g"))),
            )
            .expect(1)
            .mount(&server)
            .await;

        let session = client(&server).initiate(&initiate_request()).await.unwrap();
        assert_eq!(session.id, CallId(5));
        assert_eq!(session.room_name, RoomName::new("room-5"));
        assert_eq!(session.status, SessionStatus::Initiated);
        assert!(session.access_token.is_some());
    }

    #[tokio::test]
    async fn test_answer_returns_callee_credential() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/calls/5/answer"))
            .and(body_json(serde_json::json!({ "calleeEmail": "vendor@shop.test" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(session_body(5, "ANSWERED", Some("callee-grant"))),
            )
            .mount(&server)
            .await;

        let session = client(&server)
            .answer(CallId(5), "vendor@shop.test")
            .await
            .unwrap();
        assert_eq!(session.status, SessionStatus::Answered);
        assert_eq!(
            session.access_token.unwrap().expose_secret(),
            "callee-grant"
        );
    }

    #[tokio::test]
    async fn test_reject_posts_callee() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/calls/5/reject"))
            .and(body_json(serde_json::json!({ "calleeEmail": "vendor@shop.test" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(session_body(5, "REJECTED", None)))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .reject(CallId(5), "vendor@shop.test")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_end_by_room_uses_medium_path() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/video-calls/room-9/end"))
            .and(body_json(serde_json::json!({
                "email": "buyer@market.test",
                "reason": "missed"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let target = EndTarget::Room {
            room: RoomName::new("room-9"),
            medium: Medium::Video,
        };
        client(&server)
            .end(&target, "buyer@market.test", EndReason::Missed)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_room_name_is_encoded_as_one_segment() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/voice-calls/shop%2F12%3Fx%3D1/end"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let target = EndTarget::Room {
            room: RoomName::new("shop/12?x=1"),
            medium: Medium::Voice,
        };
        client(&server)
            .end(&target, "buyer@market.test", EndReason::Hangup)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_base_url_path_prefix_is_kept() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/backend/api/calls/7/reject"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = CallServiceClient::new(
            format!("{}/backend/", server.uri()),
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        client.reject(CallId(7), "vendor@shop.test").await.unwrap();
    }

    #[test]
    fn test_invalid_base_url_is_config_error() {
        let result = CallServiceClient::new("not a url", None, Duration::from_secs(1));
        assert!(matches!(result, Err(CallError::Config(_))));
    }

    #[tokio::test]
    async fn test_end_is_idempotent_on_404_and_409() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/calls/5/end"))
            .respond_with(ResponseTemplate::new(409).set_body_string("already ended"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/calls/5/end"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client(&server);
        let target = EndTarget::Session(CallId(5));
        assert!(client
            .end(&target, "buyer@market.test", EndReason::Hangup)
            .await
            .is_ok());
        assert!(client
            .end(&target, "buyer@market.test", EndReason::Hangup)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_server_error_maps_to_unavailable() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/calls/initiate"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = client(&server).initiate(&initiate_request()).await;
        assert!(matches!(result, Err(CallError::ServiceUnavailable(_))));
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/calls/1/answer"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/calls/2/answer"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/calls/3/answer"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        let client = client(&server);
        assert!(matches!(
            client.answer(CallId(1), "v@s").await,
            Err(CallError::BadRequest(_))
        ));
        assert!(matches!(
            client.answer(CallId(2), "v@s").await,
            Err(CallError::Unauthorized(_))
        ));
        assert!(matches!(
            client.answer(CallId(3), "v@s").await,
            Err(CallError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid_response() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/calls/initiate"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let result = client(&server).initiate(&initiate_request()).await;
        assert!(matches!(result, Err(CallError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_unreachable_backend() {
        // Nothing listens on port 9 (discard) in test environments
        let client = CallServiceClient::new("http://127.0.0.1:9", None, Duration::from_secs(1))
            .unwrap();
        let result = client.initiate(&initiate_request()).await;
        assert!(matches!(result, Err(CallError::ServiceUnavailable(_))));
    }

    #[tokio::test]
    async fn test_history() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/calls/history"))
            .and(query_param("email", "vendor@shop.test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                session_body(1, "ENDED", None),
                session_body(2, "MISSED", None),
            ])))
            .mount(&server)
            .await;

        let sessions = client(&server).history("vendor@shop.test").await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions.get(1).unwrap().status, SessionStatus::Missed);
    }
}
