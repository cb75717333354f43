//! Notification Transport connection task.
//!
//! # Lifecycle
//!
//! 1. Open the WebSocket and send CONNECT
//! 2. Wait for CONNECTED, then SUBSCRIBE to every per-user channel
//! 3. Parse MESSAGE frames into [`CallNotification`]s and hand them to the sink
//! 4. On any failure, wait the fixed reconnect delay and start over
//!
//! Steps 1-2 must finish within the connect timeout or the attempt is torn
//! down. Nothing is delivered while disconnected.

use super::channels::{CallNotification, Channel};
use super::frame::{Command, Frame};
use super::{ConnectionState, NotificationSound, TransportError};
use crate::config::Config;
use crate::observability::metrics;
use common::secret::{ExposeSecret, SecretString};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection parameters.
#[derive(Clone)]
pub struct TransportSettings {
    /// `ws://` or `wss://` URL of the broker endpoint.
    pub url: String,
    /// Identity whose channels are subscribed.
    pub user_email: String,
    /// Sent as the `Authorization` CONNECT header when present.
    pub auth_token: Option<SecretString>,
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
}

impl TransportSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            url: config.signaling_url.clone(),
            user_email: config.user_email.clone(),
            auth_token: config.auth_token.clone(),
            connect_timeout: config.transport_connect_timeout,
            reconnect_delay: config.transport_reconnect_delay,
        }
    }

    /// Host part of the URL, for the CONNECT `host` header.
    fn host(&self) -> &str {
        let without_scheme = self
            .url
            .split_once("://")
            .map_or(self.url.as_str(), |(_, rest)| rest);
        without_scheme
            .split(['/', '?'])
            .next()
            .unwrap_or(without_scheme)
    }

    fn connect_frame(&self) -> Frame {
        let frame = Frame::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", self.host())
            .header("login", self.user_email.as_str())
            .header("heart-beat", "0,0");
        match &self.auth_token {
            Some(token) => frame.header("Authorization", format!("Bearer {}", token.expose_secret())),
            None => frame,
        }
    }
}

/// Handle to a running transport.
#[derive(Clone)]
pub struct TransportHandle {
    state: watch::Receiver<ConnectionState>,
    cancel_token: CancellationToken,
}

impl TransportHandle {
    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the connection reaches `target`.
    ///
    /// Returns `false` if the transport stopped first.
    pub async fn wait_for(&self, target: ConnectionState) -> bool {
        let mut state = self.state.clone();
        let reached = state.wait_for(|s| *s == target).await.is_ok();
        reached
    }

    /// Disconnect and stop reconnecting.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// How a connected session ended.
enum SessionEnd {
    /// Cancelled or the sink is gone. Do not reconnect.
    Shutdown,
    /// Connection failed. Reconnect after the delay.
    Lost(TransportError),
}

/// The reconnecting push connection.
pub struct NotificationTransport {
    settings: TransportSettings,
    sink: mpsc::Sender<CallNotification>,
    ringer: Arc<dyn NotificationSound>,
    state: watch::Sender<ConnectionState>,
    cancel_token: CancellationToken,
}

impl NotificationTransport {
    /// Spawn the connection task.
    ///
    /// Parsed notifications are sent to `sink`. `ringer` plays on every
    /// incoming call before the notification is handed over.
    pub fn spawn(
        settings: TransportSettings,
        sink: mpsc::Sender<CallNotification>,
        ringer: Arc<dyn NotificationSound>,
        cancel_token: CancellationToken,
    ) -> (TransportHandle, JoinHandle<()>) {
        let (state, state_rx) = watch::channel(ConnectionState::Disconnected);

        let transport = Self {
            settings,
            sink,
            ringer,
            state,
            cancel_token: cancel_token.clone(),
        };
        let task = tokio::spawn(transport.run());

        (
            TransportHandle {
                state: state_rx,
                cancel_token,
            },
            task,
        )
    }

    #[instrument(skip_all, name = "call.transport", fields(user = %self.settings.user_email))]
    async fn run(self) {
        info!(
            target: "call.transport",
            url = %self.settings.url,
            "Notification transport started"
        );

        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            self.state.send_replace(ConnectionState::Connecting);

            let established = tokio::select! {
                () = self.cancel_token.cancelled() => break,
                result = tokio::time::timeout(self.settings.connect_timeout, self.establish()) => result,
            };

            match established {
                Ok(Ok(ws)) => {
                    info!(target: "call.transport", attempt, "Notification transport connected");
                    attempt = 0;
                    self.state.send_replace(ConnectionState::Connected);

                    match self.pump(ws).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost(e) => {
                            warn!(target: "call.transport", error = %e, "Notification transport lost");
                        }
                    }
                }
                Ok(Err(e)) => {
                    warn!(target: "call.transport", attempt, error = %e, "Notification transport connect failed");
                }
                Err(_) => {
                    warn!(
                        target: "call.transport",
                        attempt,
                        timeout = ?self.settings.connect_timeout,
                        "Notification transport connect timed out"
                    );
                }
            }

            self.state.send_replace(ConnectionState::Disconnected);

            tokio::select! {
                () = self.cancel_token.cancelled() => break,
                () = tokio::time::sleep(self.settings.reconnect_delay) => {}
            }
            metrics::record_transport_reconnect();
        }

        self.state.send_replace(ConnectionState::Disconnected);
        info!(target: "call.transport", "Notification transport stopped");
    }

    /// Open the socket, complete the CONNECT handshake, and subscribe.
    async fn establish(&self) -> Result<WsStream, TransportError> {
        let (mut ws, _response) = connect_async(self.settings.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        send_frame(&mut ws, &self.settings.connect_frame()).await?;

        loop {
            let message = match ws.next().await {
                None | Some(Ok(Message::Close(_))) => return Err(TransportError::HandshakeClosed),
                Some(Err(e)) => return Err(TransportError::Lost(e.to_string())),
                Some(Ok(message)) => message,
            };
            let Message::Text(text) = message else {
                continue;
            };
            match Frame::decode(text.as_str())? {
                None => {}
                Some(frame) if frame.command == Command::Connected => {
                    debug!(
                        target: "call.transport",
                        version = frame.get("version").unwrap_or("unknown"),
                        "STOMP session established"
                    );
                    break;
                }
                Some(frame) if frame.command == Command::Error => {
                    return Err(TransportError::Refused(error_message(&frame)));
                }
                Some(frame) => return Err(TransportError::UnexpectedFrame(frame.command)),
            }
        }

        for (index, channel) in Channel::ALL.iter().enumerate() {
            let subscribe = Frame::new(Command::Subscribe)
                .header("id", format!("sub-{index}"))
                .header("destination", channel.destination(&self.settings.user_email))
                .header("ack", "auto");
            send_frame(&mut ws, &subscribe).await?;
        }

        Ok(ws)
    }

    /// Read frames until the connection drops or the transport is cancelled.
    async fn pump(&self, mut ws: WsStream) -> SessionEnd {
        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    let _ = send_frame(&mut ws, &Frame::new(Command::Disconnect)).await;
                    let _ = ws.close(None).await;
                    return SessionEnd::Shutdown;
                }
                message = ws.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(end) = self.handle_text(text.as_str()).await {
                            return end;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return SessionEnd::Lost(TransportError::Lost("closed by broker".to_string()));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return SessionEnd::Lost(TransportError::Lost(e.to_string())),
                },
            }
        }
    }

    async fn handle_text(&self, text: &str) -> Option<SessionEnd> {
        let frame = match Frame::decode(text) {
            Ok(Some(frame)) => frame,
            Ok(None) => return None,
            Err(e) => {
                warn!(target: "call.transport", error = %e, "Dropping malformed frame");
                metrics::record_dropped_frame("malformed_frame");
                return None;
            }
        };

        match frame.command {
            Command::Message => {
                let notification = parse_message(&frame)?;
                debug!(
                    target: "call.transport",
                    channel = %notification.channel(),
                    room = %notification.room(),
                    session_id = %notification.session().id,
                    "Call notification received"
                );
                if matches!(notification, CallNotification::Incoming(_)) {
                    self.ringer.play();
                }
                if self.sink.send(notification).await.is_err() {
                    info!(target: "call.transport", "Notification sink closed");
                    return Some(SessionEnd::Shutdown);
                }
                None
            }
            Command::Error => Some(SessionEnd::Lost(TransportError::Refused(error_message(
                &frame,
            )))),
            other => {
                debug!(target: "call.transport", command = %other, "Ignoring frame");
                None
            }
        }
    }
}

/// Turn a MESSAGE frame into a notification, dropping anything unusable.
fn parse_message(frame: &Frame) -> Option<CallNotification> {
    let Some(destination) = frame.get("destination") else {
        warn!(target: "call.transport", "Dropping MESSAGE without destination");
        metrics::record_dropped_frame("missing_destination");
        return None;
    };
    let Some(channel) = Channel::from_destination(destination) else {
        debug!(target: "call.transport", destination, "Dropping MESSAGE for unknown destination");
        metrics::record_dropped_frame("unknown_destination");
        return None;
    };
    match CallNotification::parse(channel, &frame.body) {
        Ok(notification) => Some(notification),
        Err(e) => {
            warn!(target: "call.transport", channel = %channel, error = %e, "Dropping malformed call payload");
            metrics::record_dropped_frame("malformed_payload");
            None
        }
    }
}

fn error_message(frame: &Frame) -> String {
    frame
        .get("message")
        .map_or_else(|| frame.body.clone(), str::to_string)
}

async fn send_frame(ws: &mut WsStream, frame: &Frame) -> Result<(), TransportError> {
    ws.send(Message::text(frame.encode()))
        .await
        .map_err(|e| TransportError::Lost(e.to_string()))
}
