//! Mock STOMP-over-WebSocket signaling broker.
//!
//! Accepts WebSocket connections on `/ws`, answers CONNECT with CONNECTED,
//! records SUBSCRIBE frames, and lets tests push MESSAGE frames to any
//! subscribed destination. Connections can be dropped to exercise the
//! client's reconnect path.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use call_client::models::CallSession;
use call_client::transport::{Channel, Command, Frame};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::fixtures::session_json;

enum Outbound {
    Text(String),
    Close,
}

struct Connection {
    login: Option<String>,
    /// Subscription id to destination.
    subscriptions: HashMap<String, String>,
    tx: mpsc::UnboundedSender<Outbound>,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<u64, Connection>,
    connect_headers: Vec<Vec<(String, String)>>,
    total_connections: usize,
    reject_connect: bool,
    silent: bool,
}

#[derive(Default)]
struct Shared {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
    next_message_id: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    fn push(&self, destination: &str, body: &str) -> usize {
        let inner = self.lock();
        let mut delivered = 0;
        for connection in inner.connections.values() {
            for (subscription, subscribed) in &connection.subscriptions {
                if subscribed != destination {
                    continue;
                }
                let message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
                let frame = Frame::new(Command::Message)
                    .header("destination", destination)
                    .header("subscription", subscription.as_str())
                    .header("message-id", message_id.to_string())
                    .header("content-type", "application/json")
                    .body(body);
                if connection.tx.send(Outbound::Text(frame.encode())).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }
}

/// Pushes call notifications through a running [`MockSignalingServer`].
#[derive(Clone)]
pub struct SignalingPusher {
    shared: Arc<Shared>,
}

impl SignalingPusher {
    /// Send a MESSAGE to every subscription on `destination`.
    /// Returns how many subscriptions received it.
    pub fn push(&self, destination: &str, body: &str) -> usize {
        self.shared.push(destination, body)
    }

    /// Push `session` on `channel` to `email`, the way the backend does.
    pub fn push_notification(&self, email: &str, channel: Channel, session: &CallSession) -> usize {
        let body = session_json(session, false).to_string();
        self.push(&channel.destination(email), &body)
    }
}

/// Mock signaling broker bound to a random local port.
pub struct MockSignalingServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    handle: JoinHandle<()>,
}

impl MockSignalingServer {
    /// Bind to 127.0.0.1:0 and start serving.
    pub async fn start() -> Self {
        let shared = Arc::new(Shared::default());
        let app = Router::new()
            .route("/ws", get(ws_handler))
            .with_state(Arc::clone(&shared));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock signaling server");
        let addr = listener.local_addr().expect("mock signaling address");

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Mock signaling server error: {e}");
            }
        });

        Self {
            addr,
            shared,
            handle,
        }
    }

    /// WebSocket URL of the broker endpoint.
    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn pusher(&self) -> SignalingPusher {
        SignalingPusher {
            shared: Arc::clone(&self.shared),
        }
    }

    /// See [`SignalingPusher::push`].
    pub fn push(&self, destination: &str, body: &str) -> usize {
        self.shared.push(destination, body)
    }

    /// See [`SignalingPusher::push_notification`].
    pub fn push_notification(&self, email: &str, channel: Channel, session: &CallSession) -> usize {
        self.pusher().push_notification(email, channel, session)
    }

    /// Send raw text to every live connection.
    pub fn push_raw(&self, text: &str) -> usize {
        let inner = self.shared.lock();
        inner
            .connections
            .values()
            .filter(|c| c.tx.send(Outbound::Text(text.to_string())).is_ok())
            .count()
    }

    /// Destinations subscribed on live connections, sorted.
    pub fn subscriptions(&self) -> Vec<String> {
        let inner = self.shared.lock();
        let mut destinations: Vec<String> = inner
            .connections
            .values()
            .flat_map(|c| c.subscriptions.values().cloned())
            .collect();
        destinations.sort();
        destinations
    }

    /// Headers of every CONNECT frame received, in order.
    pub fn connect_headers(&self) -> Vec<Vec<(String, String)>> {
        self.shared.lock().connect_headers.clone()
    }

    /// Logins of live connections.
    pub fn logins(&self) -> Vec<String> {
        self.shared
            .lock()
            .connections
            .values()
            .filter_map(|c| c.login.clone())
            .collect()
    }

    /// Number of live connections.
    pub fn connections(&self) -> usize {
        self.shared.lock().connections.len()
    }

    /// Number of connections accepted since start.
    pub fn total_connections(&self) -> usize {
        self.shared.lock().total_connections
    }

    /// Close every live connection from the broker side.
    pub fn drop_connections(&self) {
        let mut inner = self.shared.lock();
        for (_, connection) in inner.connections.drain() {
            let _ = connection.tx.send(Outbound::Close);
        }
    }

    /// Answer CONNECT with an ERROR frame.
    pub fn set_reject_connect(&self, reject: bool) {
        self.shared.lock().reject_connect = reject;
    }

    /// Never answer CONNECT.
    pub fn set_silent(&self, silent: bool) {
        self.shared.lock().silent = silent;
    }

    /// Wait until `email` is subscribed to every call channel.
    pub async fn wait_for_subscriptions(&self, email: &str) {
        let expected: Vec<String> = Channel::ALL.iter().map(|c| c.destination(email)).collect();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let subscribed = self.subscriptions();
                if expected.iter().all(|d| subscribed.contains(d)) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("client subscribed to all call channels");
    }
}

impl Drop for MockSignalingServer {
    fn drop(&mut self) {
        self.drop_connections();
        self.handle.abort();
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(shared): State<Arc<Shared>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, shared))
}

async fn handle_socket(socket: WebSocket, shared: Arc<Shared>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
    {
        let mut inner = shared.lock();
        inner.total_connections += 1;
        inner.connections.insert(
            id,
            Connection {
                login: None,
                subscriptions: HashMap::new(),
                tx: tx.clone(),
            },
        );
    }

    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Text(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(Some(frame)) = Frame::decode(&text) else {
            continue;
        };

        match frame.command {
            Command::Connect | Command::Stomp => {
                let (reject, silent) = {
                    let mut inner = shared.lock();
                    inner.connect_headers.push(frame.headers.clone());
                    if let Some(connection) = inner.connections.get_mut(&id) {
                        connection.login = frame.get("login").map(str::to_string);
                    }
                    (inner.reject_connect, inner.silent)
                };
                if reject {
                    let error = Frame::new(Command::Error)
                        .header("message", "Access denied")
                        .body("Invalid credentials");
                    let _ = tx.send(Outbound::Text(error.encode()));
                    let _ = tx.send(Outbound::Close);
                    break;
                }
                if !silent {
                    let connected = Frame::new(Command::Connected)
                        .header("version", "1.2")
                        .header("heart-beat", "0,0");
                    let _ = tx.send(Outbound::Text(connected.encode()));
                }
            }
            Command::Subscribe => {
                if let (Some(sub_id), Some(destination)) = (frame.get("id"), frame.get("destination")) {
                    let mut inner = shared.lock();
                    if let Some(connection) = inner.connections.get_mut(&id) {
                        connection
                            .subscriptions
                            .insert(sub_id.to_string(), destination.to_string());
                    }
                }
            }
            Command::Unsubscribe => {
                if let Some(sub_id) = frame.get("id") {
                    let mut inner = shared.lock();
                    if let Some(connection) = inner.connections.get_mut(&id) {
                        connection.subscriptions.remove(sub_id);
                    }
                }
            }
            Command::Disconnect => break,
            _ => {}
        }
    }

    shared.lock().connections.remove(&id);
    drop(tx);
    let _ = writer.await;
}
