//! Call Listener
//!
//! Headless call client for `CALL_USER_EMAIL`. Runs the full coordinator
//! against the configured registry and signaling endpoint and logs every
//! call status change. There are no capture devices, so any call it is
//! asked to join ends with a device error.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing (`RUST_LOG`, default `call_client=info`; JSON
//!    output with `CALL_LOG_JSON=true`)
//! 3. Start the call client (service client, coordinator, transport)
//! 4. Log status events until Ctrl-C
//! 5. Shut the client down

#![warn(clippy::pedantic)]

use anyhow::Context;
use call_client::app::CallClient;
use call_client::config::Config;
use call_client::coordinator::StatusEvent;
use call_client::media::{LocalTracks, MediaError, MediaRoom, MediaTransport, RoomEvent};
use call_client::transport::NotificationSound;
use common::config::DEFAULT_LOG_FILTER;
use common::secret::SecretString;
use common::types::RoomName;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Bound on waiting for the client tasks at shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Ringer that logs instead of playing a sound.
struct LogRinger;

impl NotificationSound for LogRinger {
    fn play(&self) {
        info!(target: "call.listener", "Ring");
    }
}

/// Media transport for a host without cameras or microphones.
struct NoDevices;

#[async_trait::async_trait]
impl MediaTransport for NoDevices {
    async fn connect(
        &self,
        room: &RoomName,
        _credential: &SecretString,
        _tracks: LocalTracks,
    ) -> Result<(Box<dyn MediaRoom>, mpsc::Receiver<RoomEvent>), MediaError> {
        warn!(target: "call.listener", room = %room, "No capture devices on this host");
        Err(MediaError::DeviceUnavailable("microphone".to_string()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("loading configuration")?;

    let filter = tracing_subscriber::EnvFilter::try_new(&config.observability.log_level)
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    if config.observability.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!("Starting call listener");

    info!(
        user = %config.user_email,
        api_base_url = %config.api_base_url,
        signaling_url = %config.signaling_url,
        no_answer_timeout = ?config.no_answer_timeout,
        reconnect_delay = ?config.transport_reconnect_delay,
        "Configuration loaded successfully"
    );

    let client = CallClient::start(&config, Arc::new(NoDevices), Arc::new(LogRinger))
        .context("starting call client")?;
    let mut events = client
        .coordinator()
        .subscribe()
        .await
        .context("subscribing to call status")?;

    info!("Call listener running - press Ctrl+C to shutdown");

    loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for shutdown signal");
                }
                info!("Shutdown signal received");
                break;
            }
            event = events.recv() => {
                match event {
                    Some(event) => log_status(&event),
                    None => {
                        info!("Call coordinator stopped");
                        break;
                    }
                }
            }
        }
    }

    drop(events);
    client
        .shutdown(SHUTDOWN_TIMEOUT)
        .await
        .context("shutting down call client")?;

    info!("Call listener stopped");
    Ok(())
}

fn log_status(event: &StatusEvent) {
    match event {
        StatusEvent::IncomingCall { call } => info!(
            target: "call.listener",
            room = %call.room(),
            session_id = %call.session.id,
            medium = %call.medium(),
            remote = call.remote_name(),
            "Incoming call"
        ),
        StatusEvent::Finished { room, terminal } => info!(
            target: "call.listener",
            room = %room,
            outcome = %terminal.outcome,
            message = terminal.message.as_deref().unwrap_or(""),
            "Call finished"
        ),
        other => info!(
            target: "call.listener",
            room = ?other.room().map(RoomName::as_str),
            event = ?other,
            "Call status"
        ),
    }
}
