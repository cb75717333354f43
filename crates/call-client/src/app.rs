//! `CallClient` - the composition root.
//!
//! Builds the service client, the coordinator and the notification
//! transport from one [`Config`] and wires the transport's pushes into the
//! coordinator. The media SDK and the ringer are supplied by the host,
//! since both depend on the platform.
//!
//! ```rust,ignore
//! let client = CallClient::start(&config, media, Arc::new(Ringer))?;
//! let mut events = client.coordinator().subscribe().await?;
//! // ... drive surfaces from `events` ...
//! client.shutdown(Duration::from_secs(5)).await?;
//! ```

use crate::config::Config;
use crate::coordinator::{CallCoordinator, CallCoordinatorHandle, CoordinatorSettings};
use crate::errors::CallError;
use crate::media::MediaTransport;
use crate::service::CallServiceClient;
use crate::transport::{NotificationSound, NotificationTransport, TransportHandle, TransportSettings};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A running call client: one coordinator fed by one transport.
pub struct CallClient {
    coordinator: CallCoordinatorHandle,
    transport: TransportHandle,
    cancel_token: CancellationToken,
    coordinator_task: JoinHandle<()>,
    transport_task: JoinHandle<()>,
}

impl CallClient {
    /// Build and spawn every component from `config`.
    ///
    /// # Errors
    ///
    /// Returns `CallError::Config` if the registry URL or HTTP client cannot
    /// be built. Nothing is spawned in that case.
    pub fn start(
        config: &Config,
        media: Arc<dyn MediaTransport>,
        ringer: Arc<dyn NotificationSound>,
    ) -> Result<Self, CallError> {
        let service = CallServiceClient::from_config(config)?;
        let cancel_token = CancellationToken::new();

        let (coordinator, coordinator_task) = CallCoordinator::spawn(
            CoordinatorSettings::from_config(config),
            Arc::new(service),
            media,
            cancel_token.child_token(),
        );
        let (transport, transport_task) = NotificationTransport::spawn(
            TransportSettings::from_config(config),
            coordinator.notification_sink(),
            ringer,
            cancel_token.child_token(),
        );

        info!(
            target: "call.client",
            user = %config.user_email,
            api_base_url = %config.api_base_url,
            signaling_url = %config.signaling_url,
            "Call client started"
        );

        Ok(Self {
            coordinator,
            transport,
            cancel_token,
            coordinator_task,
            transport_task,
        })
    }

    /// Handle for surfaces and local commands.
    #[must_use]
    pub fn coordinator(&self) -> &CallCoordinatorHandle {
        &self.coordinator
    }

    /// Handle for watching the push connection.
    #[must_use]
    pub fn transport(&self) -> &TransportHandle {
        &self.transport
    }

    /// Cancel every component and wait up to `timeout` for them to stop.
    ///
    /// # Errors
    ///
    /// Returns `CallError::Internal` if a task panicked or did not stop in
    /// time.
    pub async fn shutdown(self, timeout: Duration) -> Result<(), CallError> {
        let Self {
            cancel_token,
            coordinator_task,
            transport_task,
            ..
        } = self;
        info!(target: "call.client", "Call client shutting down");
        cancel_token.cancel();

        let stopped = tokio::time::timeout(timeout, async move {
            let (transport, coordinator) = tokio::join!(transport_task, coordinator_task);
            if let Err(e) = &transport {
                warn!(target: "call.client", error = %e, "Notification transport task failed");
            }
            if let Err(e) = &coordinator {
                warn!(target: "call.client", error = %e, "Coordinator task failed");
            }
            transport.is_ok() && coordinator.is_ok()
        })
        .await;

        match stopped {
            Ok(true) => {
                info!(target: "call.client", "Call client stopped");
                Ok(())
            }
            Ok(false) => Err(CallError::Internal("call client task failed".to_string())),
            Err(_) => Err(CallError::Internal(format!(
                "call client did not stop within {timeout:?}"
            ))),
        }
    }
}
