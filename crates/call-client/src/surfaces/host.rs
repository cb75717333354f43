//! Modal host: mounts a call modal whenever a session opens.

use super::modal::CallModal;
use crate::coordinator::{CallCoordinatorHandle, StatusEvent, Subscription};
use crate::errors::CallError;
use tracing::{info, warn};

/// Listens for `SessionOpened` and mounts the modal matching its medium.
pub struct ModalHost {
    handle: CallCoordinatorHandle,
    events: Subscription,
}

impl ModalHost {
    pub async fn new(handle: CallCoordinatorHandle) -> Result<Self, CallError> {
        let events = handle.subscribe().await?;
        Ok(Self { handle, events })
    }

    /// Wait for the next session to open and mount its modal.
    ///
    /// Returns `None` once the coordinator stopped.
    pub async fn next_opened(&mut self) -> Option<CallModal> {
        while let Some(event) = self.events.recv().await {
            let StatusEvent::SessionOpened { call } = event else {
                continue;
            };
            let room = call.room().clone();
            let medium = call.medium();
            match CallModal::open(self.handle.clone(), call).await {
                Ok(modal) => {
                    info!(target: "call.surface", room = %room, medium = %medium, "Mounted call modal");
                    return Some(modal);
                }
                Err(e) => {
                    warn!(target: "call.surface", room = %room, error = %e, "Failed to mount call modal");
                }
            }
        }
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::coordinator::{CallCoordinator, CallRequest, CoordinatorSettings};
    use crate::media::MockMediaTransport;
    use crate::models::Medium;
    use crate::service::MockCallService;
    use crate::surfaces::ModalView;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_host_mounts_modal_for_medium() {
        let (handle, _task) = CallCoordinator::spawn(
            CoordinatorSettings {
                local_email: "buyer@market.test".to_string(),
                no_answer_timeout: Duration::from_secs(30),
                terminal_auto_close: Duration::from_millis(2500),
            },
            Arc::new(MockCallService::new()),
            Arc::new(MockMediaTransport::new()),
            CancellationToken::new(),
        );
        let mut host = ModalHost::new(handle.clone()).await.unwrap();

        handle
            .initiate(CallRequest::new("vendor@shop.test", Medium::Video))
            .await
            .unwrap();

        let modal = tokio::time::timeout(Duration::from_secs(5), host.next_opened())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(modal.medium(), Medium::Video);
        assert!(modal.call().is_initiator);
        assert_eq!(modal.view(), &ModalView::Connecting);
    }

    #[tokio::test]
    async fn test_host_stops_with_coordinator() {
        let cancel = CancellationToken::new();
        let (handle, task) = CallCoordinator::spawn(
            CoordinatorSettings {
                local_email: "buyer@market.test".to_string(),
                no_answer_timeout: Duration::from_secs(30),
                terminal_auto_close: Duration::from_millis(2500),
            },
            Arc::new(MockCallService::new()),
            Arc::new(MockMediaTransport::new()),
            cancel.clone(),
        );
        let mut host = ModalHost::new(handle).await.unwrap();

        cancel.cancel();
        task.await.unwrap();
        assert!(host.next_opened().await.is_none());
    }
}
