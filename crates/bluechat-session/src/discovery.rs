//! Nearby device discovery with duplicate suppression

use std::collections::HashSet;
use std::sync::Arc;

use bluechat_core::{
    DeviceInfo, DiscoveryFeedEvent, DiscoveryProvider, PeerAddress, TransportError,
    DISCOVERABLE_DURATION,
};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Events reported by [`DeviceDiscovery`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Started,
    /// A device not reported before by this discovery instance
    DeviceFound(DeviceInfo),
    Finished,
}

/// Wraps a platform discovery and reports each device address once
pub struct DeviceDiscovery {
    provider: Arc<dyn DiscoveryProvider>,
    events: mpsc::UnboundedSender<DiscoveryEvent>,
    seen: Arc<Mutex<HashSet<PeerAddress>>>,
    running: Mutex<Option<CancellationToken>>,
}

impl DeviceDiscovery {
    pub fn new(
        provider: Arc<dyn DiscoveryProvider>,
    ) -> (Self, mpsc::UnboundedReceiver<DiscoveryEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let discovery = Self {
            provider,
            events,
            seen: Arc::new(Mutex::new(HashSet::new())),
            running: Mutex::new(None),
        };
        (discovery, receiver)
    }

    /// Start an inquiry, cancelling one that is already running
    ///
    /// Concurrent calls are serialized, so at most one forwarding task runs.
    pub async fn start_discovery(&self) -> Result<(), TransportError> {
        let mut running = self.running.lock().await;
        self.cancel_running(&mut running).await;

        let mut feed = self.provider.start_discovery().await?;
        let cancel = CancellationToken::new();
        *running = Some(cancel.clone());

        let events = self.events.clone();
        let seen = Arc::clone(&self.seen);
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = feed.recv() => next,
                };
                let event = match next {
                    Some(DiscoveryFeedEvent::Started) => DiscoveryEvent::Started,
                    Some(DiscoveryFeedEvent::Found(device)) => {
                        if !seen.lock().await.insert(device.address) {
                            continue;
                        }
                        info!("found device {}", device.address);
                        DiscoveryEvent::DeviceFound(device)
                    }
                    Some(DiscoveryFeedEvent::Finished) => DiscoveryEvent::Finished,
                    None => break,
                };
                if events.send(event).is_err() {
                    break;
                }
            }
            debug!("discovery feed closed");
        });
        Ok(())
    }

    pub async fn stop_discovery(&self) {
        let mut running = self.running.lock().await;
        self.cancel_running(&mut running).await;
    }

    async fn cancel_running(&self, running: &mut Option<CancellationToken>) {
        if let Some(cancel) = running.take() {
            cancel.cancel();
            self.provider.cancel_discovery().await;
        }
    }

    /// Devices already paired with this host
    pub async fn bonded_devices(&self) -> Vec<DeviceInfo> {
        self.provider.bonded_devices().await
    }

    /// Make this adapter visible to inquiring peers if it is not already
    ///
    /// Returns whether a discoverable request was made.
    pub async fn ensure_discoverable(&self) -> Result<bool, TransportError> {
        if self.provider.is_discoverable().await {
            return Ok(false);
        }
        info!("requesting discoverable mode for {:?}", DISCOVERABLE_DURATION);
        self.provider.request_discoverable(DISCOVERABLE_DURATION).await?;
        Ok(true)
    }

    /// Forget previously reported addresses
    pub async fn clear_seen(&self) {
        self.seen.lock().await.clear();
    }
}
