//! Scripted device discovery

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bluechat_core::{DeviceInfo, DiscoveryFeedEvent, DiscoveryProvider, TransportError};
use tokio::sync::mpsc;

#[derive(Default)]
struct DiscoveryState {
    nearby: Vec<DeviceInfo>,
    bonded: Vec<DeviceInfo>,
    fail_next: bool,
    cancelled: usize,
    discoverable: bool,
    visibility_requests: Vec<Duration>,
}

/// Discovery provider that replays a fixed list of sightings
///
/// Each inquiry reports `Started`, every sighting in order (duplicates included),
/// and then `Finished`.
#[derive(Clone, Default)]
pub struct LoopbackDiscovery {
    state: Arc<Mutex<DiscoveryState>>,
}

impl LoopbackDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut DiscoveryState) -> T) -> T {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut state)
    }

    pub fn add_sighting(&self, device: DeviceInfo) {
        self.with_state(|state| state.nearby.push(device));
    }

    pub fn add_bonded(&self, device: DeviceInfo) {
        self.with_state(|state| state.bonded.push(device));
    }

    pub fn fail_next_discovery(&self) {
        self.with_state(|state| state.fail_next = true);
    }

    /// Set whether the adapter is currently discoverable
    pub fn set_discoverable(&self, discoverable: bool) {
        self.with_state(|state| state.discoverable = discoverable);
    }

    /// Durations passed to every discoverable request so far
    pub fn visibility_requests(&self) -> Vec<Duration> {
        self.with_state(|state| state.visibility_requests.clone())
    }

    /// How many times a running inquiry was cancelled
    pub fn cancel_count(&self) -> usize {
        self.with_state(|state| state.cancelled)
    }
}

#[async_trait]
impl DiscoveryProvider for LoopbackDiscovery {
    async fn start_discovery(
        &self,
    ) -> Result<mpsc::UnboundedReceiver<DiscoveryFeedEvent>, TransportError> {
        // An inquiry takes a scheduler turn to spin up, as a radio would.
        tokio::task::yield_now().await;
        let sightings = self.with_state(|state| {
            if std::mem::take(&mut state.fail_next) {
                None
            } else {
                Some(state.nearby.clone())
            }
        });
        let sightings = sightings.ok_or_else(|| TransportError::Unavailable {
            reason: "adapter is off".to_string(),
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(DiscoveryFeedEvent::Started);
        for device in sightings {
            let _ = tx.send(DiscoveryFeedEvent::Found(device));
        }
        let _ = tx.send(DiscoveryFeedEvent::Finished);
        Ok(rx)
    }

    async fn cancel_discovery(&self) {
        self.with_state(|state| state.cancelled += 1);
    }

    async fn bonded_devices(&self) -> Vec<DeviceInfo> {
        self.with_state(|state| state.bonded.clone())
    }

    async fn is_discoverable(&self) -> bool {
        self.with_state(|state| state.discoverable)
    }

    async fn request_discoverable(&self, duration: Duration) -> Result<(), TransportError> {
        self.with_state(|state| {
            state.visibility_requests.push(duration);
            state.discoverable = true;
        });
        Ok(())
    }
}
