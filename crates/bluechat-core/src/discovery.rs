//! Classic device discovery abstraction

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::errors::TransportError;
use crate::types::PeerAddress;

/// How long a discoverable request keeps the adapter visible
pub const DISCOVERABLE_DURATION: Duration = Duration::from_secs(300);

/// A remote device seen by discovery or known from pairing
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub address: PeerAddress,
    pub name: Option<String>,
}

impl DeviceInfo {
    pub fn new(address: PeerAddress, name: Option<String>) -> Self {
        Self { address, name }
    }
}

/// Raw events delivered by the platform discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryFeedEvent {
    Started,
    Found(DeviceInfo),
    Finished,
}

/// Runs inquiry scans for nearby classic devices
#[async_trait]
pub trait DiscoveryProvider: Send + Sync + 'static {
    /// Begin an inquiry; events arrive on the returned channel
    async fn start_discovery(
        &self,
    ) -> Result<mpsc::UnboundedReceiver<DiscoveryFeedEvent>, TransportError>;

    /// Cancel a running inquiry
    async fn cancel_discovery(&self);

    /// Devices already paired with this adapter
    async fn bonded_devices(&self) -> Vec<DeviceInfo>;

    /// Whether other devices can currently find and connect to this adapter
    async fn is_discoverable(&self) -> bool {
        true
    }

    /// Ask the platform to make this adapter discoverable for `duration`
    async fn request_discoverable(&self, _duration: Duration) -> Result<(), TransportError> {
        Ok(())
    }
}
