//! Broadcast radio abstraction
//!
//! The advertisement channel is reached through [`BroadcastProvider`], which puts
//! exactly one payload on air at a time, and [`ScanProvider`], which delivers
//! every advertisement it hears as a [`ScanFeedEvent`].

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::errors::BroadcastError;
use crate::types::ServiceId;

/// Events delivered by a running scan, one at a time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanFeedEvent {
    /// An advertisement carrying service data
    Advertisement { service: ServiceId, payload: Bytes },
    /// The platform scan stopped with a failure code
    Failed { code: i32 },
}

/// Transmits advertisement payloads
#[async_trait]
pub trait BroadcastProvider: Send + Sync + 'static {
    /// Put `payload` on air as service data for `service`
    async fn start_broadcast(&self, service: ServiceId, payload: Bytes) -> Result<(), BroadcastError>;

    /// Take the current transmission off air
    async fn stop_broadcast(&self);
}

/// Receives advertisement payloads
#[async_trait]
pub trait ScanProvider: Send + Sync + 'static {
    /// Start scanning for advertisements filtered on `service`
    async fn start_scan(
        &self,
        service: ServiceId,
    ) -> Result<mpsc::UnboundedReceiver<ScanFeedEvent>, BroadcastError>;

    /// Stop the platform scan
    async fn stop_scan(&self);
}
