//! Broadcast subsystem events

use bluechat_core::GenerationHash;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Notifications from the fragmenter and reassembler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastEvent {
    /// A chunk was stored; `received` of `total` chunks are now held
    Progress { received: usize, total: usize },
    /// Every chunk of one generation arrived
    Completed {
        payload: Bytes,
        generation: GenerationHash,
    },
    /// A transmission could not be started; the advertising loop stopped
    AdvertiseFailed(String),
    /// The scan stopped with a failure; the partial set is kept
    ScanFailed(String),
}

pub type BroadcastEventSender = mpsc::UnboundedSender<BroadcastEvent>;
pub type BroadcastEventReceiver = mpsc::UnboundedReceiver<BroadcastEvent>;
