//! Loopback advertisement radio
//!
//! Every payload put on air is delivered once to each running scan, along with a
//! transmission log the test can inspect. The loopback radio does no service
//! filtering of its own, so scanners see foreign and malformed advertisements
//! exactly as injected.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bluechat_core::{BroadcastError, BroadcastProvider, ScanFeedEvent, ScanProvider, ServiceId};
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Default)]
struct RadioState {
    on_air: Option<(ServiceId, Bytes)>,
    transmitted: Vec<Bytes>,
    scanners: Vec<mpsc::UnboundedSender<ScanFeedEvent>>,
    broadcast_failure: Option<i32>,
    scan_failure: Option<String>,
}

/// Shared advertisement medium; clones talk to the same air
#[derive(Clone, Default)]
pub struct LoopbackRadio {
    state: Arc<Mutex<RadioState>>,
}

impl LoopbackRadio {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut RadioState) -> T) -> T {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut state)
    }

    /// Deliver an advertisement to every scanner without putting it on air
    pub fn inject(&self, service: ServiceId, payload: impl Into<Bytes>) {
        let payload = payload.into();
        self.with_state(|state| deliver(state, service, payload));
    }

    /// Report a platform scan failure code to every scanner
    pub fn fail_scans(&self, code: i32) {
        self.with_state(|state| {
            state
                .scanners
                .retain(|tx| tx.send(ScanFeedEvent::Failed { code }).is_ok());
        });
    }

    /// Make the next `start_broadcast` fail with a platform error code
    pub fn fail_next_broadcast(&self, code: i32) {
        self.with_state(|state| state.broadcast_failure = Some(code));
    }

    /// Make the next `start_scan` fail with `reason`
    pub fn fail_next_scan(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.with_state(|state| state.scan_failure = Some(reason));
    }

    /// Payload currently on air
    pub fn on_air(&self) -> Option<Bytes> {
        self.with_state(|state| state.on_air.as_ref().map(|(_, payload)| payload.clone()))
    }

    /// Every payload put on air so far, oldest first
    pub fn transmitted(&self) -> Vec<Bytes> {
        self.with_state(|state| state.transmitted.clone())
    }

    pub fn scanner_count(&self) -> usize {
        self.with_state(|state| {
            state.scanners.retain(|tx| !tx.is_closed());
            state.scanners.len()
        })
    }
}

fn deliver(state: &mut RadioState, service: ServiceId, payload: Bytes) {
    state.scanners.retain(|tx| {
        tx.send(ScanFeedEvent::Advertisement {
            service,
            payload: payload.clone(),
        })
        .is_ok()
    });
}

#[async_trait]
impl BroadcastProvider for LoopbackRadio {
    async fn start_broadcast(&self, service: ServiceId, payload: Bytes) -> Result<(), BroadcastError> {
        self.with_state(|state| {
            if let Some(code) = state.broadcast_failure.take() {
                return Err(BroadcastError::AdvertiseRejected { code });
            }
            debug!("on air: {} bytes for {}", payload.len(), service);
            state.on_air = Some((service, payload.clone()));
            state.transmitted.push(payload.clone());
            deliver(state, service, payload);
            Ok(())
        })
    }

    async fn stop_broadcast(&self) {
        self.with_state(|state| state.on_air = None);
    }
}

#[async_trait]
impl ScanProvider for LoopbackRadio {
    async fn start_scan(
        &self,
        service: ServiceId,
    ) -> Result<mpsc::UnboundedReceiver<ScanFeedEvent>, BroadcastError> {
        self.with_state(|state| {
            if let Some(reason) = state.scan_failure.take() {
                return Err(BroadcastError::ScanFailed(reason));
            }
            debug!("scan started for {}", service);
            let (tx, rx) = mpsc::unbounded_channel();
            state.scanners.push(tx);
            Ok(rx)
        })
    }

    async fn stop_scan(&self) {
        self.with_state(|state| state.scanners.clear());
    }
}
