//! Broadcast fragmenter
//!
//! Puts a payload on air one chunk at a time. Each chunk is advertised for the
//! configured dwell time and then taken down before the next one goes up, and the
//! sequence wraps around until the loop is stopped or replaced.

use std::sync::Arc;

use bluechat_core::{BroadcastConfig, BroadcastError, BroadcastProvider, Fragment, ServiceId};
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::advertise_failure_text;
use crate::events::{BroadcastEvent, BroadcastEventReceiver, BroadcastEventSender};

struct AdvertisingLoop {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Drives the chunked advertising loop
pub struct BroadcastFragmenter {
    provider: Arc<dyn BroadcastProvider>,
    config: BroadcastConfig,
    events: BroadcastEventSender,
    active: Mutex<Option<AdvertisingLoop>>,
}

impl BroadcastFragmenter {
    pub fn new(
        provider: Arc<dyn BroadcastProvider>,
        config: BroadcastConfig,
    ) -> (Self, BroadcastEventReceiver) {
        let (events, receiver) = mpsc::unbounded_channel();
        (Self::with_sender(provider, config, events), receiver)
    }

    /// Build a fragmenter that reports on an existing event channel
    pub fn with_sender(
        provider: Arc<dyn BroadcastProvider>,
        config: BroadcastConfig,
        events: BroadcastEventSender,
    ) -> Self {
        Self {
            provider,
            config,
            events,
            active: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &BroadcastConfig {
        &self.config
    }

    /// Start looping `payload` on air in chunks of `chunk_size` body bytes
    ///
    /// A loop that is already running is stopped, and its transmission taken
    /// down, before the new one starts. Payloads that cannot be fragmented are
    /// rejected without touching the radio.
    pub async fn start_advertising(&self, payload: &[u8], chunk_size: usize) -> Result<(), BroadcastError> {
        let fragments = Fragment::fragment_payload(payload, chunk_size)?;
        let frames: Vec<Bytes> = fragments.iter().map(Fragment::to_bytes).collect();

        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            debug!("Replacing running advertising loop");
            halt(previous).await;
        }

        let generation = fragments[0].header.generation;
        info!(
            "Advertising {} bytes as {} chunk(s), generation {}",
            payload.len(),
            frames.len(),
            generation
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_loop(
            Arc::clone(&self.provider),
            self.config.service_id,
            frames,
            self.config.dwell(),
            self.events.clone(),
            cancel.clone(),
        ));
        *active = Some(AdvertisingLoop { cancel, task });
        Ok(())
    }

    /// Start looping `payload` with the configured chunk size
    pub async fn start_advertising_default(&self, payload: &[u8]) -> Result<(), BroadcastError> {
        self.start_advertising(payload, self.config.chunk_size).await
    }

    /// Stop the loop and take down the chunk currently on air
    pub async fn stop_advertising(&self) {
        if let Some(running) = self.active.lock().await.take() {
            info!("Stopping advertising loop");
            halt(running).await;
        }
    }

    /// Whether a loop is still cycling chunks
    pub async fn is_advertising(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }
}

async fn halt(running: AdvertisingLoop) {
    running.cancel.cancel();
    if let Err(e) = running.task.await {
        error!("Advertising loop ended abnormally: {}", e);
    }
}

async fn run_loop(
    provider: Arc<dyn BroadcastProvider>,
    service: ServiceId,
    frames: Vec<Bytes>,
    dwell: std::time::Duration,
    events: BroadcastEventSender,
    cancel: CancellationToken,
) {
    let mut cycle: u64 = 0;
    loop {
        for (index, frame) in frames.iter().enumerate() {
            if cancel.is_cancelled() {
                return;
            }

            if let Err(e) = provider.start_broadcast(service, frame.clone()).await {
                let text = advertise_failure_text(&e);
                error!("Failed to start advertising chunk {}: {}", index, text);
                let _ = events.send(BroadcastEvent::AdvertiseFailed(text));
                return;
            }
            debug!("chunk {} on air: {}", index, hex::encode(frame));

            let interrupted = tokio::select! {
                biased;
                _ = cancel.cancelled() => true,
                _ = tokio::time::sleep(dwell) => false,
            };
            provider.stop_broadcast().await;
            if interrupted {
                debug!("Advertising loop cancelled during chunk {}", index);
                return;
            }
        }

        cycle += 1;
        debug!("Completed advertising cycle {}", cycle);
    }
}
