//! Broadcast reassembler
//!
//! Listens to the scan feed, picks out chunks tagged with the expected service,
//! and rebuilds the payload they belong to. Progress is reported after every
//! stored chunk and completion once per generation.

use std::sync::Arc;

use bluechat_core::{
    BroadcastError, Fragment, FragmentAssembler, GenerationHash, ScanFeedEvent, ScanProvider,
    ServiceId,
};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::error::ScanFailure;
use crate::events::{BroadcastEvent, BroadcastEventReceiver, BroadcastEventSender};

struct ScanLoop {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Rebuilds broadcast payloads from scanned advertisements
///
/// The partially received set survives `stop_scan`, so a later scan of the same
/// generation resumes where the previous one left off.
pub struct BroadcastReassembler {
    provider: Arc<dyn ScanProvider>,
    events: BroadcastEventSender,
    assembler: Arc<Mutex<FragmentAssembler>>,
    active: Mutex<Option<ScanLoop>>,
}

impl BroadcastReassembler {
    pub fn new(provider: Arc<dyn ScanProvider>) -> (Self, BroadcastEventReceiver) {
        let (events, receiver) = mpsc::unbounded_channel();
        (Self::with_sender(provider, events), receiver)
    }

    /// Build a reassembler that reports on an existing event channel
    pub fn with_sender(provider: Arc<dyn ScanProvider>, events: BroadcastEventSender) -> Self {
        Self {
            provider,
            events,
            assembler: Arc::new(Mutex::new(FragmentAssembler::new())),
            active: Mutex::new(None),
        }
    }

    /// Scan for chunks advertised under `service`, replacing any running scan
    pub async fn start_scan(&self, service: ServiceId) -> Result<(), BroadcastError> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            halt(previous).await;
            self.provider.stop_scan().await;
        }

        let feed = self.provider.start_scan(service).await.map_err(|e| {
            error!("Failed to start scan for {}: {}", service, e);
            e
        })?;
        info!("Scanning for broadcast chunks on {}", service);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_scan(
            Arc::clone(&self.provider),
            service,
            feed,
            Arc::clone(&self.assembler),
            self.events.clone(),
            cancel.clone(),
        ));
        *active = Some(ScanLoop { cancel, task });
        Ok(())
    }

    /// Stop scanning; chunks received so far are kept
    pub async fn stop_scan(&self) {
        if let Some(running) = self.active.lock().await.take() {
            info!("Stopping scan");
            halt(running).await;
            self.provider.stop_scan().await;
        }
    }

    pub async fn is_scanning(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    /// Progress of the set in flight as `(received, total, generation)`
    pub async fn in_progress(&self) -> Option<(usize, usize, GenerationHash)> {
        self.assembler.lock().await.in_progress()
    }
}

async fn halt(running: ScanLoop) {
    running.cancel.cancel();
    if let Err(e) = running.task.await {
        error!("Scan loop ended abnormally: {}", e);
    }
}

async fn run_scan(
    provider: Arc<dyn ScanProvider>,
    service: ServiceId,
    mut feed: mpsc::UnboundedReceiver<ScanFeedEvent>,
    assembler: Arc<Mutex<FragmentAssembler>>,
    events: BroadcastEventSender,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = feed.recv() => next,
        };

        match next {
            Some(ScanFeedEvent::Advertisement { service: heard, payload }) => {
                if heard != service {
                    trace!("Ignoring advertisement for {}", heard);
                    continue;
                }
                let fragment = match Fragment::from_bytes(&payload) {
                    Ok(fragment) => fragment,
                    Err(e) => {
                        warn!("Ignoring malformed chunk ({} bytes): {}", payload.len(), e);
                        continue;
                    }
                };

                let observation = match assembler.lock().await.observe_fragment(fragment) {
                    Ok(observation) => observation,
                    Err(e) => {
                        warn!("Chunk rejected: {}", e);
                        continue;
                    }
                };

                let _ = events.send(BroadcastEvent::Progress {
                    received: observation.received,
                    total: observation.total,
                });
                if let Some(done) = observation.completed {
                    info!(
                        "Reassembled {} bytes, generation {}",
                        done.payload.len(),
                        done.generation
                    );
                    let _ = events.send(BroadcastEvent::Completed {
                        payload: done.payload,
                        generation: done.generation,
                    });
                }
            }
            Some(ScanFeedEvent::Failed { code }) => {
                let failure = ScanFailure::from_code(code);
                error!("Scan failed: {}", failure);
                let _ = events.send(BroadcastEvent::ScanFailed(failure.to_string()));
                provider.stop_scan().await;
                break;
            }
            None => {
                debug!("Scan feed closed");
                break;
            }
        }
    }
}
