//! Single-peer session manager
//!
//! At most one background worker is alive per manager: a listener waiting on a
//! server socket, a connector dialing a peer, or a data pump reading frames from
//! an established connection. Every state change happens under one lock together
//! with replacing that worker, so a worker that has been superseded can never
//! promote a connection or trigger recovery.

use std::sync::Arc;

use bluechat_core::{
    BluechatError, BoxedReader, BoxedWriter, ConfigError, Connection, FrameCodec, FrameError,
    PeerAddress, SecurityMode, ServiceId, SessionConfig, SessionState, TransportProvider,
};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::events::{
    EventReceiver, EventSender, SessionEvent, CONNECTION_LOST_MESSAGE, CONNECT_FAILED_MESSAGE,
    WRITE_FAILED_MESSAGE,
};
use crate::workers;

pub(crate) type SharedWriter = Arc<Mutex<BoxedWriter>>;

/// Service and security mode a session was started with, reused on recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub service: ServiceId,
    pub security: SecurityMode,
}

impl Endpoint {
    pub fn new(service: ServiceId, security: SecurityMode) -> Self {
        Self { service, security }
    }
}

// ----------------------------------------------------------------------------
// Worker Bookkeeping
// ----------------------------------------------------------------------------

struct WorkerHandle {
    id: u64,
    cancel: CancellationToken,
}

struct PumpHandle {
    worker: WorkerHandle,
    peer: PeerAddress,
    writer: SharedWriter,
    endpoint: Endpoint,
}

enum ActiveWorker {
    None,
    Listener(WorkerHandle),
    Connector(WorkerHandle),
    DataPump(PumpHandle),
}

impl ActiveWorker {
    fn id(&self) -> Option<u64> {
        match self {
            Self::None => None,
            Self::Listener(handle) | Self::Connector(handle) => Some(handle.id),
            Self::DataPump(pump) => Some(pump.worker.id),
        }
    }

    fn cancel(&self) {
        match self {
            Self::None => {}
            Self::Listener(handle) | Self::Connector(handle) => handle.cancel.cancel(),
            Self::DataPump(pump) => pump.worker.cancel.cancel(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Listener(_) => "listener",
            Self::Connector(_) => "connector",
            Self::DataPump(_) => "data pump",
        }
    }
}

struct SessionSlot {
    state: SessionState,
    worker: ActiveWorker,
    endpoint: Option<Endpoint>,
    next_worker_id: u64,
}

/// Result of offering a fresh connection to the session
pub(crate) enum Promotion {
    /// The connection now backs the session
    Promoted,
    /// The session is not accepting connections; the socket was closed
    Rejected,
    /// The offering worker was superseded; the socket was closed
    Stale,
}

// ----------------------------------------------------------------------------
// Shared Core
// ----------------------------------------------------------------------------

pub(crate) struct SessionCore {
    transport: Arc<dyn TransportProvider>,
    codec: FrameCodec,
    events: EventSender,
    shutdown: CancellationToken,
    slot: Mutex<SessionSlot>,
}

impl SessionCore {
    pub(crate) fn transport(&self) -> &dyn TransportProvider {
        self.transport.as_ref()
    }

    pub(crate) fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("Session event receiver dropped");
        }
    }

    fn set_state(&self, slot: &mut SessionSlot, state: SessionState) {
        debug!("state {} -> {}", slot.state, state);
        slot.state = state;
        self.emit(SessionEvent::StateChanged(state));
    }

    fn next_worker(&self, slot: &mut SessionSlot) -> WorkerHandle {
        slot.next_worker_id += 1;
        WorkerHandle {
            id: slot.next_worker_id,
            cancel: self.shutdown.child_token(),
        }
    }

    /// Cancel whatever worker is current and leave the slot empty
    fn retire_worker(&self, slot: &mut SessionSlot) {
        let previous = std::mem::replace(&mut slot.worker, ActiveWorker::None);
        if previous.id().is_some() {
            debug!("Cancelling {} worker", previous.name());
        }
        previous.cancel();
    }

    fn begin_listening(self: &Arc<Self>, slot: &mut SessionSlot, endpoint: Endpoint) {
        self.retire_worker(slot);
        let handle = self.next_worker(slot);
        tokio::spawn(workers::run_listener(
            Arc::clone(self),
            handle.id,
            endpoint,
            handle.cancel.clone(),
        ));
        slot.worker = ActiveWorker::Listener(handle);
        self.set_state(slot, SessionState::Listening);
    }

    fn begin_connecting(self: &Arc<Self>, slot: &mut SessionSlot, peer: PeerAddress, endpoint: Endpoint) {
        self.retire_worker(slot);
        let handle = self.next_worker(slot);
        tokio::spawn(workers::run_connector(
            Arc::clone(self),
            handle.id,
            peer,
            endpoint,
            handle.cancel.clone(),
        ));
        slot.worker = ActiveWorker::Connector(handle);
        self.set_state(slot, SessionState::Connecting);
    }

    /// Hand a freshly opened connection to the session
    ///
    /// Only the current listener or connector may promote, and only while the
    /// session is LISTENING or CONNECTING. Anything else closes the socket.
    pub(crate) async fn promote(
        self: &Arc<Self>,
        worker_id: u64,
        connection: Connection,
        endpoint: Endpoint,
    ) -> Promotion {
        let (peer, reader, writer) = connection.into_split();
        let mut slot = self.slot.lock().await;

        if slot.worker.id() != Some(worker_id) {
            drop(slot);
            debug!("Superseded worker {} closing socket to {}", worker_id, peer);
            close_socket(reader, writer).await;
            return Promotion::Stale;
        }

        if !slot.state.accepts_inbound() {
            drop(slot);
            warn!("Closing unwanted socket to {}", peer);
            close_socket(reader, writer).await;
            return Promotion::Rejected;
        }

        info!("connected, peer {}", peer);
        self.retire_worker(&mut slot);
        let handle = self.next_worker(&mut slot);
        let writer: SharedWriter = Arc::new(Mutex::new(writer));
        tokio::spawn(workers::run_data_pump(
            Arc::clone(self),
            handle.id,
            peer,
            reader,
            Arc::clone(&writer),
            endpoint,
            handle.cancel.clone(),
        ));
        slot.worker = ActiveWorker::DataPump(PumpHandle {
            worker: handle,
            peer,
            writer,
            endpoint,
        });

        self.emit(SessionEvent::ConnectedTo(peer));
        self.set_state(&mut slot, SessionState::Connected);
        Promotion::Promoted
    }

    /// Report an error and fall back to listening, unless `worker_id` was superseded
    async fn recover(self: &Arc<Self>, worker_id: u64, endpoint: Endpoint, message: &str) {
        let mut slot = self.slot.lock().await;
        if slot.worker.id() != Some(worker_id) {
            debug!("Ignoring failure from superseded worker {}", worker_id);
            return;
        }
        self.emit(SessionEvent::Error(message.to_string()));
        self.begin_listening(&mut slot, endpoint);
    }

    pub(crate) async fn connection_failed(self: &Arc<Self>, worker_id: u64, endpoint: Endpoint) {
        self.recover(worker_id, endpoint, CONNECT_FAILED_MESSAGE).await;
    }

    pub(crate) async fn connection_lost(self: &Arc<Self>, worker_id: u64, endpoint: Endpoint) {
        self.recover(worker_id, endpoint, CONNECTION_LOST_MESSAGE).await;
    }

    pub(crate) async fn write_failed(self: &Arc<Self>, worker_id: u64, endpoint: Endpoint) {
        self.recover(worker_id, endpoint, WRITE_FAILED_MESSAGE).await;
    }
}

/// Shut down both halves of a socket
pub(crate) async fn close_socket(reader: BoxedReader, mut writer: BoxedWriter) {
    drop(reader);
    if let Err(e) = writer.shutdown().await {
        debug!("close() of connect socket failed: {}", e);
    }
}

// ----------------------------------------------------------------------------
// Session Manager
// ----------------------------------------------------------------------------

/// Owns one stream session and its background worker
///
/// Dropping the manager cancels every worker it started.
pub struct SessionManager {
    core: Arc<SessionCore>,
}

impl SessionManager {
    /// Create a manager in state NONE together with its event stream
    pub fn new(
        transport: Arc<dyn TransportProvider>,
        config: SessionConfig,
    ) -> Result<(Self, EventReceiver), ConfigError> {
        let codec = config.frame_codec()?;
        let (events, receiver) = mpsc::unbounded_channel();
        let core = Arc::new(SessionCore {
            transport,
            codec,
            events,
            shutdown: CancellationToken::new(),
            slot: Mutex::new(SessionSlot {
                state: SessionState::None,
                worker: ActiveWorker::None,
                endpoint: None,
                next_worker_id: 0,
            }),
        });
        Ok((Self { core }, receiver))
    }

    pub async fn state(&self) -> SessionState {
        self.core.slot.lock().await.state
    }

    /// Peer of the live connection, if any
    pub async fn peer(&self) -> Option<PeerAddress> {
        match &self.core.slot.lock().await.worker {
            ActiveWorker::DataPump(pump) => Some(pump.peer),
            _ => None,
        }
    }

    /// Service and security mode of the most recent listen or connect
    pub async fn endpoint(&self) -> Option<Endpoint> {
        self.core.slot.lock().await.endpoint
    }

    /// Listen for an inbound connection on `service`
    ///
    /// Any running worker is cancelled first, so calling this while connected
    /// drops the current peer.
    pub async fn start_listening(&self, service: ServiceId, security: SecurityMode) {
        let endpoint = Endpoint::new(service, security);
        info!("start listening on {} ({})", service, security);

        let mut slot = self.core.slot.lock().await;
        slot.endpoint = Some(endpoint);
        self.core.begin_listening(&mut slot, endpoint);
    }

    /// Dial `peer` on `service`, replacing any running worker
    pub async fn connect(&self, peer: PeerAddress, service: ServiceId, security: SecurityMode) {
        let endpoint = Endpoint::new(service, security);
        info!("connect to: {}", peer);

        let mut slot = self.core.slot.lock().await;
        slot.endpoint = Some(endpoint);
        self.core.begin_connecting(&mut slot, peer, endpoint);
    }

    /// Dial a peer given as a textual hardware address
    pub async fn connect_address(
        &self,
        address: &str,
        service: ServiceId,
        security: SecurityMode,
    ) -> Result<(), BluechatError> {
        let peer: PeerAddress = address
            .parse()
            .map_err(|_| BluechatError::invalid_address(address))?;
        self.connect(peer, service, security).await;
        Ok(())
    }

    /// Cancel every worker and return to NONE
    pub async fn stop(&self) {
        let mut slot = self.core.slot.lock().await;
        if slot.state == SessionState::None && slot.worker.id().is_none() {
            return;
        }
        info!("stop");
        self.core.retire_worker(&mut slot);
        self.core.set_state(&mut slot, SessionState::None);
    }

    /// Frame `body` and send it to the connected peer
    ///
    /// Outside CONNECTED the call does nothing. Transport failures surface as an
    /// error event followed by recovery; only a body too large for the configured
    /// header is returned to the caller. A write still pending when the connection
    /// closes is abandoned.
    pub async fn write(&self, body: &[u8]) -> Result<(), FrameError> {
        let (worker_id, writer, endpoint, closing) = {
            let slot = self.core.slot.lock().await;
            match (&slot.state, &slot.worker) {
                (SessionState::Connected, ActiveWorker::DataPump(pump)) => (
                    pump.worker.id,
                    Arc::clone(&pump.writer),
                    pump.endpoint,
                    pump.worker.cancel.clone(),
                ),
                _ => {
                    debug!("write() ignored in state {}", slot.state);
                    return Ok(());
                }
            }
        };

        let frame = self.core.codec().encode(body)?;
        let result = tokio::select! {
            biased;
            _ = closing.cancelled() => {
                debug!("write() abandoned, connection closing");
                return Ok(());
            }
            result = async {
                let mut writer = writer.lock().await;
                match writer.write_all(&frame).await {
                    Ok(()) => writer.flush().await,
                    Err(e) => Err(e),
                }
            } => result,
        };

        match result {
            Ok(()) => {
                self.core.emit(SessionEvent::MessageWritten(frame));
            }
            Err(e) => {
                error!("Exception during write: {}", e);
                self.core.write_failed(worker_id, endpoint).await;
            }
        }
        Ok(())
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.core.shutdown.cancel();
    }
}
