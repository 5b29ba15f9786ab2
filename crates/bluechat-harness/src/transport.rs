//! Loopback stream transport
//!
//! A [`LoopbackNetwork`] connects any number of simulated devices. Each device is
//! a [`LoopbackTransport`] that can listen on services and dial other devices.
//! Every link runs through a relay task, so the test can sever it at any moment
//! and both ends observe the loss the way they would on a real radio.

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bluechat_core::{
    Connection, PeerAddress, SecurityMode, ServerSocket, ServiceId, TransportError,
    TransportProvider,
};
use tokio::io::{AsyncWrite, DuplexStream, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// In-flight buffer of each direction of a loopback link
const LINK_BUFFER: usize = 64 * 1024;

type ListenerKey = (PeerAddress, ServiceId);

struct Link {
    ends: (PeerAddress, PeerAddress),
    kill: CancellationToken,
}

#[derive(Default)]
struct NetworkState {
    listeners: HashMap<ListenerKey, mpsc::UnboundedSender<Connection>>,
    links: Vec<Link>,
}

// ----------------------------------------------------------------------------
// Loopback Network
// ----------------------------------------------------------------------------

/// Shared medium joining every simulated device
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a device with the given hardware address
    pub fn device(&self, address: PeerAddress) -> LoopbackTransport {
        LoopbackTransport {
            address,
            network: self.clone(),
            faults: Arc::new(Faults::default()),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut NetworkState) -> T) -> T {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut state)
    }

    /// Whether `address` currently has a server socket open on `service`
    pub fn is_listening(&self, address: PeerAddress, service: ServiceId) -> bool {
        self.with_state(|state| {
            state
                .listeners
                .get(&(address, service))
                .is_some_and(|tx| !tx.is_closed())
        })
    }

    /// Wait until `address` listens on `service`, up to `timeout`
    pub async fn wait_for_listener(
        &self,
        address: PeerAddress,
        service: ServiceId,
        timeout: Duration,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.is_listening(address, service) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.is_listening(address, service)
    }

    /// Number of links that have not been severed
    pub fn live_links(&self) -> usize {
        self.with_state(|state| {
            state.links.retain(|link| !link.kill.is_cancelled());
            state.links.len()
        })
    }

    /// Sever every link that has `address` at either end
    pub fn sever(&self, address: PeerAddress) -> usize {
        self.with_state(|state| {
            let mut severed = 0;
            state.links.retain(|link| {
                if link.ends.0 == address || link.ends.1 == address {
                    link.kill.cancel();
                    severed += 1;
                    false
                } else {
                    true
                }
            });
            info!("severed {} link(s) at {}", severed, address);
            severed
        })
    }

    /// Open a relayed link, returning the dialer's stream and the listener's connection
    fn open_link(&self, from: PeerAddress, to: PeerAddress) -> (DuplexStream, Connection) {
        let (near, mut relay_near) = tokio::io::duplex(LINK_BUFFER);
        let (far, mut relay_far) = tokio::io::duplex(LINK_BUFFER);
        let kill = CancellationToken::new();

        let relay_kill = kill.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = relay_kill.cancelled() => debug!("link {} <-> {} severed", from, to),
                result = tokio::io::copy_bidirectional(&mut relay_near, &mut relay_far) => {
                    debug!("link {} <-> {} finished: {:?}", from, to, result);
                }
            }
            relay_kill.cancel();
        });

        self.with_state(|state| {
            state.links.retain(|link| !link.kill.is_cancelled());
            state.links.push(Link {
                ends: (from, to),
                kill,
            })
        });

        (near, Connection::from_stream(from, far))
    }
}

// ----------------------------------------------------------------------------
// Fault Injection
// ----------------------------------------------------------------------------

#[derive(Default)]
struct Faults {
    failing_connects: AtomicUsize,
    failing_listens: AtomicUsize,
    failing_writes: AtomicBool,
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Write half that errors while the owning device has writes broken
struct FaultyWriter {
    inner: WriteHalf<DuplexStream>,
    faults: Arc<Faults>,
}

impl FaultyWriter {
    fn broken(&self) -> bool {
        self.faults.failing_writes.load(Ordering::SeqCst)
    }
}

impl AsyncWrite for FaultyWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.broken() {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "injected write failure",
            )));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

// ----------------------------------------------------------------------------
// Loopback Transport
// ----------------------------------------------------------------------------

/// One simulated device on a [`LoopbackNetwork`]
#[derive(Clone)]
pub struct LoopbackTransport {
    address: PeerAddress,
    network: LoopbackNetwork,
    faults: Arc<Faults>,
}

impl LoopbackTransport {
    pub fn address(&self) -> PeerAddress {
        self.address
    }

    pub fn network(&self) -> &LoopbackNetwork {
        &self.network
    }

    /// Make the next `count` outbound connects fail
    pub fn fail_next_connects(&self, count: usize) {
        self.faults.failing_connects.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` listens fail
    pub fn fail_next_listens(&self, count: usize) {
        self.faults.failing_listens.store(count, Ordering::SeqCst);
    }

    /// Make every write on connections this device dialed fail until cleared
    pub fn fail_writes(&self, failing: bool) {
        self.faults.failing_writes.store(failing, Ordering::SeqCst);
    }

    /// Sever every live link of this device
    pub fn force_close(&self) -> usize {
        self.network.sever(self.address)
    }
}

#[async_trait]
impl TransportProvider for LoopbackTransport {
    async fn listen(
        &self,
        service: ServiceId,
        security: SecurityMode,
    ) -> Result<Box<dyn ServerSocket>, TransportError> {
        if take_one(&self.faults.failing_listens) {
            return Err(TransportError::ListenFailed {
                service: service.to_string(),
                reason: "injected listen failure".to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let key = (self.address, service);
        self.network.with_state(|state| {
            state.listeners.insert(key, tx);
        });
        debug!("{} listening on {} ({})", self.address, service, security);

        Ok(Box::new(LoopbackServerSocket {
            key,
            network: self.network.clone(),
            incoming: rx,
        }))
    }

    async fn connect_to(
        &self,
        peer: PeerAddress,
        service: ServiceId,
        _security: SecurityMode,
    ) -> Result<Connection, TransportError> {
        if take_one(&self.faults.failing_connects) {
            return Err(TransportError::ConnectionFailed {
                peer: peer.to_string(),
                reason: "injected connect failure".to_string(),
            });
        }

        let listener = self
            .network
            .with_state(|state| state.listeners.get(&(peer, service)).cloned());
        let listener = listener.ok_or_else(|| TransportError::ConnectionFailed {
            peer: peer.to_string(),
            reason: format!("no listener on {service}"),
        })?;

        let (near, far) = self.network.open_link(self.address, peer);
        let (reader, writer) = tokio::io::split(near);
        let writer = FaultyWriter {
            inner: writer,
            faults: Arc::clone(&self.faults),
        };
        let near = Connection::new(peer, Box::new(reader), Box::new(writer));
        listener
            .send(far)
            .map_err(|_| TransportError::ConnectionFailed {
                peer: peer.to_string(),
                reason: "listener closed".to_string(),
            })?;
        Ok(near)
    }
}

// ----------------------------------------------------------------------------
// Server Socket
// ----------------------------------------------------------------------------

struct LoopbackServerSocket {
    key: ListenerKey,
    network: LoopbackNetwork,
    incoming: mpsc::UnboundedReceiver<Connection>,
}

impl LoopbackServerSocket {
    fn unregister(&mut self) {
        self.incoming.close();
        let key = self.key;
        self.network.with_state(|state| {
            if state.listeners.get(&key).is_some_and(|tx| tx.is_closed()) {
                state.listeners.remove(&key);
            }
        });
    }
}

#[async_trait]
impl ServerSocket for LoopbackServerSocket {
    async fn accept(&mut self) -> Result<Connection, TransportError> {
        self.incoming.recv().await.ok_or(TransportError::Closed)
    }

    async fn close(&mut self) {
        self.unregister();
    }
}

impl Drop for LoopbackServerSocket {
    fn drop(&mut self) {
        self.unregister();
    }
}
