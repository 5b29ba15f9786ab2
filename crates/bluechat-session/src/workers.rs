//! Background workers spawned by the session manager
//!
//! Each worker owns its socket handle and releases it on every exit path. The
//! session slot is only touched through the [`SessionCore`] helpers, which check
//! that the worker is still the current one.

use std::sync::Arc;

use bluechat_core::{BoxedReader, FrameError, PeerAddress};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::events::SessionEvent;
use crate::manager::{Endpoint, Promotion, SessionCore, SharedWriter};

// ----------------------------------------------------------------------------
// Listener
// ----------------------------------------------------------------------------

/// Accept inbound connections until one is promoted or the worker is cancelled
pub(crate) async fn run_listener(
    core: Arc<SessionCore>,
    worker_id: u64,
    endpoint: Endpoint,
    cancel: CancellationToken,
) {
    info!("BEGIN listener, socket type {}", endpoint.security);

    let listened = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("listener {} cancelled before bind", worker_id);
            return;
        }
        result = core.transport().listen(endpoint.service, endpoint.security) => result,
    };

    let mut server = match listened {
        Ok(server) => server,
        Err(e) => {
            // Nothing to accept; the session stays LISTENING until told otherwise.
            error!("listen() failed for {}: {}", endpoint.service, e);
            return;
        }
    };

    loop {
        let accepted = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("listener {} cancelled", worker_id);
                break;
            }
            result = server.accept() => result,
        };

        match accepted {
            Ok(connection) => match core.promote(worker_id, connection, endpoint).await {
                Promotion::Promoted | Promotion::Stale => break,
                Promotion::Rejected => continue,
            },
            Err(e) => {
                error!("accept() failed: {}", e);
                break;
            }
        }
    }

    server.close().await;
    info!("END listener, socket type {}", endpoint.security);
}

// ----------------------------------------------------------------------------
// Connector
// ----------------------------------------------------------------------------

/// Open one outbound connection and hand it to the session
pub(crate) async fn run_connector(
    core: Arc<SessionCore>,
    worker_id: u64,
    peer: PeerAddress,
    endpoint: Endpoint,
    cancel: CancellationToken,
) {
    info!("BEGIN connector, socket type {}", endpoint.security);

    let connected = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("connector {} cancelled", worker_id);
            return;
        }
        result = core.transport().connect_to(peer, endpoint.service, endpoint.security) => result,
    };

    match connected {
        Ok(connection) => {
            core.promote(worker_id, connection, endpoint).await;
        }
        Err(e) => {
            error!("connect() to {} failed: {}", peer, e);
            core.connection_failed(worker_id, endpoint).await;
        }
    }
}

// ----------------------------------------------------------------------------
// Data Pump
// ----------------------------------------------------------------------------

enum PumpExit {
    Cancelled,
    Closed,
    Failed(FrameError),
}

/// Read frames from the peer until the connection ends or the worker is cancelled
pub(crate) async fn run_data_pump(
    core: Arc<SessionCore>,
    worker_id: u64,
    peer: PeerAddress,
    mut reader: BoxedReader,
    writer: SharedWriter,
    endpoint: Endpoint,
    cancel: CancellationToken,
) {
    info!("BEGIN data pump for {}", peer);

    let exit = loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break PumpExit::Cancelled,
            result = core.codec().read_frame(&mut reader) => result,
        };

        match frame {
            Ok(Some(body)) => core.emit(SessionEvent::MessageRead(body)),
            Ok(None) => break PumpExit::Closed,
            Err(e) => break PumpExit::Failed(e),
        }
    };

    // Abandon any write still in flight so the writer lock comes free.
    cancel.cancel();
    drop(reader);
    if let Err(e) = writer.lock().await.shutdown().await {
        debug!("close() of connected socket failed: {}", e);
    }

    match exit {
        PumpExit::Cancelled => {
            debug!("data pump {} cancelled", worker_id);
        }
        PumpExit::Closed => {
            info!("{} closed the connection", peer);
            core.connection_lost(worker_id, endpoint).await;
        }
        PumpExit::Failed(e) => {
            error!("disconnected from {}: {}", peer, e);
            core.connection_lost(worker_id, endpoint).await;
        }
    }
    info!("END data pump for {}", peer);
}
