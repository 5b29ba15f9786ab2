//! Stream transport abstraction
//!
//! The session engine never touches the platform socket API directly. It reaches
//! the radio through [`TransportProvider`], which opens server sockets and
//! outbound connections, and [`ServerSocket`], which accepts inbound peers.
//! Both blocking operations are plain futures, so cancelling a worker drops the
//! pending accept or connect and releases the underlying handle.

use std::fmt;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::errors::TransportError;
use crate::types::{PeerAddress, SecurityMode, ServiceId};

/// Read half of a connected stream socket
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a connected stream socket
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

// ----------------------------------------------------------------------------
// Connection
// ----------------------------------------------------------------------------

/// A connected stream socket to one remote device
///
/// Reads and writes may proceed concurrently on the two halves.
pub struct Connection {
    peer: PeerAddress,
    reader: BoxedReader,
    writer: BoxedWriter,
}

impl Connection {
    pub fn new(peer: PeerAddress, reader: BoxedReader, writer: BoxedWriter) -> Self {
        Self {
            peer,
            reader,
            writer,
        }
    }

    /// Build a connection from any duplex byte stream
    pub fn from_stream<S>(peer: PeerAddress, stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(peer, Box::new(reader), Box::new(writer))
    }

    pub fn peer(&self) -> PeerAddress {
        self.peer
    }

    pub fn into_split(self) -> (PeerAddress, BoxedReader, BoxedWriter) {
        (self.peer, self.reader, self.writer)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("peer", &self.peer).finish()
    }
}

// ----------------------------------------------------------------------------
// Transport Traits
// ----------------------------------------------------------------------------

/// A listening server socket bound to one service
#[async_trait]
pub trait ServerSocket: Send {
    /// Wait for the next inbound connection
    async fn accept(&mut self) -> Result<Connection, TransportError>;

    /// Release the listening handle
    async fn close(&mut self);
}

/// Opens server sockets and outbound connections on the platform radio
#[async_trait]
pub trait TransportProvider: Send + Sync + 'static {
    /// Bind a server socket for `service`
    async fn listen(
        &self,
        service: ServiceId,
        security: SecurityMode,
    ) -> Result<Box<dyn ServerSocket>, TransportError>;

    /// Open an outbound connection to `peer` on `service`
    async fn connect_to(
        &self,
        peer: PeerAddress,
        service: ServiceId,
        security: SecurityMode,
    ) -> Result<Connection, TransportError>;
}
