//! Session notifications
//!
//! Workers never call back into application code. Every notification is pushed
//! onto one unbounded channel in the order it was produced, and the caller decides
//! where to drain it: directly, or through [`spawn_dispatcher`] and a
//! [`NotificationSink`].

use bluechat_core::{PeerAddress, SessionState};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Error text delivered when an outbound connection attempt fails
pub const CONNECT_FAILED_MESSAGE: &str = "Unable to connect device";

/// Error text delivered when an established connection drops
pub const CONNECTION_LOST_MESSAGE: &str = "Device connection was lost";

/// Error text delivered when a write to the peer fails
pub const WRITE_FAILED_MESSAGE: &str = "Unable to write to device";

// ----------------------------------------------------------------------------
// Session Events
// ----------------------------------------------------------------------------

/// Notifications produced by the session manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session moved to a new state
    StateChanged(SessionState),
    /// A data pump started for this peer
    ConnectedTo(PeerAddress),
    /// A complete frame body arrived
    MessageRead(Bytes),
    /// A frame (header included) was written to the peer
    MessageWritten(Bytes),
    /// A recoverable failure, described for display
    Error(String),
}

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

// ----------------------------------------------------------------------------
// Notification Sink
// ----------------------------------------------------------------------------

/// Callback-style consumer of session events
///
/// Every method has an empty default so sinks only implement what they need.
pub trait NotificationSink: Send + 'static {
    /// Entry point used by the dispatcher; routes to the per-kind callbacks
    fn on_event(&mut self, event: SessionEvent) {
        event.dispatch(self);
    }

    fn state_changed(&mut self, _state: SessionState) {}

    fn connected_to(&mut self, _peer: PeerAddress) {}

    fn message_read(&mut self, _message: Bytes) {}

    fn message_written(&mut self, _frame: Bytes) {}

    fn error(&mut self, _message: String) {}
}

impl SessionEvent {
    /// Route this event to the matching sink callback
    pub fn dispatch<S: NotificationSink + ?Sized>(self, sink: &mut S) {
        match self {
            Self::StateChanged(state) => sink.state_changed(state),
            Self::ConnectedTo(peer) => sink.connected_to(peer),
            Self::MessageRead(message) => sink.message_read(message),
            Self::MessageWritten(frame) => sink.message_written(frame),
            Self::Error(message) => sink.error(message),
        }
    }
}

/// Drain `events` into `sink` on a single task, preserving order
pub fn spawn_dispatcher<S: NotificationSink>(mut events: EventReceiver, mut sink: S) -> JoinHandle<S> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            sink.on_event(event);
        }
        debug!("Session event channel closed, dispatcher exiting");
        sink
    })
}
