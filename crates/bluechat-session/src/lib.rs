//! BlueChat Session
//!
//! Manages exactly one stream session with a remote device over an abstract
//! [`TransportProvider`](bluechat_core::TransportProvider). The session listens,
//! connects, pumps length-prefixed frames in both directions, and falls back to
//! listening with the same service and security mode whenever a connection fails
//! or drops. Progress is reported as [`SessionEvent`]s on a single channel.

pub mod discovery;
pub mod events;
pub mod manager;
mod workers;

pub use discovery::{DeviceDiscovery, DiscoveryEvent};
pub use events::{
    spawn_dispatcher, EventReceiver, EventSender, NotificationSink, SessionEvent,
    CONNECTION_LOST_MESSAGE, CONNECT_FAILED_MESSAGE, WRITE_FAILED_MESSAGE,
};
pub use manager::{Endpoint, SessionManager};
