//! BlueChat Core
//!
//! This crate provides the foundational pieces of the BlueChat Bluetooth session
//! engine: the shared identifier types, the length-prefixed frame codec used on the
//! stream socket, the chunked fragment codec used on the advertisement channel, and
//! the collaborator traits through which the engine reaches the platform radio.
//!
//! The session manager lives in `bluechat-session` and the broadcast subsystem in
//! `bluechat-ble`; both depend only on what is exported here.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod broadcast;
pub mod config;
pub mod discovery;
pub mod errors;
pub mod fragment;
pub mod frame;
pub mod transport;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use broadcast::{BroadcastProvider, ScanFeedEvent, ScanProvider};
pub use config::{BroadcastConfig, SessionConfig, DEFAULT_BROADCAST_SERVICE};
pub use discovery::{DeviceInfo, DiscoveryFeedEvent, DiscoveryProvider, DISCOVERABLE_DURATION};
pub use errors::{
    BluechatError, BroadcastError, ConfigError, FragmentError, FrameError, Result,
    TransportError,
};
pub use fragment::{
    split, Fragment, FragmentAssembler, FragmentHeader, Observation, ReassembledPayload,
    FRAGMENT_HEADER_LEN, MAX_CHUNKS,
};
pub use frame::FrameCodec;
pub use transport::{BoxedReader, BoxedWriter, Connection, ServerSocket, TransportProvider};
pub use types::{GenerationHash, PeerAddress, SecurityMode, ServiceId, SessionState};
