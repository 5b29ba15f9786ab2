//! BlueChat Harness
//!
//! In-memory stand-ins for the platform radio: a loopback stream network, a
//! loopback advertisement medium, and a scripted discovery provider. Each one
//! supports fault injection so recovery paths can be driven deterministically
//! from tests and demos.

pub mod discovery;
pub mod radio;
pub mod transport;

pub use discovery::LoopbackDiscovery;
pub use radio::LoopbackRadio;
pub use transport::{LoopbackNetwork, LoopbackTransport};
