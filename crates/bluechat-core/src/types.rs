//! Core types for the BlueChat engine
//!
//! This module defines the identifiers and small enums shared by the session
//! manager and the broadcast subsystem, using newtype patterns for type safety.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::BluechatError;

// ----------------------------------------------------------------------------
// Service Identifier
// ----------------------------------------------------------------------------

/// Identifier of the logical service a socket or advertisement negotiates
///
/// Always passed explicitly; there is no process-wide default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceId(Uuid);

impl ServiceId {
    pub const fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for ServiceId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ServiceId {
    type Err = BluechatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| BluechatError::invalid_address(format!("invalid service id {s}: {e}")))
    }
}

// ----------------------------------------------------------------------------
// Peer Address
// ----------------------------------------------------------------------------

/// Hardware address of a remote Bluetooth device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerAddress([u8; 6]);

impl PeerAddress {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let octets: Vec<String> = self.0.iter().map(|b| format!("{b:02X}")).collect();
        write!(f, "{}", octets.join(":"))
    }
}

impl FromStr for PeerAddress {
    type Err = BluechatError;

    /// Accepts `AA:BB:CC:DD:EE:FF`, `AA-BB-CC-DD-EE-FF` or bare hex
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let clean: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
        let bytes = hex::decode(&clean)
            .map_err(|_| BluechatError::invalid_address(format!("invalid hex in address {s}")))?;
        let octets: [u8; 6] = bytes.as_slice().try_into().map_err(|_| {
            BluechatError::invalid_address(format!("address {s} must be exactly 6 bytes"))
        })?;
        Ok(Self(octets))
    }
}

// ----------------------------------------------------------------------------
// Security Mode
// ----------------------------------------------------------------------------

/// Socket security variant, chosen by the caller per listen/connect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    Secure,
    #[default]
    Insecure,
}

impl SecurityMode {
    pub fn is_secure(&self) -> bool {
        matches!(self, Self::Secure)
    }
}

impl From<bool> for SecurityMode {
    fn from(secure: bool) -> Self {
        if secure {
            Self::Secure
        } else {
            Self::Insecure
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Secure => write!(f, "Secure"),
            Self::Insecure => write!(f, "Insecure"),
        }
    }
}

// ----------------------------------------------------------------------------
// Session State
// ----------------------------------------------------------------------------

/// Lifecycle state of the single managed stream session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SessionState {
    /// Doing nothing
    #[default]
    None,
    /// Waiting for an inbound connection
    Listening,
    /// Initiating an outbound connection
    Connecting,
    /// Connected to a remote device with a live data pump
    Connected,
}

impl SessionState {
    /// Whether an accepted socket may be promoted to a session in this state
    pub fn accepts_inbound(&self) -> bool {
        matches!(self, Self::Listening | Self::Connecting)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "NONE",
            Self::Listening => "LISTENING",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
        };
        f.write_str(name)
    }
}

// ----------------------------------------------------------------------------
// Generation Hash
// ----------------------------------------------------------------------------

/// 4-byte fingerprint identifying which logical payload a fragment belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct GenerationHash([u8; 4]);

impl GenerationHash {
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Derive the generation hash of a payload (CRC32, big-endian)
    pub fn of(payload: &[u8]) -> Self {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(payload);
        Self(hasher.finalize().to_be_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    pub fn as_u32(&self) -> u32 {
        u32::from_be_bytes(self.0)
    }
}

impl From<u32> for GenerationHash {
    fn from(value: u32) -> Self {
        Self(value.to_be_bytes())
    }
}

impl fmt::Display for GenerationHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}
