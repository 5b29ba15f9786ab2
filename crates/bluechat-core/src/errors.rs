//! Error types for the BlueChat engine
//!
//! This module contains the error types used across the engine: transport errors
//! raised by the socket collaborators, framing and fragmentation errors raised by
//! the codecs, broadcast errors raised by the radio collaborators, configuration
//! errors, and the `BluechatError` type that unifies them all.

use std::io;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Errors raised by the stream transport collaborators
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Listen failed on service {service}: {reason}")]
    ListenFailed { service: String, reason: String },
    #[error("Accept failed: {reason}")]
    AcceptFailed { reason: String },
    #[error("Connection failed to peer {peer}: {reason}")]
    ConnectionFailed { peer: String, reason: String },
    #[error("Network I/O error: {0}")]
    NetworkIo(#[from] io::Error),
    #[error("Connection closed by peer")]
    Closed,
    #[error("Transport is not available: {reason}")]
    Unavailable { reason: String },
}

/// Errors raised while encoding or decoding length-prefixed frames
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Invalid header length: {0} (must be 1..=8)")]
    InvalidHeaderLength(usize),
    #[error("Frame body too large for a {header_length}-byte header: {size} bytes")]
    BodyTooLarge { size: usize, header_length: usize },
    #[error("Frame length {0} exceeds addressable memory")]
    LengthOverflow(u64),
    #[error("Stream ended after {read} of {expected} bytes")]
    Truncated { read: usize, expected: usize },
    #[error("Frame I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised by the fragment codec
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FragmentError {
    #[error("Cannot fragment an empty payload")]
    EmptyPayload,
    #[error("Chunk size must be greater than zero")]
    ZeroChunkSize,
    #[error("Payload needs {needed} chunks (max: {max})")]
    TooManyChunks { needed: usize, max: usize },
    #[error("Fragment too short: {len} bytes (header is {header} bytes)")]
    Truncated { len: usize, header: usize },
    #[error("Fragment declares zero total chunks")]
    ZeroTotal,
    #[error("Fragment index {index} out of range for {total} chunks")]
    IndexOutOfRange { index: u8, total: u8 },
}

/// Errors raised by the broadcast radio collaborators
#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("Advertising failed to start: {0}")]
    AdvertiseFailed(String),
    #[error("Platform refused to advertise (code {code})")]
    AdvertiseRejected { code: i32 },
    #[error("Scan failed: {0}")]
    ScanFailed(String),
    #[error("Broadcast radio unavailable: {0}")]
    Unavailable(String),
    #[error("Fragmentation error: {0}")]
    Fragment(#[from] FragmentError),
}

/// Errors raised while loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Validation(String),
    #[error("Configuration file error: {0}")]
    FileSystem(String),
    #[error("Configuration parse error: {0}")]
    Parse(String),
}

// ----------------------------------------------------------------------------
// Unified Error
// ----------------------------------------------------------------------------

/// Core error type for the BlueChat engine
#[derive(Debug, thiserror::Error)]
pub enum BluechatError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Fragment error: {0}")]
    Fragment(#[from] FragmentError),

    #[error("Broadcast error: {0}")]
    Broadcast(#[from] BroadcastError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid peer address: {0}")]
    InvalidAddress(String),
}

impl BluechatError {
    /// Create an invalid address error
    pub fn invalid_address(msg: impl Into<String>) -> Self {
        Self::InvalidAddress(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, BluechatError>;
