//! Engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::fragment::MAX_CHUNKS;
use crate::frame::{FrameCodec, DEFAULT_HEADER_LENGTH, DEFAULT_READ_CHUNK};
use crate::types::ServiceId;

// ----------------------------------------------------------------------------
// Session Configuration
// ----------------------------------------------------------------------------

/// Configuration for the stream session manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Width of the frame length header in bytes, agreed with the peer out-of-band
    pub header_length: usize,
    /// Scratch buffer size for each read of a frame body
    pub read_chunk_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            header_length: DEFAULT_HEADER_LENGTH,
            read_chunk_size: DEFAULT_READ_CHUNK,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the frame header width
    pub fn with_header_length(mut self, header_length: usize) -> Self {
        self.header_length = header_length;
        self
    }

    /// Set the body read chunk size
    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=8).contains(&self.header_length) {
            return Err(ConfigError::Validation(format!(
                "header_length must be within 1..=8, got {}",
                self.header_length
            )));
        }
        if self.read_chunk_size == 0 {
            return Err(ConfigError::Validation(
                "read_chunk_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the frame codec described by this configuration
    pub fn frame_codec(&self) -> Result<FrameCodec, ConfigError> {
        self.validate()?;
        FrameCodec::new(self.header_length)
            .map(|codec| codec.with_read_chunk(self.read_chunk_size))
            .map_err(|e| ConfigError::Validation(e.to_string()))
    }
}

// ----------------------------------------------------------------------------
// Broadcast Configuration
// ----------------------------------------------------------------------------

/// Configuration for the advertisement fragmenter and reassembler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Service the advertisements are tagged with
    pub service_id: ServiceId,
    /// Default chunk body size when the caller does not pick one
    pub chunk_size: usize,
    /// How long each chunk stays on air, in milliseconds
    pub dwell_ms: u64,
}

/// Service id used by the demos and tests when none is configured
pub const DEFAULT_BROADCAST_SERVICE: ServiceId =
    ServiceId::from_u128(0x0000_b81d_0000_1000_8000_0080_5f9b_34fb);

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            service_id: DEFAULT_BROADCAST_SERVICE,
            chunk_size: 8,
            dwell_ms: 500,
        }
    }
}

impl BroadcastConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service_id(mut self, service_id: ServiceId) -> Self {
        self.service_id = service_id;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_dwell(mut self, dwell: Duration) -> Self {
        self.dwell_ms = dwell.as_millis() as u64;
        self
    }

    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Validation(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        if self.dwell_ms == 0 {
            return Err(ConfigError::Validation(
                "dwell_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Largest payload a single generation can carry with this chunk size
    pub fn max_payload_len(&self) -> usize {
        self.chunk_size.saturating_mul(MAX_CHUNKS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_defaults_validate() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frame_codec().unwrap().header_length(), 4);
    }

    #[test]
    fn test_session_config_rejects_bad_header() {
        assert!(SessionConfig::new().with_header_length(0).validate().is_err());
        assert!(SessionConfig::new().with_header_length(9).frame_codec().is_err());
        assert!(SessionConfig::new().with_read_chunk_size(0).validate().is_err());
    }

    #[test]
    fn test_broadcast_config_builder() {
        let config = BroadcastConfig::new()
            .with_chunk_size(16)
            .with_dwell(Duration::from_millis(50));
        assert_eq!(config.dwell(), Duration::from_millis(50));
        assert_eq!(config.max_payload_len(), 16 * 255);
        assert!(config.validate().is_ok());
        assert!(config.with_chunk_size(0).validate().is_err());
    }
}
