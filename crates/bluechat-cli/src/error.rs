//! Error handling for the BlueChat CLI

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("BlueChat error: {0}")]
    Bluechat(#[from] bluechat_core::BluechatError),

    #[error("Configuration error: {0}")]
    Config(#[from] bluechat_core::ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] bluechat_core::TransportError),

    #[error("Frame error: {0}")]
    Frame(#[from] bluechat_core::FrameError),

    #[error("Broadcast error: {0}")]
    Broadcast(#[from] bluechat_core::BroadcastError),

    #[error("Hex decoding error: {0}")]
    HexDecoding(#[from] hex::FromHexError),

    #[error("Demo did not finish: {0}")]
    Timeout(String),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
