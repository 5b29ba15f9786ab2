//! BlueChat CLI configuration
//!
//! Configuration is read from a TOML file. Every section is optional and falls
//! back to the engine defaults, so an empty file is a valid configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use bluechat_core::{BroadcastConfig, ConfigError, SecurityMode, ServiceId, SessionConfig};

/// Serial-port profile service, used by the chat demo when none is configured
pub const DEFAULT_CHAT_SERVICE: ServiceId =
    ServiceId::from_u128(0x0000_1101_0000_1000_8000_0080_5f9b_34fb);

// ----------------------------------------------------------------------------
// Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the BlueChat CLI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Service the chat session listens and connects on
    pub service_id: ServiceId,
    /// Use the secure socket variant for the chat session
    pub secure: bool,
    /// Stream session settings
    pub session: SessionConfig,
    /// Advertisement broadcast settings
    pub broadcast: BroadcastConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_id: DEFAULT_CHAT_SERVICE,
            secure: false,
            session: SessionConfig::default(),
            broadcast: BroadcastConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::FileSystem(format!("Failed to read {}: {}", path.display(), e))
        })?;
        debug!("Read {} bytes of configuration from {}", text.len(), path.display());
        Self::from_toml_str(&text)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: AppConfig =
            toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration to a TOML file, creating parent directories
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ConfigError::FileSystem(format!("Failed to create config directory: {}", e))
            })?;
        }
        let text = self.to_toml()?;
        std::fs::write(path.as_ref(), text)
            .map_err(|e| ConfigError::FileSystem(format!("Failed to write config file: {}", e)))
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Parse(format!("Failed to serialize config: {}", e)))
    }

    /// Validate every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.session.validate()?;
        self.broadcast.validate()?;
        if self.broadcast.service_id == self.service_id {
            return Err(ConfigError::Validation(
                "broadcast and chat services must differ".to_string(),
            ));
        }
        Ok(())
    }

    pub fn security(&self) -> SecurityMode {
        SecurityMode::from(self.secure)
    }

    /// Example configuration file content
    pub fn example_config() -> String {
        let example = AppConfig {
            secure: true,
            ..Default::default()
        };
        example
            .to_toml()
            .unwrap_or_else(|_| "# Failed to generate example config".to_string())
    }
}
