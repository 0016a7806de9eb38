//! Configuration for tannoy nodes.
//!
//! Supports YAML file and environment variable overrides.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::channel::{MemorySubstrate, Substrate};

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "TANNOY_CONFIG";

/// Environment variable controlling the log filter.
pub const LOG_ENV_VAR: &str = "TANNOY_LOG";

/// Node configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Substrate transport selection.
    pub substrate: SubstrateConfig,
    /// Default conversation timeouts.
    pub timeout: TimeoutConfig,
    /// Hostname override; defaults to environment detection.
    pub host: Option<String>,
}

/// Substrate type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubstrateType {
    /// In-memory (single process only).
    #[default]
    Memory,
    /// NATS Core.
    Nats,
}

/// Substrate configuration (discriminated union).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SubstrateConfig {
    /// Substrate type discriminator.
    #[serde(rename = "type")]
    pub substrate_type: SubstrateType,
    /// NATS-specific configuration.
    pub nats: NatsSettings,
}

/// NATS connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsSettings {
    /// NATS server URL.
    pub url: String,
}

impl Default for NatsSettings {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
        }
    }
}

/// Conversation timeouts, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Max wait before the first inbound frame.
    pub connect: u64,
    /// Max wait between consecutive inbound frames.
    pub idle: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: 5000,
            idle: 5000,
        }
    }
}

impl TimeoutConfig {
    pub fn connect_duration(&self) -> Duration {
        Duration::from_millis(self.connect)
    }

    pub fn idle_duration(&self) -> Duration {
        Duration::from_millis(self.idle)
    }
}

impl BroadcastConfig {
    /// Load configuration from file and environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Config file
    /// 3. Defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var(CONFIG_ENV_VAR).unwrap_or_else(|_| "tannoy.yaml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            Self::from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_string(), e.to_string()))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var(crate::identity::HOST_ENV_VAR) {
            self.host = Some(host);
        }

        if let Ok(url) = std::env::var("TANNOY_NATS_URL") {
            self.substrate.nats.url = url;
        }

        if let Ok(ms) = std::env::var("TANNOY_TIMEOUT_CONNECT") {
            if let Ok(ms) = ms.parse() {
                self.timeout.connect = ms;
            }
        }

        if let Ok(ms) = std::env::var("TANNOY_TIMEOUT_IDLE") {
            if let Ok(ms) = ms.parse() {
                self.timeout.idle = ms;
            }
        }
    }
}

/// Errors from configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    FileRead(String, String),

    #[error("Failed to parse config: {0}")]
    Parse(String),
}

/// Initialize a substrate based on configuration.
///
/// NATS requires the `nats` feature:
/// - Memory: always available (in-memory, no external deps)
/// - Nats: `--features nats`
pub async fn init_substrate(
    config: &BroadcastConfig,
) -> Result<Arc<dyn Substrate>, Box<dyn std::error::Error + Send + Sync>> {
    match config.substrate.substrate_type {
        SubstrateType::Memory => {
            info!(substrate = "memory", "Substrate initialized");
            Ok(Arc::new(MemorySubstrate::new()))
        }
        SubstrateType::Nats => {
            #[cfg(feature = "nats")]
            {
                let substrate = crate::channel::NatsSubstrate::connect(
                    crate::channel::NatsConfig {
                        url: config.substrate.nats.url.clone(),
                    },
                )
                .await?;
                info!(substrate = "nats", "Substrate initialized");
                Ok(Arc::new(substrate))
            }

            #[cfg(not(feature = "nats"))]
            {
                Err("NATS support requires the 'nats' feature. Rebuild with --features nats".into())
            }
        }
    }
}
