//! Configuration management for the Lifeline relay.
//!
//! Every field has a default matching the reference deployment, so a TOML
//! file only needs to name the values it overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    pub dedup: DedupConfig,
    pub delivery: DeliveryConfig,
    pub gateway: GatewayConfig,
    pub collections: CollectionConfig,
    pub matching: MatchingConfig,
    pub channels: ChannelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DedupConfig {
    pub suppression_window_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Upper bound on in-flight gateway calls per dispatch
    pub max_concurrent_sends: usize,
    pub accepted_token_prefixes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    pub endpoint: String,
    pub access_token: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CollectionConfig {
    pub responders: String,
    pub profiles: String,
    pub requests: String,
    /// Collections searched, in order, for a recipient's delivery token
    pub token_sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MatchingConfig {
    pub admin_role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChannelConfig {
    pub new_match: String,
    pub response: String,
    pub general: String,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            suppression_window_secs: 30,
            sweep_interval_secs: 10,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sends: 16,
            accepted_token_prefixes: vec![
                "ExponentPushToken[".to_string(),
                "ExpoPushToken[".to_string(),
            ],
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://exp.host/--/api/v2/push/send".to_string(),
            access_token: None,
            timeout_secs: 10,
        }
    }
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            responders: "donors".to_string(),
            profiles: "users".to_string(),
            requests: "bloodRequests".to_string(),
            token_sources: vec!["users".to_string(), "donors".to_string()],
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            admin_role: "admin".to_string(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            new_match: "blood-requests".to_string(),
            response: "donor-responses".to_string(),
            general: "default".to_string(),
        }
    }
}

impl DedupConfig {
    pub fn suppression_window(&self) -> Duration {
        Duration::from_secs(self.suppression_window_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl RelayConfig {
    /// Load and validate a TOML configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!(
            path = %path.display(),
            suppression_window_secs = config.dedup.suppression_window_secs,
            max_concurrent_sends = config.delivery.max_concurrent_sends,
            "Loaded relay configuration"
        );
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RelayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dedup.suppression_window_secs == 0 {
            return Err(ConfigError::ValidationError(
                "dedup.suppression_window_secs must be greater than zero".to_string(),
            ));
        }
        if self.dedup.sweep_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "dedup.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.delivery.max_concurrent_sends == 0 {
            return Err(ConfigError::ValidationError(
                "delivery.max_concurrent_sends must be greater than zero".to_string(),
            ));
        }
        if self.delivery.accepted_token_prefixes.is_empty() {
            return Err(ConfigError::ValidationError(
                "delivery.accepted_token_prefixes must not be empty".to_string(),
            ));
        }
        if self.gateway.endpoint.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "gateway.endpoint must not be empty".to_string(),
            ));
        }

        let collections = &self.collections;
        let names = [
            &collections.responders,
            &collections.profiles,
            &collections.requests,
        ];
        if names.iter().any(|name| name.trim().is_empty())
            || collections.token_sources.iter().any(|name| name.trim().is_empty())
        {
            return Err(ConfigError::ValidationError(
                "collection names must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
