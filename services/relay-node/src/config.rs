use lifeline_core::{CoreError, RelayConfig};
use std::env;
use std::path::PathBuf;

const DEFAULT_PORT: u16 = 8095;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub port: u16,
    pub config_path: Option<PathBuf>,
    pub seed_path: Option<PathBuf>,
    pub log_json: bool,
}

impl NodeConfig {
    pub fn from_env() -> lifeline_core::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> lifeline_core::Result<Self> {
        let port = match lookup("PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| CoreError::Generic(format!("PORT is not a valid port: {}", raw)))?,
            None => DEFAULT_PORT,
        };

        Ok(NodeConfig {
            port,
            config_path: lookup("LIFELINE_CONFIG").map(PathBuf::from),
            seed_path: lookup("LIFELINE_SEED").map(PathBuf::from),
            log_json: lookup("LIFELINE_LOG_JSON")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        })
    }

    /// Relay settings from `LIFELINE_CONFIG`, or defaults when unset
    pub fn relay_config(&self) -> lifeline_core::Result<RelayConfig> {
        match &self.config_path {
            Some(path) => Ok(RelayConfig::from_file(path)?),
            None => Ok(RelayConfig::default()),
        }
    }
}
