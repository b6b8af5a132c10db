//! File configuration for the demo: one JSON object with a section per
//! component. Every section and field is optional.

use std::path::Path;

use couchlink_controller::JoinConfig;
use couchlink_host::HostConfig;
use couchlink_translate::TranslatorConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub host: HostConfig,
    pub join: JoinConfig,
    pub translator: TranslatorConfig,
}

impl RelayConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.max_players == 0 {
            return Err(ConfigError::Invalid("host.max_players must be at least 1".into()));
        }
        if self.host.code_length == 0 {
            return Err(ConfigError::Invalid("host.code_length must be at least 1".into()));
        }
        if self.host.id_prefix != self.join.id_prefix {
            return Err(ConfigError::Invalid(format!(
                "join.id_prefix {:?} does not match host.id_prefix {:?}",
                self.join.id_prefix, self.host.id_prefix
            )));
        }
        if self.translator.grid_columns == 0 {
            return Err(ConfigError::Invalid("translator.grid_columns must be at least 1".into()));
        }
        Ok(())
    }
}
