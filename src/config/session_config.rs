use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::core::bluetooth::constants::{
    COMMAND_TIMEOUT_MS, CONNECT_TIMEOUT_MS, DISCOVERY_TIMEOUT_MS, READ_TIMEOUT_MS,
    WRITE_TIMEOUT_MS,
};
use crate::utils::ensure_directory_exists;

pub const CONFIG_FILE_NAME: &str = "session_config.json";

/// Timeouts applied by a device session, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Time allowed for the link to come up.
    pub connect_timeout_ms: u64,

    /// Time allowed for service and characteristic discovery.
    /// When it runs out the link is dropped.
    pub discovery_timeout_ms: u64,

    pub read_timeout_ms: u64,

    /// Also bounds subscribing and unsubscribing, which are descriptor writes.
    pub write_timeout_ms: u64,

    /// Time allowed between a command write and its response notification.
    pub command_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            connect_timeout_ms: CONNECT_TIMEOUT_MS,
            discovery_timeout_ms: DISCOVERY_TIMEOUT_MS,
            read_timeout_ms: READ_TIMEOUT_MS,
            write_timeout_ms: WRITE_TIMEOUT_MS,
            command_timeout_ms: COMMAND_TIMEOUT_MS,
        }
    }
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Loads the config from a configuration file.
    pub async fn load(file_path: &Path) -> Result<Self> {
        if !file_path.exists() {
            warn!("Config file not found at {:?}, using default.", file_path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(file_path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!("Config loaded from {:?}", file_path);
        Ok(config)
    }

    /// Saves the current config to a configuration file.
    pub async fn save(&self, file_path: &Path) -> Result<()> {
        if let Some(config_dir) = file_path.parent() {
            ensure_directory_exists(config_dir).await?;
        }

        let config_json = match serde_json::to_string_pretty(&self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize session config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(file_path, config_json).await?;

        info!("Session config saved to {:?}.", file_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("switchbot-session-{}-{}", name, std::process::id()))
    }

    #[test]
    fn defaults_match_the_protocol_timeouts() {
        let config = SessionConfig::default();
        assert_eq!(config.discovery_timeout(), Duration::from_millis(5000));
        assert_eq!(config.read_timeout(), Duration::from_millis(3000));
        assert_eq!(config.write_timeout(), Duration::from_millis(3000));
        assert_eq!(config.command_timeout(), Duration::from_millis(3000));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: SessionConfig = serde_json::from_str(r#"{"command_timeout_ms": 8000}"#).unwrap();
        assert_eq!(config.command_timeout_ms, 8000);
        assert_eq!(config.discovery_timeout_ms, DISCOVERY_TIMEOUT_MS);
    }

    #[tokio::test]
    async fn missing_file_loads_defaults() {
        let path = scratch_dir("missing").join(CONFIG_FILE_NAME);
        let config = SessionConfig::load(&path).await.unwrap();
        assert_eq!(config, SessionConfig::default());
    }

    #[tokio::test]
    async fn saved_config_is_loaded_back() {
        let dir = scratch_dir("saved");
        let path = dir.join("nested").join(CONFIG_FILE_NAME);
        let config = SessionConfig {
            read_timeout_ms: 1500,
            ..SessionConfig::default()
        };

        config.save(&path).await.unwrap();
        let loaded = SessionConfig::load(&path).await.unwrap();

        assert_eq!(loaded, config);
        let _ = std::fs::remove_dir_all(dir);
    }
}
