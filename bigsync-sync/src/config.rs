use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use bigsync_rest::{ClientOptions, TransportOptions, Version, VersionGate, MAX_CHUNK_SIZE};

use crate::errors::{Result, SyncError};
use crate::retry::DeleteRetry;

/// Tunables of the sync engine, stored as `~/.bigsync/config.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Largest byte range sent in one upload request
    pub max_chunk_size: u64,
    /// How long an upload waits for the upload slot
    pub upload_slot_timeout_secs: u64,
    pub probe_timeout_ms: u64,
    pub request_timeout_secs: u64,
    /// Pause after every successful request
    pub pacing_ms: u64,
    pub delete_retry_attempts: u32,
    pub delete_retry_interval_secs: u64,
    pub minimum_version: String,
    pub maximum_version: String,
    /// Oldest device version exposing iAppsLX endpoints
    pub iapps_minimum_version: String,
    pub accept_invalid_certs: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: MAX_CHUNK_SIZE,
            upload_slot_timeout_secs: 15,
            probe_timeout_ms: 5_000,
            request_timeout_secs: 60,
            pacing_ms: 1_000,
            delete_retry_attempts: 12,
            delete_retry_interval_secs: 5,
            minimum_version: "12.1.0".to_string(),
            maximum_version: "14.99.99".to_string(),
            iapps_minimum_version: "13.0.0".to_string(),
            accept_invalid_certs: true,
        }
    }
}

impl SyncConfig {
    /// Load from `path`
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SyncConfig = toml::from_str(&content)?;
        config.version_gate()?;
        Ok(config)
    }

    /// Load from the default location, falling back to defaults when there is no file
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path()?)
    }

    pub fn version_gate(&self) -> Result<VersionGate> {
        Ok(VersionGate::new(
            parse_version(&self.minimum_version)?,
            parse_version(&self.maximum_version)?,
        ))
    }

    pub fn iapps_minimum(&self) -> Result<Version> {
        parse_version(&self.iapps_minimum_version)
    }

    pub fn upload_slot_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_slot_timeout_secs)
    }

    pub fn delete_retry(&self) -> DeleteRetry {
        DeleteRetry::new(
            self.delete_retry_attempts,
            Duration::from_secs(self.delete_retry_interval_secs),
        )
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            pacing: Duration::from_millis(self.pacing_ms),
        }
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            accept_invalid_certs: self.accept_invalid_certs,
        }
    }
}

fn parse_version(raw: &str) -> Result<Version> {
    raw.parse()
        .map_err(|_| SyncError::Config(format!("invalid version bound: {}", raw)))
}

/// `~/.bigsync/config.toml`
pub fn config_path() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| SyncError::Config("home directory not found".to_string()))?;
    Ok(home.join(".bigsync").join("config.toml"))
}

/// Default workspace root, `~/.bigsync/workspace`
pub fn default_workspace_path() -> Result<PathBuf> {
    Ok(config_path()?
        .parent()
        .map(|p| p.join("workspace"))
        .unwrap_or_else(|| PathBuf::from("workspace")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_device_limits() {
        let config = SyncConfig::default();
        let gate = config.version_gate().unwrap();
        assert_eq!(gate.minimum, Version::new(12, 1, 0));
        assert_eq!(gate.maximum, Version::new(14, 99, 99));
        assert_eq!(config.iapps_minimum().unwrap(), Version::new(13, 0, 0));
        assert_eq!(config.max_chunk_size, 1_048_576);
        assert_eq!(config.upload_slot_timeout(), Duration::from_secs(15));
        assert_eq!(config.delete_retry().attempts, 12);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "pacing_ms = 0\nmax_chunk_size = 4096\n").unwrap();

        let config = SyncConfig::load_from(&path).unwrap();
        assert_eq!(config.pacing_ms, 0);
        assert_eq!(config.max_chunk_size, 4096);
        assert_eq!(config.delete_retry_attempts, 12);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = SyncConfig {
            accept_invalid_certs: false,
            ..SyncConfig::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(SyncConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_bad_version_bound_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "minimum_version = \"twelve\"\n").unwrap();
        assert!(matches!(SyncConfig::load_from(&path), Err(SyncError::Config(_))));
    }
}
