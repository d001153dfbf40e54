//! JSON file configuration adapter.
//!
//! Implements [`ConfigPort`] on top of a single JSON document. On a
//! controller board the same trait is backed by flash; the simulator and
//! bench rigs keep the file next to the binary.
//!
//! # Security
//!
//! - Config validation: every field is range-checked before persistence
//!   and again after loading, so a hand-edited file cannot disable a
//!   critical bound.
//! - Atomic writes: the document is written to a sibling temp file and
//!   renamed over the original.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::app::ports::{ConfigError, ConfigPort};
use crate::config::SystemConfig;

pub struct JsonFileConfig {
    path: PathBuf,
}

impl JsonFileConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }
}

fn validate(cfg: &SystemConfig) -> Result<(), ConfigError> {
    cfg.validate().map_err(ConfigError::ValidationFailed)
}

impl ConfigPort for JsonFileConfig {
    fn load(&self) -> Result<SystemConfig, ConfigError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("JsonFileConfig: {} not found, using defaults", self.path.display());
                return Ok(SystemConfig::default());
            }
            Err(e) => {
                warn!("JsonFileConfig: read {} failed: {e}", self.path.display());
                return Err(ConfigError::IoError);
            }
        };
        let cfg: SystemConfig = serde_json::from_str(&text).map_err(|e| {
            warn!("JsonFileConfig: {} is not a valid config: {e}", self.path.display());
            ConfigError::Corrupted
        })?;
        validate(&cfg)?;
        info!("JsonFileConfig: loaded {}", self.path.display());
        Ok(cfg)
    }

    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError> {
        validate(config)?;
        let json = serde_json::to_string_pretty(config).map_err(|_| ConfigError::Corrupted)?;
        let tmp = self.temp_path();
        fs::write(&tmp, json.as_bytes())
            .and_then(|()| fs::rename(&tmp, &self.path))
            .map_err(|e| {
                warn!("JsonFileConfig: write {} failed: {e}", self.path.display());
                ConfigError::IoError
            })?;
        info!("JsonFileConfig: saved {}", self.path.display());
        Ok(())
    }
}
