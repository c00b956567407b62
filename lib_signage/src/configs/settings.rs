//! # Device Settings
//!
//! The key-value settings a device keeps locally: an optional identity override
//! and the screen orientation. The engine reads them once at startup; only the
//! operator `configure` action writes them.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::device_config::Orientation;

/// Errors that can occur while reading or writing the settings file.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The file exists but could not be read or written.
    #[error("I/O error on settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file content is not valid settings JSON.
    #[error("Malformed settings file {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSettings {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub orientation: Orientation,
}

/// Storage for `DeviceSettings`.
pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<DeviceSettings, SettingsError>;
    fn save(&self, settings: &DeviceSettings) -> Result<(), SettingsError>;

    /// Loads the settings, degrading to defaults on any error.
    fn load_or_default(&self) -> DeviceSettings {
        match self.load() {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(error = %e, "Falling back to default device settings");
                DeviceSettings::default()
            }
        }
    }
}

/// Settings kept in a single JSON file.
#[derive(Debug, Clone)]
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load(&self) -> Result<DeviceSettings, SettingsError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(DeviceSettings::default()),
            Err(source) => {
                return Err(SettingsError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        serde_json::from_str(&raw).map_err(|source| SettingsError::Malformed {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, settings: &DeviceSettings) -> Result<(), SettingsError> {
        let io_err = |source: std::io::Error| SettingsError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let body = serde_json::to_string_pretty(settings).map_err(|source| SettingsError::Malformed {
            path: self.path.clone(),
            source,
        })?;
        fs::write(&self.path, body).map_err(io_err)
    }
}
