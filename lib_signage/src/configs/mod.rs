//! # Configuration Modules
//!
//! This module aggregates the device configuration model that the remote store
//! produces and the small settings file that pins a device's identity and
//! orientation.

/// The device configuration model: pages, refresh interval and cache policy.
pub mod device_config;

/// The persisted device settings (identity override and orientation).
pub mod settings;

pub use device_config::{
    DeviceConfig, DeviceId, Orientation, PageEntry, DEFAULT_DISPLAY_SECS, DEFAULT_REFRESH_MINUTES,
};
pub use settings::{DeviceSettings, JsonSettingsStore, SettingsError, SettingsStore};
