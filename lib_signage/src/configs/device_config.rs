//! # Device Configuration Model
//!
//! A `DeviceConfig` is produced by the synchronizer on each successful fetch and
//! then handed around as an `Arc` snapshot. It is never mutated in place: a newer
//! fetch replaces it wholesale.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Display time used when a page is created without an explicit duration.
pub const DEFAULT_DISPLAY_SECS: u64 = 300;

/// Refresh interval used when the store does not provide a usable one.
pub const DEFAULT_REFRESH_MINUTES: u32 = 60;

/// Screen orientation of the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    /// Wide screen, the factory default.
    #[default]
    Landscape,
    /// Tall screen.
    Portrait,
}

impl FromStr for Orientation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "landscape" => Ok(Orientation::Landscape),
            "portrait" => Ok(Orientation::Portrait),
            other => Err(format!("unknown orientation: {other}")),
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Orientation::Landscape => f.write_str("landscape"),
            Orientation::Portrait => f.write_str("portrait"),
        }
    }
}

/// Stable, non-empty device identity. Doubles as the name of the device's tab
/// in the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Returns `None` when the candidate is empty after trimming.
    pub fn new(candidate: impl AsRef<str>) -> Option<Self> {
        let trimmed = candidate.as_ref().trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// For keys that are non-empty by construction, e.g. derived hashes.
    pub(crate) fn from_key(key: String) -> Self {
        debug_assert!(!key.trim().is_empty());
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison against a tab name from the store.
    pub fn matches_tab(&self, tab: &str) -> bool {
        tab.trim().to_lowercase() == self.0.to_lowercase()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One page of the rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageEntry {
    pub url: String,
    /// A value of 0 pins the rotation on this page.
    pub display_time_seconds: u64,
}

impl PageEntry {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_display_time(url, DEFAULT_DISPLAY_SECS)
    }

    pub fn with_display_time(url: impl Into<String>, display_time_seconds: u64) -> Self {
        Self {
            url: url.into(),
            display_time_seconds,
        }
    }

    /// How long the page stays up, or `None` if rotation must not advance past it.
    pub fn display_time(&self) -> Option<Duration> {
        (self.display_time_seconds > 0).then(|| Duration::from_secs(self.display_time_seconds))
    }
}

/// The full configuration for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    pub device_id: DeviceId,
    pub orientation: Orientation,
    pub refresh_interval_minutes: u32,
    pub clear_cache: bool,
    pub pages: Vec<PageEntry>,
}

impl DeviceConfig {
    /// A config with no pages must never reach the rotation engine.
    pub fn is_playable(&self) -> bool {
        !self.pages.is_empty()
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.refresh_interval_minutes.max(1)) * 60)
    }
}
