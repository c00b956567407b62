//! # Memory Guard
//!
//! Threshold accounting for the watchdog. The guard keeps the most recent memory
//! sample of the display process and answers one question: is it over the
//! threshold?
//!
//! ## Core Functionality:
//!
//! - **Atomic Sample**: the last sample lives in an `AtomicU64`, so the status
//!   API can read it while the watchdog task writes it without a mutex.
//!
//! - **Signal Only**: the guard never acts. `record` returns `true` on a
//!   breach and the `HealthMonitor` decides between a GC hint and a restart.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Bytes in one mebibyte, the unit of the configured threshold.
pub const MIB: u64 = 1024 * 1024;

/// Default threshold of 150 MB.
pub const DEFAULT_THRESHOLD_BYTES: u64 = 150 * MIB;

/// # Memory Guard
///
/// Shared between the watchdog (writer) and any observer (reader).
#[derive(Debug, Clone)]
pub struct MemoryGuard {
    /// Samples strictly above this many bytes are a breach.
    threshold: u64,
    /// The last recorded sample in bytes.
    last_sample: Arc<AtomicU64>,
}

impl MemoryGuard {
    /// Creates a guard with a threshold in bytes.
    ///
    /// # Example
    /// ```rust
    /// use lib_signage::health::memory_guard::{MemoryGuard, MIB};
    ///
    /// let guard = MemoryGuard::new(150 * MIB);
    /// assert!(!guard.record(100 * MIB));
    /// ```
    pub fn new(threshold_bytes: u64) -> Self {
        Self {
            threshold: threshold_bytes,
            last_sample: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Creates a guard from a threshold in megabytes.
    pub fn from_mb(threshold_mb: u64) -> Self {
        Self::new(threshold_mb.saturating_mul(MIB))
    }

    /// # Record a Sample
    ///
    /// Stores `bytes` as the latest sample.
    ///
    /// # Returns
    /// - `true` if the sample is over the threshold.
    /// - `false` otherwise.
    pub fn record(&self, bytes: u64) -> bool {
        self.last_sample.store(bytes, Ordering::Relaxed);
        self.is_over(bytes)
    }

    /// Whether `bytes` would be a breach, without recording it.
    pub fn is_over(&self, bytes: u64) -> bool {
        bytes > self.threshold
    }

    /// Returns the last recorded sample in bytes.
    pub fn current_usage(&self) -> u64 {
        self.last_sample.load(Ordering::Relaxed)
    }

    /// Returns the threshold in bytes.
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// The last sample as a percentage of the threshold. Over 100 means breached.
    pub fn usage_percent(&self) -> f64 {
        let current = self.current_usage() as f64;
        let total = self.threshold as f64;
        if total == 0.0 {
            0.0
        } else {
            (current / total) * 100.0
        }
    }
}

impl Default for MemoryGuard {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breach_is_strictly_above_threshold() {
        let guard = MemoryGuard::from_mb(150);
        assert!(!guard.record(150 * MIB));
        assert!(guard.record(150 * MIB + 1));
        assert_eq!(guard.current_usage(), 150 * MIB + 1);
    }

    #[test]
    fn usage_percent_tracks_last_sample() {
        let guard = MemoryGuard::new(200);
        guard.record(50);
        assert_eq!(guard.usage_percent(), 25.0);
        assert_eq!(MemoryGuard::new(0).usage_percent(), 0.0);
    }
}
