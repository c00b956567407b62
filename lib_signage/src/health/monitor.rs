//! # Health Monitor
//!
//! A fixed-interval watchdog for the display process. Each tick samples memory;
//! over the threshold it sends a GC hint, waits for the surface to settle and
//! samples again. Still over means a restart: fire-and-forget, no draining of
//! rotation or config state.
//!
//! The monitor shares nothing with the control task except the GC hint and the
//! `Restarter`, and never waits on either.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::memory_guard::{MemoryGuard, DEFAULT_THRESHOLD_BYTES, MIB};
use super::probe::MemoryProbe;

/// Performs the hard restart of the display surface.
pub trait Restarter: Send + Sync {
    fn restart_display(&self, reason: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    Healthy { used: u64 },
    /// Over the threshold until the GC hint brought it back under.
    Reclaimed { before: u64, after: u64 },
    /// Still over after the GC hint; a restart was requested.
    RestartRequired { before: u64, after: u64 },
    /// The probe could not measure. No action taken.
    Unknown,
}

#[derive(Debug, Clone)]
pub struct HealthSettings {
    pub interval: Duration,
    pub settle: Duration,
    pub threshold_bytes: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            settle: Duration::from_secs(2),
            threshold_bytes: DEFAULT_THRESHOLD_BYTES,
        }
    }
}

pub struct HealthMonitor {
    probe: Arc<dyn MemoryProbe>,
    restarter: Arc<dyn Restarter>,
    guard: MemoryGuard,
    settings: HealthSettings,
}

impl HealthMonitor {
    pub fn new(
        probe: Arc<dyn MemoryProbe>,
        restarter: Arc<dyn Restarter>,
        settings: HealthSettings,
    ) -> Self {
        Self {
            probe,
            restarter,
            guard: MemoryGuard::new(settings.threshold_bytes),
            settings,
        }
    }

    pub fn guard(&self) -> &MemoryGuard {
        &self.guard
    }

    /// One watchdog tick.
    pub async fn check_once(&self) -> HealthVerdict {
        let Some(before) = self.probe.used_bytes() else {
            tracing::warn!("Memory probe unavailable, skipping health check");
            return HealthVerdict::Unknown;
        };
        if !self.guard.record(before) {
            tracing::debug!(used_mb = before / MIB, "Memory within threshold");
            return HealthVerdict::Healthy { used: before };
        }

        tracing::warn!(
            used_mb = before / MIB,
            threshold_mb = self.guard.threshold() / MIB,
            "Memory over threshold, requesting GC"
        );
        self.probe.request_gc();
        tokio::time::sleep(self.settings.settle).await;

        let Some(after) = self.probe.used_bytes() else {
            tracing::warn!("Memory probe unavailable after GC hint");
            return HealthVerdict::Unknown;
        };
        if !self.guard.record(after) {
            tracing::info!(before_mb = before / MIB, after_mb = after / MIB, "GC hint reclaimed memory");
            return HealthVerdict::Reclaimed { before, after };
        }

        tracing::error!(
            before_mb = before / MIB,
            after_mb = after / MIB,
            "Memory still over threshold, restarting display"
        );
        self.restarter
            .restart_display(&format!("memory {} MB over threshold", after / MIB));
        HealthVerdict::RestartRequired { before, after }
    }

    /// Ticks every `interval` until cancelled or a restart has been requested.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.settings.interval.as_secs(),
            threshold_mb = self.guard.threshold() / MIB,
            "Health monitor started"
        );
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.interval) => {}
            }
            let verdict = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                v = self.check_once() => v,
            };
            if matches!(verdict, HealthVerdict::RestartRequired { .. }) {
                break;
            }
        }
        tracing::info!("Health monitor stopped");
    }
}
