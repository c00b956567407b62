//! Messages consumed by the control task. Every timer, surface callback and
//! external request is funnelled into one `ControlEvent` stream so that state
//! transitions happen strictly one at a time.

use tokio::sync::mpsc;

use super::surface::{RenderError, SurfaceEvent};
use super::timer::TimerId;

/// Timer firings owned by the display state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineEvent {
    RotationTick(TimerId),
    RetryTick(TimerId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    Timer(MachineEvent),
    Surface(SurfaceEvent),
    /// Operator pressed "retry".
    ManualRetry,
    /// Fetch the configuration now instead of waiting for the refresh timer.
    RefreshNow,
    RefreshTick(TimerId),
    /// Ask the surface to drop caches; posted by the memory watchdog.
    TrimMemory,
    Shutdown,
}

/// The surface's way back into the control task.
#[derive(Debug, Clone)]
pub struct SurfaceReporter {
    tx: mpsc::UnboundedSender<ControlEvent>,
}

impl SurfaceReporter {
    pub(crate) fn new(tx: mpsc::UnboundedSender<ControlEvent>) -> Self {
        Self { tx }
    }

    pub fn succeeded(&self, url: impl Into<String>) {
        self.post(SurfaceEvent::LoadSucceeded { url: url.into() });
    }

    pub fn failed(&self, url: impl Into<String>, error: impl Into<String>) {
        self.post(SurfaceEvent::LoadFailed {
            url: url.into(),
            error: RenderError(error.into()),
        });
    }

    fn post(&self, event: SurfaceEvent) {
        if self.tx.send(ControlEvent::Surface(event)).is_err() {
            tracing::debug!("Control task gone, dropping surface event");
        }
    }
}
