//! # Display State Machine
//!
//! Wraps the `RotationEngine` with two phases:
//!
//! - **Normal**: rotation runs; render successes keep it running and clear any
//!   pending retry.
//! - **Error**: rotation is stopped and one retry timer is armed with a fixed
//!   delay. When it fires (or the operator retries) the current page is rendered
//!   again. Success returns to Normal and resumes rotation; failure re-arms the
//!   same delay.
//!
//! A newly applied configuration always restarts rotation from page 0 and
//! supersedes the Error phase. A configuration without pages drives the machine
//! to Error without ever starting rotation.
//!
//! The machine never loads anything itself. Operations return the
//! `RenderRequest` the caller must hand to the surface, and the machine
//! remembers that URL so a late event for an older URL is ignored.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;

use super::events::{ControlEvent, MachineEvent};
use super::rotation::{RenderRequest, RotationEngine};
use super::surface::SurfaceEvent;
use super::timer::{TimerId, TimerSlot};
use crate::configs::DeviceConfig;

pub const NO_PAGES_MESSAGE: &str = "no pages configured";
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Normal,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationState {
    pub current_index: usize,
    pub phase: Phase,
    pub last_error_message: Option<String>,
}

/// What a retry attempt turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The current page must be loaded again.
    Rendering(RenderRequest),
    /// There is nothing to render yet; a configuration fetch is needed.
    NeedsConfig,
}

pub struct DisplayStateMachine {
    rotation: RotationEngine,
    retry: TimerSlot<ControlEvent>,
    retry_delay: Duration,
    phase: Phase,
    last_error: Option<String>,
    pending_url: Option<String>,
    config: Option<Arc<DeviceConfig>>,
}

impl DisplayStateMachine {
    pub fn new(events: mpsc::UnboundedSender<ControlEvent>, retry_delay: Duration) -> Self {
        Self {
            rotation: RotationEngine::new(events.clone()),
            retry: TimerSlot::new("retry", events),
            retry_delay,
            phase: Phase::Normal,
            last_error: None,
            pending_url: None,
            config: None,
        }
    }

    pub fn apply_config(&mut self, config: Arc<DeviceConfig>) -> Option<RenderRequest> {
        if !config.is_playable() {
            tracing::warn!(device_id = %config.device_id, "Configuration without pages not applied");
            self.enter_error(NO_PAGES_MESSAGE.to_string());
            return None;
        }

        self.retry.cancel();
        if self.phase == Phase::Error {
            tracing::info!("New configuration supersedes error state");
        }
        self.phase = Phase::Normal;
        self.last_error = None;
        self.config = Some(config.clone());
        let request = self.rotation.start(config);
        self.track(request)
    }

    /// A configuration fetch failed. Only matters when nothing was ever applied;
    /// otherwise the previous configuration keeps playing.
    pub fn on_fetch_failed(&mut self, message: &str) {
        if self.config.is_none() {
            self.enter_error(message.to_string());
        } else {
            tracing::debug!(error = message, "Keeping previous configuration after failed fetch");
        }
    }

    pub fn on_surface(&mut self, event: SurfaceEvent) {
        if self.pending_url.as_deref() != Some(event.url()) {
            tracing::debug!(url = event.url(), "Ignoring stale surface event");
            return;
        }
        self.pending_url = None;

        match event {
            SurfaceEvent::LoadSucceeded { url } => {
                self.retry.cancel();
                if self.phase == Phase::Error {
                    tracing::info!(url = %url, "Render recovered");
                    self.phase = Phase::Normal;
                    self.last_error = None;
                }
                if !self.rotation.is_running() {
                    self.rotation.resume();
                }
            }
            SurfaceEvent::LoadFailed { url, error } => {
                tracing::warn!(url = %url, error = %error, "Render failed");
                self.enter_error(error.0);
            }
        }
    }

    pub fn on_timer(&mut self, event: MachineEvent) -> Option<RetryOutcome> {
        match event {
            MachineEvent::RotationTick(id) => self.on_rotation_tick(id).map(RetryOutcome::Rendering),
            MachineEvent::RetryTick(id) => self.on_retry_tick(id),
        }
    }

    fn on_rotation_tick(&mut self, id: TimerId) -> Option<RenderRequest> {
        if self.phase != Phase::Normal {
            return None;
        }
        let request = self.rotation.on_tick(id);
        self.track(request)
    }

    fn on_retry_tick(&mut self, id: TimerId) -> Option<RetryOutcome> {
        if !self.retry.fire(id) {
            return None;
        }
        tracing::info!("Retry timer fired");
        Some(self.attempt())
    }

    /// Operator-initiated retry. Supersedes any pending retry timer.
    pub fn retry(&mut self) -> RetryOutcome {
        self.retry.cancel();
        self.attempt()
    }

    fn attempt(&mut self) -> RetryOutcome {
        match self.rotation.render_current() {
            Some(request) => {
                self.pending_url = Some(request.url.clone());
                RetryOutcome::Rendering(request)
            }
            None => {
                self.arm_retry();
                RetryOutcome::NeedsConfig
            }
        }
    }

    fn enter_error(&mut self, message: String) {
        self.rotation.stop();
        self.phase = Phase::Error;
        self.last_error = Some(message);
        self.arm_retry();
    }

    fn arm_retry(&mut self) {
        self.retry
            .arm(self.retry_delay, |id| ControlEvent::Timer(MachineEvent::RetryTick(id)));
    }

    fn track(&mut self, request: Option<RenderRequest>) -> Option<RenderRequest> {
        if let Some(r) = &request {
            self.pending_url = Some(r.url.clone());
        }
        request
    }

    /// Cancels rotation and retry timers.
    pub fn shutdown(&mut self) {
        self.rotation.stop();
        self.retry.cancel();
        self.pending_url = None;
    }

    pub fn state(&self) -> RotationState {
        RotationState {
            current_index: self.rotation.index(),
            phase: self.phase,
            last_error_message: self.last_error.clone(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> Option<&Arc<DeviceConfig>> {
        self.config.as_ref()
    }

    pub fn current_url(&self) -> Option<&str> {
        self.rotation.current().map(|p| p.url.as_str())
    }

    pub fn rotation(&self) -> &RotationEngine {
        &self.rotation
    }

    pub fn retry_pending(&self) -> bool {
        self.retry.is_armed()
    }
}
