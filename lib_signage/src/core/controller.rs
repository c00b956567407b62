//! # Display Controller
//!
//! The single control task. It owns the `DisplayStateMachine`, the render
//! surface and the config-refresh timer, and consumes everything that can change
//! them from two channels: `ControlEvent`s (timers, surface callbacks, operator
//! requests) and `SyncReport`s from background fetches. Because only this task
//! mutates display state, no locks are needed and a transition always cancels
//! the timer it supersedes before arming a new one.
//!
//! A `DisplayStatus` snapshot is published on a `watch` channel after every
//! event for the status API.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::events::{ControlEvent, SurfaceReporter};
use super::rotation::RenderRequest;
use super::state_machine::{DisplayStateMachine, Phase, RetryOutcome, DEFAULT_RETRY_DELAY};
use super::surface::RenderSurface;
use super::timer::TimerSlot;
use crate::configs::{DeviceId, DEFAULT_REFRESH_MINUTES};
use crate::sync::{ConfigSynchronizer, FetchTicket, SyncReport};

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub retry_delay: Duration,
    /// Refresh interval used until a configuration provides one.
    pub default_refresh: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
            default_refresh: Duration::from_secs(u64::from(DEFAULT_REFRESH_MINUTES) * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayStatus {
    pub device_id: String,
    pub phase: Phase,
    pub current_index: usize,
    pub current_url: Option<String>,
    pub last_error_message: Option<String>,
    pub page_count: usize,
    pub fetching: bool,
    pub updated_at: DateTime<Utc>,
}

impl DisplayStatus {
    fn initial(device_id: &DeviceId) -> Self {
        Self {
            device_id: device_id.to_string(),
            phase: Phase::Normal,
            current_index: 0,
            current_url: None,
            last_error_message: None,
            page_count: 0,
            fetching: false,
            updated_at: Utc::now(),
        }
    }
}

/// Cloneable handle for everything outside the control task.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::UnboundedSender<ControlEvent>,
    status: watch::Receiver<DisplayStatus>,
}

impl ControlHandle {
    pub fn retry(&self) -> bool {
        self.send(ControlEvent::ManualRetry)
    }

    pub fn refresh(&self) -> bool {
        self.send(ControlEvent::RefreshNow)
    }

    pub fn trim_memory(&self) -> bool {
        self.send(ControlEvent::TrimMemory)
    }

    pub fn shutdown(&self) -> bool {
        self.send(ControlEvent::Shutdown)
    }

    /// Returns `false` once the control task has stopped.
    pub fn send(&self, event: ControlEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn reporter(&self) -> SurfaceReporter {
        SurfaceReporter::new(self.tx.clone())
    }

    pub fn status(&self) -> DisplayStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DisplayStatus> {
        self.status.clone()
    }
}

/// The receiving half of the control channel, handed to `DisplayController::new`.
pub struct ControlInbox {
    device_id: DeviceId,
    tx: mpsc::UnboundedSender<ControlEvent>,
    rx: mpsc::UnboundedReceiver<ControlEvent>,
    status: watch::Sender<DisplayStatus>,
}

/// Creates the control channel. Build the surface from the handle's reporter
/// before building the controller from the inbox.
pub fn control_channel(device_id: DeviceId) -> (ControlHandle, ControlInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(DisplayStatus::initial(&device_id));
    (
        ControlHandle {
            tx: tx.clone(),
            status: status_rx,
        },
        ControlInbox {
            device_id,
            tx,
            rx,
            status: status_tx,
        },
    )
}

pub struct DisplayController<S: RenderSurface> {
    device_id: DeviceId,
    sync: Arc<ConfigSynchronizer>,
    surface: S,
    machine: DisplayStateMachine,
    refresh: TimerSlot<ControlEvent>,
    default_refresh: Duration,
    events: mpsc::UnboundedReceiver<ControlEvent>,
    reports_tx: mpsc::UnboundedSender<SyncReport>,
    reports: mpsc::UnboundedReceiver<SyncReport>,
    status: watch::Sender<DisplayStatus>,
}

impl<S: RenderSurface> DisplayController<S> {
    pub fn new(
        inbox: ControlInbox,
        sync: Arc<ConfigSynchronizer>,
        surface: S,
        settings: ControllerSettings,
    ) -> Self {
        let (reports_tx, reports) = mpsc::unbounded_channel();
        Self {
            device_id: inbox.device_id,
            sync,
            surface,
            machine: DisplayStateMachine::new(inbox.tx.clone(), settings.retry_delay),
            refresh: TimerSlot::new("config-refresh", inbox.tx),
            default_refresh: settings.default_refresh,
            events: inbox.rx,
            reports_tx,
            reports,
            status: inbox.status,
        }
    }

    /// Runs until `cancel` fires or a `Shutdown` event arrives, then cancels
    /// every timer it owns and shuts the surface down.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(device_id = %self.device_id, "Display controller started");
        self.request_fetch();
        self.publish();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(report) = self.reports.recv() => self.handle_report(report),
                Some(event) = self.events.recv() => {
                    if !self.handle_event(event) {
                        break;
                    }
                }
            }
            self.publish();
        }

        self.teardown();
    }

    fn handle_event(&mut self, event: ControlEvent) -> bool {
        match event {
            ControlEvent::Timer(timer) => {
                if let Some(outcome) = self.machine.on_timer(timer) {
                    self.handle_outcome(outcome);
                }
            }
            ControlEvent::Surface(event) => self.machine.on_surface(event),
            ControlEvent::ManualRetry => {
                tracing::info!("Manual retry requested");
                let outcome = self.machine.retry();
                self.handle_outcome(outcome);
            }
            ControlEvent::RefreshNow => self.request_fetch(),
            ControlEvent::RefreshTick(id) => {
                if self.refresh.fire(id) {
                    self.request_fetch();
                }
            }
            ControlEvent::TrimMemory => {
                tracing::info!("Reclaiming surface memory");
                self.surface.reclaim_memory();
            }
            ControlEvent::Shutdown => return false,
        }
        true
    }

    fn handle_outcome(&mut self, outcome: RetryOutcome) {
        match outcome {
            RetryOutcome::Rendering(request) => self.render(request),
            RetryOutcome::NeedsConfig => self.request_fetch(),
        }
    }

    fn handle_report(&mut self, report: SyncReport) {
        let interval = match &report.result {
            Ok(config) => config.refresh_interval(),
            Err(_) => self
                .machine
                .config()
                .map_or(self.default_refresh, |c| c.refresh_interval()),
        };
        self.refresh.arm(interval, ControlEvent::RefreshTick);

        match report.result {
            Ok(config) => {
                let snapshot = self.sync.commit(config);
                if let Some(request) = self.machine.apply_config(snapshot) {
                    self.render(request);
                }
            }
            Err(e) => self.machine.on_fetch_failed(&e.to_string()),
        }
    }

    fn request_fetch(&mut self) {
        match self
            .sync
            .request_fetch(self.device_id.clone(), self.reports_tx.clone())
        {
            FetchTicket::Accepted => tracing::debug!(device_id = %self.device_id, "Configuration fetch started"),
            FetchTicket::Rejected => {}
        }
    }

    fn render(&mut self, request: RenderRequest) {
        tracing::info!(index = request.index, url = %request.url, "Loading page");
        self.surface.load(&request.url);
    }

    fn publish(&self) {
        let state = self.machine.state();
        let status = DisplayStatus {
            device_id: self.device_id.to_string(),
            phase: state.phase,
            current_index: state.current_index,
            current_url: self.machine.current_url().map(str::to_string),
            last_error_message: state.last_error_message,
            page_count: self.machine.rotation().page_count(),
            fetching: self.sync.is_fetching(),
            updated_at: Utc::now(),
        };
        self.status.send_replace(status);
    }

    fn teardown(&mut self) {
        self.machine.shutdown();
        self.refresh.cancel();
        self.surface.shutdown();
        self.publish();
        tracing::info!(device_id = %self.device_id, "Display controller stopped");
    }
}
