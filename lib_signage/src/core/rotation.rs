//! # Rotation Engine
//!
//! Cycles through the pages of a `DeviceConfig`. Each page is shown for its own
//! display time; the per-page timer posts a `RotationTick` to the control task,
//! which calls back into `on_tick`. A page with a display time of 0, or a
//! single-page rotation, never arms the timer.
//!
//! When the config asks for cache-busting every emitted URL carries a `t` query
//! parameter holding the emission time in Unix milliseconds, kept strictly
//! increasing so two emissions of the same page can never collide.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use url::Url;

use super::events::{ControlEvent, MachineEvent};
use super::timer::{TimerId, TimerSlot};
use crate::configs::{DeviceConfig, PageEntry};

const CACHE_BUST_PARAM: &str = "t";

/// One instruction to the render surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub index: usize,
    pub url: String,
}

#[derive(Debug, Default)]
struct CacheBuster {
    last: i64,
}

impl CacheBuster {
    fn next_stamp(&mut self) -> i64 {
        let now = Utc::now().timestamp_millis();
        self.last = now.max(self.last + 1);
        self.last
    }

    fn apply(&mut self, url: &str) -> String {
        let stamp = self.next_stamp();
        match Url::parse(url) {
            Ok(mut parsed) => {
                let query = match parsed.query() {
                    Some(q) if !q.is_empty() => format!("{q}&{CACHE_BUST_PARAM}={stamp}"),
                    _ => format!("{CACHE_BUST_PARAM}={stamp}"),
                };
                parsed.set_query(Some(&query));
                parsed.to_string()
            }
            Err(_) => {
                let sep = if url.contains('?') { '&' } else { '?' };
                format!("{url}{sep}{CACHE_BUST_PARAM}={stamp}")
            }
        }
    }
}

pub struct RotationEngine {
    config: Option<Arc<DeviceConfig>>,
    index: usize,
    running: bool,
    timer: TimerSlot<ControlEvent>,
    buster: CacheBuster,
}

impl RotationEngine {
    pub fn new(events: mpsc::UnboundedSender<ControlEvent>) -> Self {
        Self {
            config: None,
            index: 0,
            running: false,
            timer: TimerSlot::new("rotation", events),
            buster: CacheBuster::default(),
        }
    }

    /// Resets to page 0 of `config` and emits it. Returns `None` for a config
    /// without pages, leaving the engine stopped.
    pub fn start(&mut self, config: Arc<DeviceConfig>) -> Option<RenderRequest> {
        self.timer.cancel();
        if !config.is_playable() {
            self.running = false;
            return None;
        }
        self.config = Some(config);
        self.index = 0;
        self.running = true;
        self.arm_for_current();
        tracing::debug!(pages = self.page_count(), "Rotation started");
        self.emit()
    }

    pub fn current(&self) -> Option<&PageEntry> {
        self.config.as_ref().and_then(|c| c.pages.get(self.index))
    }

    /// Moves to the next page, wrapping after the last. A no-op while stopped.
    pub fn advance(&mut self) -> Option<RenderRequest> {
        if !self.running {
            return None;
        }
        let count = self.page_count();
        if count == 0 {
            return None;
        }
        self.index = (self.index + 1) % count;
        self.arm_for_current();
        self.emit()
    }

    /// Handles a timer firing; stale firings are ignored.
    pub fn on_tick(&mut self, id: TimerId) -> Option<RenderRequest> {
        if !self.timer.fire(id) {
            return None;
        }
        self.advance()
    }

    pub fn stop(&mut self) {
        if self.running {
            tracing::debug!(index = self.index, "Rotation stopped");
        }
        self.running = false;
        self.timer.cancel();
    }

    /// Restarts the per-page timer from the current page without resetting the index.
    pub fn resume(&mut self) {
        if self.current().is_none() {
            return;
        }
        self.running = true;
        self.arm_for_current();
    }

    /// Emits the current page again without touching the timer.
    pub fn render_current(&mut self) -> Option<RenderRequest> {
        self.emit()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn page_count(&self) -> usize {
        self.config.as_ref().map_or(0, |c| c.pages.len())
    }

    pub fn timer_armed(&self) -> bool {
        self.timer.is_armed()
    }

    fn arm_for_current(&mut self) {
        let delay: Option<Duration> = if self.page_count() > 1 {
            self.current().and_then(PageEntry::display_time)
        } else {
            None
        };
        match delay {
            Some(delay) => {
                self.timer
                    .arm(delay, |id| ControlEvent::Timer(MachineEvent::RotationTick(id)));
            }
            None => self.timer.cancel(),
        }
    }

    fn emit(&mut self) -> Option<RenderRequest> {
        let config = self.config.as_ref()?;
        let page = config.pages.get(self.index)?;
        let url = if config.clear_cache {
            self.buster.apply(&page.url)
        } else {
            page.url.clone()
        };
        Some(RenderRequest {
            index: self.index,
            url,
        })
    }
}
