//! Memory measurement for the watchdog.
//!
//! The display process hosts the control loop and spawns the browser surface as
//! a child, so "used memory" is the resident set of this process plus its
//! direct children.

use std::sync::Mutex;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::core::ControlHandle;

/// Source of memory samples and target of GC hints.
pub trait MemoryProbe: Send + Sync {
    /// Used bytes, or `None` when the probe cannot measure.
    fn used_bytes(&self) -> Option<u64>;

    /// Asks the measured process to release memory it can rebuild.
    fn request_gc(&self);
}

pub struct SysinfoProbe {
    system: Mutex<System>,
    pid: Pid,
    trim: Option<ControlHandle>,
}

impl SysinfoProbe {
    /// Probes the current process.
    pub fn current() -> Self {
        Self::for_pid(std::process::id())
    }

    pub fn for_pid(pid: u32) -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: Pid::from_u32(pid),
            trim: None,
        }
    }

    /// Routes GC hints to the display controller as memory-trim events.
    pub fn with_trim_handle(mut self, handle: ControlHandle) -> Self {
        self.trim = Some(handle);
        self
    }
}

impl MemoryProbe for SysinfoProbe {
    fn used_bytes(&self) -> Option<u64> {
        let mut sys = match self.system.lock() {
            Ok(sys) => sys,
            Err(poisoned) => poisoned.into_inner(),
        };
        sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::new().with_memory(),
        );

        let own = sys.process(self.pid)?.memory();
        let children: u64 = sys
            .processes()
            .values()
            .filter(|p| p.parent() == Some(self.pid))
            .map(|p| p.memory())
            .sum();
        Some(own + children)
    }

    fn request_gc(&self) {
        match &self.trim {
            Some(handle) => {
                if !handle.trim_memory() {
                    tracing::debug!("Display controller gone, GC hint dropped");
                }
            }
            None => tracing::debug!(pid = %self.pid, "No trim target for GC hint"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measures_the_current_process() {
        let probe = SysinfoProbe::current();
        let used = probe.used_bytes().expect("own process is visible");
        assert!(used > 0);
    }

    #[test]
    fn unknown_pid_is_unmeasurable() {
        assert_eq!(SysinfoProbe::for_pid(u32::MAX - 1).used_bytes(), None);
    }
}
