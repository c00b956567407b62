//! Hard restart of the display process, requested by the memory watchdog.
//!
//! The restart is fire-and-forget: the instance lock is released so the new
//! process can take it, the launch path is re-entered with a `HealthRestart`
//! trigger, and the hosting process is told to exit. Rotation and config state
//! are not drained.

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use lib_signage::health::Restarter;
use lib_signage::startup::{InstanceLock, StartupOrchestrator, Trigger};

pub struct RelaunchRestarter {
    orchestrator: Arc<StartupOrchestrator>,
    lock: Arc<Mutex<InstanceLock>>,
    exit: CancellationToken,
}

impl RelaunchRestarter {
    pub fn new(
        orchestrator: Arc<StartupOrchestrator>,
        lock: Arc<Mutex<InstanceLock>>,
        exit: CancellationToken,
    ) -> Self {
        Self {
            orchestrator,
            lock,
            exit,
        }
    }
}

impl Restarter for RelaunchRestarter {
    fn restart_display(&self, reason: &str) {
        tracing::warn!(reason, "Restarting display");
        match self.lock.lock() {
            Ok(mut lock) => lock.release(),
            Err(poisoned) => poisoned.into_inner().release(),
        }

        let orchestrator = self.orchestrator.clone();
        let exit = self.exit.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.ensure_running(&Trigger::HealthRestart).await {
                tracing::error!(error = %e, "Relaunch after health restart failed");
            }
            exit.cancel();
        });
    }
}
