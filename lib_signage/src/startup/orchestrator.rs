//! # Startup Orchestrator
//!
//! Three redundant triggers keep the display running: boot, a persisted
//! scheduled job and a foreground-presence heartbeat. Operator launches and
//! watchdog restarts join them. All of them are independent producers of the
//! same `EnsureRunning` command on one channel, and `StartupOrchestrator::run`
//! is the only consumer. The triggers are expected to race; the launch
//! primitive absorbs duplicates and reports them as race no-ops.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::launcher::{LaunchError, LaunchFlags, LaunchOutcome, LaunchTarget, Launcher};
use super::scheduler::{JobRequest, JobScheduler};
use crate::core::timer::ScheduledTask;

pub const DEFAULT_BOOT_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_PRESENCE_INTERVAL: Duration = Duration::from_secs(30);

/// Who asked for the display to be running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Boot,
    BootDelayed,
    ScheduledJob(String),
    Presence,
    Manual,
    HealthRestart,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Boot => f.write_str("boot"),
            Trigger::BootDelayed => f.write_str("boot-delayed"),
            Trigger::ScheduledJob(id) => write!(f, "job:{id}"),
            Trigger::Presence => f.write_str("presence"),
            Trigger::Manual => f.write_str("manual"),
            Trigger::HealthRestart => f.write_str("health-restart"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsureRunning {
    pub trigger: Trigger,
}

/// Producer side of the trigger channel.
#[derive(Debug, Clone)]
pub struct TriggerSender(mpsc::UnboundedSender<EnsureRunning>);

impl TriggerSender {
    /// Returns `false` once the orchestrator has stopped.
    pub fn fire(&self, trigger: Trigger) -> bool {
        tracing::trace!(trigger = %trigger, "Trigger fired");
        self.0.send(EnsureRunning { trigger }).is_ok()
    }
}

pub fn trigger_channel() -> (TriggerSender, mpsc::UnboundedReceiver<EnsureRunning>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (TriggerSender(tx), rx)
}

/// Fires at boot: once now and once after a delay, accepting that both may launch.
pub struct BootTrigger {
    sender: TriggerSender,
    delay: Duration,
}

impl BootTrigger {
    pub fn new(sender: TriggerSender, delay: Duration) -> Self {
        Self { sender, delay }
    }

    /// Returns the delayed firing; dropping it cancels the delayed launch.
    pub fn fire(self) -> ScheduledTask {
        self.sender.fire(Trigger::Boot);
        let sender = self.sender;
        ScheduledTask::once(self.delay, async move {
            sender.fire(Trigger::BootDelayed);
        })
    }
}

/// Re-asserts the display every interval for as long as its task lives.
pub struct PresenceTrigger;

impl PresenceTrigger {
    pub fn start(sender: TriggerSender, interval: Duration) -> ScheduledTask {
        tracing::info!(interval_secs = interval.as_secs(), "Foreground presence started");
        ScheduledTask::repeating(interval, move || {
            let sender = sender.clone();
            async move {
                sender.fire(Trigger::Presence);
            }
        })
    }
}

/// The single consumer of `EnsureRunning` commands.
pub struct StartupOrchestrator {
    launcher: Arc<dyn Launcher>,
    scheduler: Option<Arc<dyn JobScheduler>>,
    target: LaunchTarget,
    flags: LaunchFlags,
    fallback_job: JobRequest,
}

impl StartupOrchestrator {
    pub fn new(launcher: Arc<dyn Launcher>, target: LaunchTarget, fallback_job: JobRequest) -> Self {
        Self {
            launcher,
            scheduler: None,
            target,
            flags: LaunchFlags::KIOSK,
            fallback_job,
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn JobScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_flags(mut self, flags: LaunchFlags) -> Self {
        self.flags = flags;
        self
    }

    /// The idempotent launch path shared by every trigger.
    pub async fn ensure_running(&self, trigger: &Trigger) -> Result<LaunchOutcome, LaunchError> {
        let outcome = self
            .launcher
            .launch_or_bring_to_front(&self.target, self.flags)
            .await?;
        match outcome {
            LaunchOutcome::Launched { pid } => {
                tracing::info!(trigger = %trigger, pid, "Display launched")
            }
            LaunchOutcome::AlreadyFrontmost { pid } => {
                tracing::debug!(trigger = %trigger, pid, "LaunchRaceNoop: display already frontmost")
            }
            LaunchOutcome::InProgress => {
                tracing::debug!(trigger = %trigger, "LaunchRaceNoop: launch already in progress")
            }
        }
        Ok(outcome)
    }

    /// (Re)schedules the persisted fallback job.
    pub async fn schedule_fallback(&self) {
        let Some(scheduler) = &self.scheduler else {
            return;
        };
        match scheduler.schedule(self.fallback_job.clone()).await {
            Ok(()) => tracing::debug!(job_id = %self.fallback_job.job_id, "Fallback job scheduled"),
            Err(e) => tracing::warn!(job_id = %self.fallback_job.job_id, error = %e, "Failed to schedule fallback job"),
        }
    }

    /// Handles one command. Never fails: errors are logged and the next
    /// trigger tries again.
    pub async fn handle(&self, command: EnsureRunning) {
        if let Err(e) = self.ensure_running(&command.trigger).await {
            tracing::error!(trigger = %command.trigger, error = %e, "Launch failed");
        }
        if matches!(command.trigger, Trigger::Boot | Trigger::ScheduledJob(_)) {
            self.schedule_fallback().await;
        }
    }

    /// Consumes commands until cancelled or every producer is gone.
    pub async fn run(&self, mut commands: mpsc::UnboundedReceiver<EnsureRunning>, cancel: CancellationToken) {
        loop {
            let command = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            self.handle(command).await;
        }
        tracing::debug!("Startup orchestrator stopped");
    }
}
