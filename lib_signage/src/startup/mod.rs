//! # Startup Module
//!
//! Keeps the display process running after boot, after it is killed and
//! periodically as a safety net.
//!
//! - **`launcher`**: the idempotent launch primitive and the instance lock.
//! - **`scheduler`**: the persisted one-shot job trigger.
//! - **`orchestrator`**: the trigger channel, the boot and presence triggers and
//!   the single `StartupOrchestrator` consuming them.

pub mod launcher;
pub mod orchestrator;
pub mod scheduler;

pub use launcher::{
    InstanceLock, LaunchError, LaunchFlags, LaunchOutcome, LaunchTarget, Launcher, ProcessLauncher,
};
pub use orchestrator::{
    trigger_channel, BootTrigger, EnsureRunning, PresenceTrigger, StartupOrchestrator, Trigger,
    TriggerSender,
};
pub use scheduler::{
    CronJobScheduler, JobRequest, JobScheduler, PersistedJob, PersistedJobTable, ScheduleError,
};
