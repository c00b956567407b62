//! # signage_launcher
//!
//! Entry points for everything that asks for the display to be running.
//!
//! - `boot`: launch now and again after a short delay, restore and (re)schedule
//!   the persisted fallback job, then keep hosting job firings until stopped.
//! - `presence`: re-assert the display on a fixed interval until stopped.
//! - `job <id>`: a scheduled-job firing delivered by an external scheduler.
//! - `launch`: an operator launch.
//! - `configure`: update the persisted device settings.
//!
//! Every trigger goes through the same idempotent launch path, so running
//! several of them at once is expected and harmless.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_graceful::{Shutdown, ShutdownGuard};
use tokio_util::sync::CancellationToken;

use lib_signage::configs::{JsonSettingsStore, Orientation, SettingsStore};
use lib_signage::startup::{
    trigger_channel, BootTrigger, CronJobScheduler, EnsureRunning, LaunchOutcome,
    PersistedJobTable, PresenceTrigger, ProcessLauncher, StartupOrchestrator, Trigger,
};
use signage::app::config::{load_config, Config};
use signage::app::logger;

const JOB_TABLE_FILE_NAME: &str = "jobs.json";

#[derive(Parser, Debug)]
#[command(about = "Keeps the signage display running", version)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Boot-time launch; stays up to host the fallback job.
    Boot,
    /// Foreground presence heartbeat.
    Presence,
    /// A scheduled-job firing.
    Job {
        /// Identifier of the job that fired.
        id: String,
    },
    /// Launch or raise the display now.
    Launch,
    /// Persist the device identity override and orientation.
    Configure {
        #[arg(long)]
        device_id: Option<String>,
        #[arg(long)]
        orientation: Option<Orientation>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // load .env files before anything else
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = load_config(cli.config);
    let _log_guard = logger::setup_logging(&config.log_dir(), config.log_level(), "signage_launcher")?;

    match cli.command {
        Command::Configure {
            device_id,
            orientation,
        } => configure(&config, device_id, orientation),
        Command::Launch => launch_once(&config, Trigger::Manual).await,
        Command::Job { id } => launch_once(&config, Trigger::ScheduledJob(id)).await,
        Command::Boot => supervise(config, true).await,
        Command::Presence => supervise(config, false).await,
    }
}

fn orchestrator(config: &Config) -> StartupOrchestrator {
    let launcher = ProcessLauncher::new(config.state_dir()).with_focus_command(config.focus_argv());
    StartupOrchestrator::new(
        Arc::new(launcher),
        config.display_target(),
        config.job_request(),
    )
}

fn job_table(config: &Config) -> PersistedJobTable {
    PersistedJobTable::new(config.state_dir().join(JOB_TABLE_FILE_NAME))
}

fn configure(config: &Config, device_id: Option<String>, orientation: Option<Orientation>) -> Result<()> {
    let store = JsonSettingsStore::new(config.settings_path());
    let mut settings = store.load_or_default();
    if let Some(id) = device_id {
        let id = id.trim().to_string();
        settings.device_id = (!id.is_empty()).then_some(id);
    }
    if let Some(orientation) = orientation {
        settings.orientation = orientation;
    }
    store.save(&settings).context("saving device settings")?;
    tracing::info!(
        path = %store.path().display(),
        device_id = ?settings.device_id,
        orientation = %settings.orientation,
        "Device settings saved"
    );
    Ok(())
}

/// Handles a single trigger and exits. A job firing also re-arms the
/// persisted fallback job for the next boot to restore.
async fn launch_once(config: &Config, trigger: Trigger) -> Result<()> {
    let (sender, _rx) = trigger_channel();
    let scheduler = match &trigger {
        Trigger::ScheduledJob(_) => Some(Arc::new(
            CronJobScheduler::start(Some(job_table(config)), sender).await?,
        )),
        _ => None,
    };

    let mut orch = orchestrator(config);
    if let Some(scheduler) = &scheduler {
        orch = orch.with_scheduler(scheduler.clone());
    }

    let outcome = orch.ensure_running(&trigger).await?;
    match outcome {
        LaunchOutcome::Launched { pid } => println!("launched display (pid {pid})"),
        LaunchOutcome::AlreadyFrontmost { pid } => println!("display already running (pid {pid})"),
        LaunchOutcome::InProgress => println!("display launch already in progress"),
    }
    if matches!(trigger, Trigger::ScheduledJob(_)) {
        orch.schedule_fallback().await;
    }

    drop(orch);
    if let Some(scheduler) = scheduler.and_then(|s| Arc::try_unwrap(s).ok()) {
        scheduler.shutdown().await?;
    }
    Ok(())
}

/// Long-running trigger host, stopped by SIGINT/SIGTERM.
async fn supervise(config: Config, boot: bool) -> Result<()> {
    let shutdown = Shutdown::default();
    shutdown.spawn_task_fn(move |guard| async move {
        let result = if boot {
            run_boot(config, guard).await
        } else {
            run_presence(config, guard).await
        };
        if let Err(e) = result {
            tracing::error!(error = %e, "Launcher failed");
        }
    });

    match shutdown.shutdown_with_limit(Duration::from_secs(10)).await {
        Ok(elapsed) => tracing::info!(
            "shutdown: gracefully {}s after shutdown signal received",
            elapsed.as_secs_f64()
        ),
        Err(e) => tracing::warn!("shutdown: forcefully due to timeout: {}", e),
    }
    Ok(())
}

fn cancel_on(guard: ShutdownGuard) -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        guard.cancelled().await;
        token.cancel();
    });
    cancel
}

async fn run_boot(config: Config, guard: ShutdownGuard) -> Result<()> {
    let (sender, rx) = trigger_channel();
    let scheduler = Arc::new(CronJobScheduler::start(Some(job_table(&config)), sender.clone()).await?);
    match scheduler.restore().await {
        Ok(0) => {}
        Ok(restored) => tracing::info!(restored, "Persisted jobs restored"),
        Err(e) => tracing::warn!(error = %e, "Failed to restore persisted jobs"),
    }

    let orch = orchestrator(&config).with_scheduler(scheduler.clone());
    let _delayed = BootTrigger::new(sender, config.boot_delay()).fire();

    orch.run(rx, cancel_on(guard)).await;

    drop(orch);
    if let Ok(scheduler) = Arc::try_unwrap(scheduler) {
        scheduler.shutdown().await?;
    }
    Ok(())
}

async fn run_presence(config: Config, guard: ShutdownGuard) -> Result<()> {
    let (sender, rx) = trigger_channel();
    let orch = orchestrator(&config);
    // The first presence check happens now, not one interval from now.
    orch.handle(EnsureRunning {
        trigger: Trigger::Presence,
    })
    .await;
    let _presence = PresenceTrigger::start(sender, config.presence_interval());

    orch.run(rx, cancel_on(guard)).await;
    Ok(())
}
