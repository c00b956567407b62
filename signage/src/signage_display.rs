//! # signage_display
//!
//! Hosts the display engine: configuration sync, page rotation, the Normal/Error
//! state machine, the memory watchdog and the local status API.
//!
//! The process holds the single-instance lock for its whole life. It stops on
//! SIGINT/SIGTERM or when the watchdog hands over to a freshly launched
//! instance; either way every timer is cancelled before exit.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_graceful::{Shutdown, ShutdownGuard};
use tokio_util::sync::CancellationToken;

use lib_signage::configs::{JsonSettingsStore, SettingsStore};
use lib_signage::core::{control_channel, DisplayController};
use lib_signage::health::{HealthMonitor, SysinfoProbe};
use lib_signage::retrieve::{ApiClient, SheetsStore};
use lib_signage::startup::{InstanceLock, LaunchError, ProcessLauncher, StartupOrchestrator};
use lib_signage::sync::{resolve_device_id, ConfigSynchronizer};
use lib_signage::utils::misc::sys_info::get_host_info;
use signage::app::config::{load_config, Config};
use signage::app::restart::RelaunchRestarter;
use signage::app::surface::BrowserSurface;
use signage::app::{logger, status_api};

#[derive(Parser, Debug)]
#[command(about = "Unattended signage display", version)]
struct Cli {
    #[command(flatten)]
    config: Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // load .env files before anything else
    dotenvy::dotenv().ok();

    let config = load_config(Cli::parse().config);
    let _log_guard = logger::setup_logging(&config.log_dir(), config.log_level(), "signage_display")?;

    // Cancelled by the watchdog once a replacement instance has been launched.
    let exit = CancellationToken::new();
    let signal = {
        let exit = exit.clone();
        async move {
            tokio::select! {
                _ = tokio_graceful::default_signal() => {}
                _ = exit.cancelled() => tracing::info!("Exit requested by the display host"),
            }
        }
    };
    let shutdown = Shutdown::new(signal);

    shutdown.spawn_task_fn(move |guard| async move {
        if let Err(e) = run_display(config, guard, exit.clone()).await {
            tracing::error!(error = %e, "Display host failed");
            exit.cancel();
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

async fn run_display(config: Config, guard: ShutdownGuard, exit: CancellationToken) -> Result<()> {
    let settings = JsonSettingsStore::new(config.settings_path()).load_or_default();
    let device_id = resolve_device_id(&settings);
    tracing::info!(device_id = %device_id, orientation = %settings.orientation, "Starting display");
    match get_host_info() {
        Ok(info) => tracing::info!("{info}"),
        Err(e) => tracing::warn!(error = %e, "Host info unavailable"),
    }

    let launcher = ProcessLauncher::new(config.state_dir()).with_focus_command(config.focus_argv());
    let lock = match InstanceLock::acquire(launcher.pid_file()) {
        Ok(lock) => lock,
        Err(LaunchError::AlreadyRunning(pid)) => {
            tracing::info!(pid, "Display already running, exiting");
            exit.cancel();
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let spreadsheet_id = config.spreadsheet_id.clone().unwrap_or_else(|| {
        tracing::warn!("No spreadsheet configured; the display will stay in the error state");
        String::new()
    });
    let client = ApiClient::new(config.sheets_base_url(), config.api_key.clone())
        .context("building the spreadsheet client")?;
    let store = SheetsStore::new(client, spreadsheet_id);
    let sync = Arc::new(
        ConfigSynchronizer::new(Arc::new(store), settings.orientation).with_range(config.sheet_range()),
    );

    let (handle, inbox) = control_channel(device_id);
    let surface = BrowserSurface::new(handle.reporter())?.with_browser(config.browser_argv());
    let controller = DisplayController::new(inbox, sync, surface, config.controller_settings());

    let orchestrator = StartupOrchestrator::new(
        Arc::new(launcher),
        config.display_target(),
        config.job_request(),
    );
    let restarter = RelaunchRestarter::new(Arc::new(orchestrator), Arc::new(Mutex::new(lock)), exit.clone());
    let probe = SysinfoProbe::current().with_trim_handle(handle.clone());
    let monitor = HealthMonitor::new(Arc::new(probe), Arc::new(restarter), config.health_settings());

    let cancel = CancellationToken::new();
    let controller_task = tokio::spawn(controller.run(cancel.clone()));
    let monitor_task = tokio::spawn(monitor.run(cancel.clone()));
    let status_task = tokio::spawn(status_api::bind_and_serve(
        config.status_port(),
        handle.clone(),
        cancel.clone(),
    ));

    guard.cancelled().await;
    tracing::info!("Stopping display");
    cancel.cancel();

    if let Err(e) = controller_task.await {
        tracing::error!(error = %e, "Display controller task panicked");
    }
    if let Err(e) = monitor_task.await {
        tracing::error!(error = %e, "Health monitor task panicked");
    }
    match status_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Status API disabled"),
        Err(e) => tracing::error!(error = %e, "Status API task panicked"),
    }
    Ok(())
}
