//! The process-backed render surface.
//!
//! Each load optionally (re)starts the configured browser command with the URL
//! substituted for `{url}`, then probes the URL over HTTP. The probe outcome is
//! the load outcome: a 2xx answer is a success, anything else a render failure.
//! Without a browser command the surface is headless, which keeps the whole
//! recovery path exercisable on a machine with no display attached.

use std::process::Stdio;
use std::time::Duration;

use anyhow::Result;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use lib_signage::core::{RenderSurface, SurfaceReporter};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct BrowserSurface {
    reporter: SurfaceReporter,
    client: reqwest::Client,
    probe_timeout: Duration,
    browser: Vec<String>,
    child: Option<Child>,
    probe: Option<JoinHandle<()>>,
}

fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

impl BrowserSurface {
    pub fn new(reporter: SurfaceReporter) -> Result<Self> {
        Ok(Self {
            reporter,
            client: build_client(DEFAULT_PROBE_TIMEOUT)?,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            browser: Vec::new(),
            child: None,
            probe: None,
        })
    }

    /// Browser argv; `{url}` in any argument is replaced by the page URL.
    pub fn with_browser(mut self, argv: Vec<String>) -> Self {
        self.browser = argv;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = build_client(timeout)?;
        self.probe_timeout = timeout;
        Ok(self)
    }

    fn stop_browser(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "Browser already gone");
            }
        }
    }

    fn start_browser(&mut self, url: &str) -> std::io::Result<()> {
        let argv: Vec<String> = self.browser.iter().map(|a| a.replace("{url}", url)).collect();
        let Some((program, args)) = argv.split_first() else {
            return Ok(());
        };
        self.stop_browser();
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        tracing::debug!(program = %program, pid = ?child.id(), "Browser started");
        self.child = Some(child);
        Ok(())
    }

    fn abort_probe(&mut self) {
        if let Some(probe) = self.probe.take() {
            probe.abort();
        }
    }
}

impl RenderSurface for BrowserSurface {
    fn load(&mut self, url: &str) {
        self.abort_probe();
        if let Err(e) = self.start_browser(url) {
            tracing::error!(url, error = %e, "Failed to start browser");
            self.reporter.failed(url, format!("browser failed to start: {e}"));
            return;
        }

        let client = self.client.clone();
        let reporter = self.reporter.clone();
        let url = url.to_string();
        self.probe = Some(tokio::spawn(async move {
            match client.get(&url).send().await {
                Ok(response) if response.status().is_success() => reporter.succeeded(url),
                Ok(response) => {
                    let status = response.status();
                    reporter.failed(url, format!("page answered HTTP {status}"));
                }
                Err(e) if e.is_timeout() => reporter.failed(url, "page load timed out"),
                Err(e) => reporter.failed(url, format!("page unreachable: {e}")),
            }
        }));
    }

    fn reclaim_memory(&mut self) {
        // Dropping the client releases its pooled connections and buffers.
        match build_client(self.probe_timeout) {
            Ok(client) => {
                self.client = client;
                tracing::info!("Surface caches dropped");
            }
            Err(e) => tracing::warn!(error = %e, "Failed to rebuild HTTP client"),
        }
    }

    fn shutdown(&mut self) {
        self.abort_probe();
        self.stop_browser();
        tracing::debug!("Surface shut down");
    }
}
