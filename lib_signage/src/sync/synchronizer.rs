//! # Config Synchronizer
//!
//! Resolution is two-phase: list the tabs of the store, pick the one whose name
//! equals the device id ignoring case, then read a bounded range of that tab and
//! parse it by position:
//!
//! | Cell            | Meaning                                  | Fallback |
//! |-----------------|------------------------------------------|----------|
//! | row 1, col 2    | refresh interval in minutes (>= 1)       | 60       |
//! | row 2, col 2    | clear-cache flag (`true/yes/1/y/on`)     | false    |
//! | row 5.., col 1  | page URL (empty or `URL` header skipped) | skip row |
//! | row 5.., col 2  | display seconds                          | 30       |
//!
//! A tab that yields no pages is an `EmptyConfig` failure. Fetches never write
//! to the `ConfigCell`; the control task commits a result only after it has
//! been received back on the control side.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::configs::{
    DeviceConfig, DeviceId, DeviceSettings, Orientation, PageEntry, DEFAULT_REFRESH_MINUTES,
};
use crate::retrieve::{Grid, StoreError, TabularStore};
use crate::utils::misc::sys_info::{
    composite_device_key, get_host_info, machine_id_from, HostInfo, MACHINE_ID_PATHS,
};

/// Cell range read from a device tab.
pub const DEFAULT_SHEET_RANGE: &str = "A1:C200";

/// Display time for a page row whose seconds cell is missing or unparsable.
pub const DEFAULT_PAGE_SECS: u64 = 30;

const REFRESH_CELL: (usize, usize) = (0, 1);
const CLEAR_CACHE_CELL: (usize, usize) = (1, 1);
const FIRST_PAGE_ROW: usize = 4;
const URL_HEADER: &str = "URL";

/// Why a configuration fetch failed. Always recoverable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigFetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status} from configuration store: {body}")]
    Http { status: u16, body: String },

    #[error("No tab named '{0}' in the configuration store")]
    DeviceNotFound(String),

    #[error("Tab '{0}' contains no pages")]
    EmptyConfig(String),
}

impl From<StoreError> for ConfigFetchError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Network(msg) => ConfigFetchError::Network(msg),
            StoreError::Http { status, body } => ConfigFetchError::Http { status, body },
        }
    }
}

/// Outcome of a background fetch, delivered to the control task.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub device_id: DeviceId,
    pub result: Result<DeviceConfig, ConfigFetchError>,
}

/// Answer to `ConfigSynchronizer::request_fetch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchTicket {
    /// A fetch was started; its `SyncReport` will arrive on the reply channel.
    Accepted,
    /// A fetch is already in flight; nothing was started.
    Rejected,
}

/// Single-owner holder of the current configuration.
///
/// Readers get `Arc` snapshots; a commit replaces the whole value.
#[derive(Debug, Clone)]
pub struct ConfigCell {
    tx: Arc<watch::Sender<Option<Arc<DeviceConfig>>>>,
}

impl Default for ConfigCell {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Option<Arc<DeviceConfig>> {
        self.tx.borrow().clone()
    }

    pub fn commit(&self, config: DeviceConfig) -> Arc<DeviceConfig> {
        let snapshot = Arc::new(config);
        self.tx.send_replace(Some(snapshot.clone()));
        snapshot
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<DeviceConfig>>> {
        self.tx.subscribe()
    }
}

/// Resolves the device identity: settings override, then the OS machine
/// identifier, then a composite key derived from host facts.
pub fn resolve_device_id(settings: &DeviceSettings) -> DeviceId {
    resolve_device_id_with(settings, MACHINE_ID_PATHS)
}

pub(crate) fn resolve_device_id_with(
    settings: &DeviceSettings,
    machine_id_paths: &[impl AsRef<Path>],
) -> DeviceId {
    if let Some(id) = settings.device_id.as_deref().and_then(DeviceId::new) {
        tracing::debug!(device_id = %id, "Device id from settings");
        return id;
    }

    if let Some(id) = machine_id_from(machine_id_paths).and_then(DeviceId::new) {
        tracing::debug!(device_id = %id, "Device id from machine identifier");
        return id;
    }

    let info = get_host_info().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Host info unavailable, deriving device id from OS only");
        HostInfo {
            process_pid: std::process::id(),
            host_name: String::new(),
            host_ip: String::new(),
            os: std::env::consts::OS.to_string(),
        }
    });
    let id = DeviceId::from_key(composite_device_key(&info));
    tracing::info!(device_id = %id, "Device id derived from host facts");
    id
}

fn cell(grid: &Grid, (row, col): (usize, usize)) -> &str {
    grid.get(row)
        .and_then(|r| r.get(col))
        .map(|c| c.trim())
        .unwrap_or("")
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.to_ascii_lowercase().as_str(),
        "true" | "yes" | "1" | "y" | "on"
    )
}

/// Turns the cell grid of one device tab into a `DeviceConfig`.
pub fn parse_grid(
    device_id: &DeviceId,
    orientation: Orientation,
    grid: &Grid,
) -> Result<DeviceConfig, ConfigFetchError> {
    let refresh_interval_minutes = cell(grid, REFRESH_CELL)
        .parse::<u32>()
        .ok()
        .filter(|m| *m >= 1)
        .unwrap_or(DEFAULT_REFRESH_MINUTES);
    let clear_cache = parse_flag(cell(grid, CLEAR_CACHE_CELL));

    let pages: Vec<PageEntry> = (FIRST_PAGE_ROW..grid.len())
        .filter_map(|row| {
            let url = cell(grid, (row, 0));
            if url.is_empty() || url.eq_ignore_ascii_case(URL_HEADER) {
                return None;
            }
            let secs = cell(grid, (row, 1))
                .parse::<u64>()
                .unwrap_or(DEFAULT_PAGE_SECS);
            Some(PageEntry::with_display_time(url, secs))
        })
        .collect();

    if pages.is_empty() {
        return Err(ConfigFetchError::EmptyConfig(device_id.to_string()));
    }

    Ok(DeviceConfig {
        device_id: device_id.clone(),
        orientation,
        refresh_interval_minutes,
        clear_cache,
        pages,
    })
}

#[derive(Clone)]
struct Fetcher {
    store: Arc<dyn TabularStore>,
    range: String,
    orientation: Orientation,
}

impl Fetcher {
    async fn fetch(&self, device_id: &DeviceId) -> Result<DeviceConfig, ConfigFetchError> {
        let tabs = self.store.list_tabs().await?;
        let tab = tabs
            .iter()
            .find(|t| device_id.matches_tab(t))
            .ok_or_else(|| ConfigFetchError::DeviceNotFound(device_id.to_string()))?;

        tracing::debug!(device_id = %device_id, tab = %tab, range = %self.range, "Reading device tab");
        let grid = self.store.read_range(tab, &self.range).await?;
        parse_grid(device_id, self.orientation, &grid)
    }
}

/// Released when the background fetch finishes, however it finishes.
struct InFlightGuard(Arc<AtomicBool>);

impl InFlightGuard {
    fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Fetches device configurations and holds the current one.
pub struct ConfigSynchronizer {
    fetcher: Fetcher,
    cell: ConfigCell,
    in_flight: Arc<AtomicBool>,
}

impl ConfigSynchronizer {
    pub fn new(store: Arc<dyn TabularStore>, orientation: Orientation) -> Self {
        Self {
            fetcher: Fetcher {
                store,
                range: DEFAULT_SHEET_RANGE.to_string(),
                orientation,
            },
            cell: ConfigCell::new(),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_range(mut self, range: impl Into<String>) -> Self {
        self.fetcher.range = range.into();
        self
    }

    /// One fetch attempt. Does not touch the current configuration.
    pub async fn fetch_config(&self, device_id: &DeviceId) -> Result<DeviceConfig, ConfigFetchError> {
        self.fetcher.fetch(device_id).await
    }

    /// Starts a fetch on a background task unless one is already running.
    pub fn request_fetch(
        &self,
        device_id: DeviceId,
        reply: mpsc::UnboundedSender<SyncReport>,
    ) -> FetchTicket {
        let Some(guard) = InFlightGuard::try_acquire(&self.in_flight) else {
            tracing::debug!(device_id = %device_id, "Fetch already in flight, request rejected");
            return FetchTicket::Rejected;
        };

        let fetcher = self.fetcher.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let result = fetcher.fetch(&device_id).await;
            match &result {
                Ok(cfg) => tracing::info!(
                    device_id = %device_id,
                    pages = cfg.pages.len(),
                    refresh_minutes = cfg.refresh_interval_minutes,
                    "Configuration fetched"
                ),
                Err(e) => tracing::warn!(device_id = %device_id, error = %e, "Configuration fetch failed"),
            }
            if reply.send(SyncReport { device_id, result }).is_err() {
                tracing::debug!("Control task gone, dropping sync report");
            }
        });
        FetchTicket::Accepted
    }

    pub fn is_fetching(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Replaces the current configuration wholesale.
    pub fn commit(&self, config: DeviceConfig) -> Arc<DeviceConfig> {
        self.cell.commit(config)
    }

    pub fn current(&self) -> Option<Arc<DeviceConfig>> {
        self.cell.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<DeviceConfig>>> {
        self.cell.subscribe()
    }

    pub fn cell(&self) -> &ConfigCell {
        &self.cell
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::tempdir;
    use tokio::sync::Semaphore;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    fn sample_grid() -> Grid {
        vec![
            row(&["Refresh (min)", "15"]),
            row(&["Clear cache", "Yes"]),
            row(&[]),
            row(&["URL", "Seconds"]),
            row(&["https://a.example", "5"]),
            row(&["", "10"]),
            row(&["https://b.example", "abc"]),
            row(&["url"]),
            row(&["https://c.example"]),
        ]
    }

    #[derive(Default)]
    struct MemoryStore {
        tabs: HashMap<String, Grid>,
        reads: Mutex<Vec<String>>,
        gate: Option<Arc<Semaphore>>,
    }

    #[async_trait]
    impl TabularStore for MemoryStore {
        async fn list_tabs(&self) -> Result<Vec<String>, StoreError> {
            let mut tabs: Vec<String> = self.tabs.keys().cloned().collect();
            tabs.sort();
            Ok(tabs)
        }

        async fn read_range(&self, tab: &str, _range: &str) -> Result<Grid, StoreError> {
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await.map_err(|e| StoreError::Network(e.to_string()))?;
            }
            self.reads.lock().unwrap().push(tab.to_string());
            self.tabs
                .get(tab)
                .cloned()
                .ok_or_else(|| StoreError::Http { status: 400, body: "no such tab".into() })
        }
    }

    fn id(s: &str) -> DeviceId {
        DeviceId::new(s).unwrap()
    }

    #[test]
    fn parses_positional_layout() {
        let cfg = parse_grid(&id("lobby"), Orientation::Portrait, &sample_grid()).unwrap();
        assert_eq!(cfg.refresh_interval_minutes, 15);
        assert!(cfg.clear_cache);
        assert_eq!(cfg.orientation, Orientation::Portrait);
        assert_eq!(
            cfg.pages,
            vec![
                PageEntry::with_display_time("https://a.example", 5),
                PageEntry::with_display_time("https://b.example", DEFAULT_PAGE_SECS),
                PageEntry::with_display_time("https://c.example", DEFAULT_PAGE_SECS),
            ]
        );
    }

    #[test]
    fn bad_refresh_values_fall_back_to_default() {
        for raw in ["", "soon", "0", "-5"] {
            let mut grid = sample_grid();
            grid[0][1] = raw.to_string();
            let cfg = parse_grid(&id("lobby"), Orientation::Landscape, &grid).unwrap();
            assert_eq!(cfg.refresh_interval_minutes, DEFAULT_REFRESH_MINUTES, "raw = {raw:?}");
        }
    }

    #[test]
    fn clear_cache_defaults_to_false() {
        let mut grid = sample_grid();
        grid[1].truncate(1);
        assert!(!parse_grid(&id("x"), Orientation::Landscape, &grid).unwrap().clear_cache);
    }

    #[test]
    fn tab_without_pages_is_empty_config() {
        let grid = vec![row(&["Refresh", "5"]), row(&[]), row(&[]), row(&["URL", "Seconds"])];
        assert_eq!(
            parse_grid(&id("lobby"), Orientation::Landscape, &grid),
            Err(ConfigFetchError::EmptyConfig("lobby".into()))
        );
        assert!(matches!(
            parse_grid(&id("lobby"), Orientation::Landscape, &Vec::new()),
            Err(ConfigFetchError::EmptyConfig(_))
        ));
    }

    #[tokio::test]
    async fn tab_lookup_ignores_case() {
        let mut store = MemoryStore::default();
        for tab in ["DEV-41", "dev-42", "DEV-43"] {
            store.tabs.insert(tab.into(), sample_grid());
        }
        let store = Arc::new(store);
        let sync = ConfigSynchronizer::new(store.clone(), Orientation::Landscape);

        let cfg = sync.fetch_config(&id("DEV-42")).await.unwrap();
        assert_eq!(cfg.device_id.as_str(), "DEV-42");
        assert_eq!(store.reads.lock().unwrap().as_slice(), ["dev-42".to_string()]);
        assert!(sync.current().is_none());
    }

    #[tokio::test]
    async fn unknown_device_is_not_found() {
        let mut store = MemoryStore::default();
        store.tabs.insert("DEV-41".into(), sample_grid());
        let sync = ConfigSynchronizer::new(Arc::new(store), Orientation::Landscape);

        assert_eq!(
            sync.fetch_config(&id("DEV-4")).await,
            Err(ConfigFetchError::DeviceNotFound("DEV-4".into()))
        );
    }

    #[tokio::test]
    async fn second_request_is_rejected_while_fetch_in_flight() {
        let gate = Arc::new(Semaphore::new(0));
        let mut store = MemoryStore {
            gate: Some(gate.clone()),
            ..Default::default()
        };
        store.tabs.insert("lobby".into(), sample_grid());
        let sync = ConfigSynchronizer::new(Arc::new(store), Orientation::Landscape);
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert_eq!(sync.request_fetch(id("lobby"), tx.clone()), FetchTicket::Accepted);
        assert_eq!(sync.request_fetch(id("lobby"), tx.clone()), FetchTicket::Rejected);
        assert!(sync.is_fetching());

        gate.add_permits(1);
        let report = rx.recv().await.unwrap();
        assert!(report.result.is_ok());

        // The guard drops when the task ends, just after the report is sent.
        while sync.is_fetching() {
            tokio::task::yield_now().await;
        }
        gate.add_permits(1);
        assert_eq!(sync.request_fetch(id("lobby"), tx), FetchTicket::Accepted);
        assert!(rx.recv().await.unwrap().result.is_ok());
    }

    #[tokio::test]
    async fn commit_replaces_and_notifies() {
        let sync = ConfigSynchronizer::new(Arc::new(MemoryStore::default()), Orientation::Landscape);
        let mut rx = sync.subscribe();
        let cfg = parse_grid(&id("lobby"), Orientation::Landscape, &sample_grid()).unwrap();

        let first = sync.commit(cfg.clone());
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_deref(), Some(&cfg));

        let mut next = cfg.clone();
        next.pages.truncate(1);
        sync.commit(next);
        assert_eq!(first.pages.len(), 3);
        assert_eq!(sync.current().unwrap().pages.len(), 1);
    }

    #[test]
    fn device_id_resolution_order() {
        let dir = tempdir().unwrap();
        let machine = dir.path().join("machine-id");
        std::fs::write(&machine, "0123abcd\n").unwrap();

        let overridden = DeviceSettings {
            device_id: Some(" Lobby-1 ".into()),
            ..Default::default()
        };
        assert_eq!(resolve_device_id_with(&overridden, &[&machine]).as_str(), "Lobby-1");

        let blank = DeviceSettings {
            device_id: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(resolve_device_id_with(&blank, &[&machine]).as_str(), "0123abcd");

        let missing = dir.path().join("nope");
        let derived = resolve_device_id_with(&DeviceSettings::default(), &[&missing]);
        assert!(derived.as_str().starts_with("dev-"));
    }
}
