//! The `device001` rotation scenario driven end to end through the control
//! task: store → synchronizer → state machine → rotation → surface.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use lib_signage::configs::{DeviceId, Orientation};
use lib_signage::core::{
    control_channel, ControlHandle, ControllerSettings, DisplayController, Phase, RenderSurface,
    SurfaceReporter,
};
use lib_signage::retrieve::{Grid, StoreError, TabularStore};
use lib_signage::sync::ConfigSynchronizer;

struct DeviceTab {
    name: String,
    grid: Grid,
}

#[async_trait]
impl TabularStore for DeviceTab {
    async fn list_tabs(&self) -> Result<Vec<String>, StoreError> {
        Ok(vec!["device000".into(), self.name.clone()])
    }

    async fn read_range(&self, tab: &str, _range: &str) -> Result<Grid, StoreError> {
        assert_eq!(tab, self.name);
        Ok(self.grid.clone())
    }
}

type LoadLog = Arc<Mutex<Vec<(Duration, String)>>>;

struct TimedSurface {
    reporter: SurfaceReporter,
    started: Instant,
    loads: LoadLog,
}

impl RenderSurface for TimedSurface {
    fn load(&mut self, url: &str) {
        self.loads
            .lock()
            .unwrap()
            .push((self.started.elapsed(), url.to_string()));
        self.reporter.succeeded(url);
    }
}

fn device_grid(clear_cache: &str, pages: &[(&str, &str)]) -> Grid {
    let mut grid: Grid = vec![
        vec!["Refresh (min)".into(), "60".into()],
        vec!["Clear cache".into(), clear_cache.into()],
        vec![],
        vec![],
        vec!["URL".into(), "Seconds".into()],
    ];
    grid.extend(pages.iter().map(|(u, s)| vec![u.to_string(), s.to_string()]));
    grid
}

fn start(grid: Grid) -> (ControlHandle, LoadLog, CancellationToken, tokio::task::JoinHandle<()>) {
    let store = Arc::new(DeviceTab {
        name: "device001".into(),
        grid,
    });
    let sync = Arc::new(ConfigSynchronizer::new(store, Orientation::Landscape));
    let (handle, inbox) = control_channel(DeviceId::new("device001").unwrap());
    let loads: LoadLog = Arc::default();
    let surface = TimedSurface {
        reporter: handle.reporter(),
        started: Instant::now(),
        loads: loads.clone(),
    };
    let cancel = CancellationToken::new();
    let task = tokio::spawn(
        DisplayController::new(inbox, sync, surface, ControllerSettings::default()).run(cancel.clone()),
    );
    (handle, loads, cancel, task)
}

fn urls(loads: &LoadLog) -> Vec<String> {
    loads.lock().unwrap().iter().map(|(_, u)| u.clone()).collect()
}

#[tokio::test(start_paused = true)]
async fn device001_alternates_every_five_seconds() {
    let (handle, loads, cancel, task) = start(device_grid(
        "no",
        &[("https://a.example", "5"), ("https://b.example", "5")],
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(urls(&loads), ["https://a.example"]);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(urls(&loads), ["https://a.example", "https://b.example"]);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(
        urls(&loads),
        ["https://a.example", "https://b.example", "https://a.example"]
    );

    {
        let log = loads.lock().unwrap();
        let gap = log[1].0 - log[0].0;
        assert!(gap >= Duration::from_secs(5) && gap < Duration::from_secs(6), "gap was {gap:?}");
    }

    let status = handle.status();
    assert_eq!(status.device_id, "device001");
    assert_eq!(status.phase, Phase::Normal);
    assert_eq!(status.page_count, 2);

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn clear_cache_makes_every_emission_distinct() {
    let (_handle, loads, cancel, task) = start(device_grid(
        "yes",
        &[("https://a.example/board?zone=3", "5"), ("https://b.example", "5")],
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    let seen = urls(&loads);
    assert_eq!(seen.len(), 3);
    assert_ne!(seen[0], seen[2]);
    for url in [&seen[0], &seen[2]] {
        assert!(url.starts_with("https://a.example/board?zone=3&t="), "{url}");
    }

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn single_page_stays_put() {
    let (_handle, loads, cancel, task) = start(device_grid("no", &[("https://only.example", "5")]));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(urls(&loads), ["https://only.example"]);

    cancel.cancel();
    task.await.unwrap();
}
