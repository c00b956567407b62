//! The render surface is an external collaborator. The engine only ever asks it
//! to load a URL; the outcome comes back later as a `SurfaceEvent` posted through
//! a `SurfaceReporter`.

use thiserror::Error;

/// Why a page could not be rendered. Carried as a human-readable description.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct RenderError(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    LoadSucceeded { url: String },
    LoadFailed { url: String, error: RenderError },
}

impl SurfaceEvent {
    pub fn url(&self) -> &str {
        match self {
            SurfaceEvent::LoadSucceeded { url } | SurfaceEvent::LoadFailed { url, .. } => url,
        }
    }
}

/// A display surface driven by the control task.
///
/// Methods are called on the control task and must return promptly; any slow
/// work belongs on a spawned task that reports back through its reporter.
pub trait RenderSurface: Send + 'static {
    /// Starts loading `url`. Exactly one `SurfaceEvent` must eventually follow.
    fn load(&mut self, url: &str);

    /// Drops whatever caches the surface can rebuild. Called on memory pressure.
    fn reclaim_memory(&mut self) {}

    /// Releases the surface. No events may be reported afterwards.
    fn shutdown(&mut self) {}
}
