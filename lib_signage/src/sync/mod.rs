//! # Configuration Synchronization
//!
//! Maps the device identity to a `DeviceConfig` held in the remote tabular
//! store, and owns the single in-memory copy of the current configuration.
//!
//! - **`synchronizer`**: device-id resolution, the two-phase tab lookup, the
//!   positional grid parser, the `ConfigCell` and the one-in-flight fetch guard.

pub mod synchronizer;

pub use synchronizer::{
    parse_grid, resolve_device_id, ConfigCell, ConfigFetchError, ConfigSynchronizer, FetchTicket,
    SyncReport, DEFAULT_PAGE_SECS, DEFAULT_SHEET_RANGE,
};
