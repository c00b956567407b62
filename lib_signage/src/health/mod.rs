//! # Health Module
//!
//! The memory watchdog of the display process.
//!
//! - **`memory_guard`**: threshold accounting over the last memory sample.
//! - **`probe`**: the `MemoryProbe` seam and its `sysinfo` implementation.
//! - **`monitor`**: the periodic `HealthMonitor` that escalates from a GC hint
//!   to a display restart.

pub mod memory_guard;
pub mod monitor;
pub mod probe;

pub use memory_guard::MemoryGuard;
pub use monitor::{HealthMonitor, HealthSettings, HealthVerdict, Restarter};
pub use probe::{MemoryProbe, SysinfoProbe};
