//! # lib_signage
//!
//! The self-healing display engine for unattended signage players. Modules are
//! gated by folder so that a binary only pulls in the stack it needs:
//!
//! - **`configs`**: the device configuration model and persisted device settings.
//! - **`retrieve`**: the retrying HTTP client and the remote tabular store client.
//! - **`sync`**: resolves the device identity and turns a store tab into a `DeviceConfig`.
//! - **`core`**: page rotation, the Normal/Error display state machine and the
//!   single control loop that owns them.
//! - **`health`**: the memory watchdog.
//! - **`startup`**: the idempotent launch primitive and the redundant triggers
//!   that keep the display process running.
//! - **`utils`**: host and process information.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

#[cfg(feature = "configs")]
pub mod configs;
#[cfg(feature = "display")]
pub mod core;
#[cfg(feature = "health")]
pub mod health;
#[cfg(feature = "retrieve")]
pub mod retrieve;
#[cfg(feature = "startup")]
pub mod startup;
#[cfg(feature = "display")]
pub mod sync;
#[cfg(feature = "utils")]
pub mod utils;
