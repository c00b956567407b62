//! # App
//!
//! - **`config`**: layered configuration (defaults, `signage.conf`, env, CLI).
//! - **`logger`**: console plus daily-rolling JSON file logging.
//! - **`surface`**: the render surface backed by a browser command.
//! - **`status_api`**: the local HTTP status and control endpoints.
//! - **`restart`**: the watchdog's hard-restart path through the launcher.

pub mod config;
pub mod logger;
pub mod restart;
pub mod status_api;
pub mod surface;
