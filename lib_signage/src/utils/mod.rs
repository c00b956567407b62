//! # Utilities Module
//!
//! General-purpose helpers that do not belong to a specific engine component.
//!
//! - **`misc`**: host and process information (`sys_info`), including the
//!   machine identifier sources used for device identity.

/// Miscellaneous utility functions, including system information.
pub mod misc;
