//! Plumbing shared by the `signage_display` and `signage_launcher` binaries.

pub mod app;
