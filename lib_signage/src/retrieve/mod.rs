//! # Data Retrieval Module
//!
//! Network access to the remote configuration store.
//!
//! - **`ky_http`**: a generic HTTP `ApiClient` built on `reqwest` and
//!   `reqwest-middleware`, with automatic retries and exponential backoff.
//! - **`sheets`**: the `TabularStore` abstraction and its spreadsheet-API
//!   implementation built on `ApiClient`.

/// Generic HTTP API client with retry middleware for resilient network requests.
pub mod ky_http;
/// Tab listing and cell-range reads against the remote store.
pub mod sheets;

pub use ky_http::{ApiClient, ApiResponse};
pub use sheets::{Grid, SheetsStore, StoreError, TabularStore};
