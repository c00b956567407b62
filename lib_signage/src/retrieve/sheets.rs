//! # Remote Tabular Store
//!
//! The configuration store is a spreadsheet with one tab per device. Only two
//! read operations are needed: list the tab names, and read a bounded cell range
//! of one tab as a grid of strings.
//!
//! Responses are decoded leniently. A missing `sheets`, `properties`, `title` or
//! `values` field decodes to an empty default instead of failing the request.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::ky_http::ApiClient;

/// Errors produced while talking to the remote store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The request could not be sent or the body could not be decoded.
    #[error("Network error: {0}")]
    Network(String),

    /// The store answered with a non-success status.
    #[error("HTTP {status} from store: {body}")]
    Http { status: u16, body: String },
}

/// A 2-D grid of cell values, row-major.
pub type Grid = Vec<Vec<String>>;

/// Read access to a remote tabular store.
#[async_trait]
pub trait TabularStore: Send + Sync {
    /// Lists the names of every tab in the store.
    async fn list_tabs(&self) -> Result<Vec<String>, StoreError>;

    /// Reads `range` (A1 notation, e.g. `A1:C200`) from the tab named `tab`.
    async fn read_range(&self, tab: &str, range: &str) -> Result<Grid, StoreError>;
}

#[derive(Debug, Default, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetMeta>,
}

#[derive(Debug, Default, Deserialize)]
struct SheetMeta {
    #[serde(default)]
    properties: SheetProperties,
}

#[derive(Debug, Default, Deserialize)]
struct SheetProperties {
    #[serde(default)]
    title: String,
}

#[derive(Debug, Default, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// A store backed by a Sheets-v4 style HTTP API.
pub struct SheetsStore {
    client: ApiClient,
    spreadsheet_id: String,
}

impl SheetsStore {
    pub fn new(client: ApiClient, spreadsheet_id: impl Into<String>) -> Self {
        Self {
            client,
            spreadsheet_id: spreadsheet_id.into(),
        }
    }

    async fn get<T>(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<T, StoreError>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        let response = self
            .client
            .get::<T>(segments, query)
            .await
            .map_err(|e| StoreError::Network(format!("{e:#}")))?;

        if !response.success {
            return Err(StoreError::Http {
                status: response.status,
                body: response.error_body.unwrap_or_default(),
            });
        }
        Ok(response.data.unwrap_or_default())
    }
}

/// Quotes a tab name for A1 notation: `Lobby's` becomes `'Lobby''s'`.
pub fn quote_tab(tab: &str) -> String {
    format!("'{}'", tab.replace('\'', "''"))
}

fn cell_to_string(cell: &Value) -> String {
    match cell {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl TabularStore for SheetsStore {
    async fn list_tabs(&self) -> Result<Vec<String>, StoreError> {
        let meta: SpreadsheetMeta = self
            .get(
                &["spreadsheets", &self.spreadsheet_id],
                &[("fields", "sheets.properties.title")],
            )
            .await?;

        Ok(meta
            .sheets
            .into_iter()
            .map(|s| s.properties.title)
            .filter(|t| !t.is_empty())
            .collect())
    }

    async fn read_range(&self, tab: &str, range: &str) -> Result<Grid, StoreError> {
        let a1 = format!("{}!{}", quote_tab(tab), range);
        let body: ValueRange = self
            .get(&["spreadsheets", &self.spreadsheet_id, "values", &a1], &[])
            .await?;

        Ok(body
            .values
            .iter()
            .map(|row| row.iter().map(cell_to_string).collect())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, path_regex, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store_for(server: &MockServer) -> SheetsStore {
        let client = ApiClient::new(&server.uri(), Some("test-key".into())).unwrap();
        SheetsStore::new(client, "sheet-1")
    }

    #[test]
    fn tab_names_are_quoted_for_a1_notation() {
        assert_eq!(quote_tab("Lobby"), "'Lobby'");
        assert_eq!(quote_tab("Bob's"), "'Bob''s'");
    }

    #[tokio::test]
    async fn lists_tabs_with_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/spreadsheets/sheet-1"))
            .and(query_param("key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sheets": [
                    {"properties": {"title": "DEV-41"}},
                    {"properties": {"title": "dev-42"}},
                    {"properties": {}},
                ]
            })))
            .mount(&server)
            .await;

        let tabs = store_for(&server).list_tabs().await.unwrap();
        assert_eq!(tabs, vec!["DEV-41".to_string(), "dev-42".to_string()]);
    }

    #[tokio::test]
    async fn missing_fields_degrade_to_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/spreadsheets/sheet-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/spreadsheets/sheet-1/values/.+$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"range": "x"})))
            .mount(&server)
            .await;

        let store = store_for(&server);
        assert!(store.list_tabs().await.unwrap().is_empty());
        assert!(store.read_range("dev-42", "A1:C200").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_range_stringifies_cells() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/spreadsheets/sheet-1/values/.*dev-42.*$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "values": [["Refresh", 15], ["ClearCache", true], [], [null, "x"]]
            })))
            .mount(&server)
            .await;

        let grid = store_for(&server).read_range("dev-42", "A1:C200").await.unwrap();
        assert_eq!(grid[0], vec!["Refresh".to_string(), "15".to_string()]);
        assert_eq!(grid[1][1], "true");
        assert!(grid[2].is_empty());
        assert_eq!(grid[3], vec![String::new(), "x".to_string()]);
    }

    #[tokio::test]
    async fn http_errors_carry_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("API key not valid"))
            .mount(&server)
            .await;

        match store_for(&server).list_tabs().await {
            Err(StoreError::Http { status, body }) => {
                assert_eq!(status, 403);
                assert!(body.contains("API key"));
            }
            other => panic!("expected HTTP error, got {other:?}"),
        }
    }
}
