//! # Store HTTP Client
//!
//! `ApiClient` talks to the configuration store. Transient failures are retried
//! with exponential backoff by `reqwest-retry`; anything the store answers with,
//! success or not, comes back as an `ApiResponse` so the caller can map HTTP
//! statuses onto its own error type.

use std::time::Duration;

use anyhow::{anyhow, Context};
use reqwest::header::HeaderMap;
use reqwest::Url;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;

/// Upper bound for a single request, retries included per attempt.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

const MAX_RETRIES: u32 = 3;

/// One answered request.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// Decoded body of a 2xx answer.
    pub data: Option<T>,
    /// Raw body of a non-2xx answer, kept for the error message.
    pub error_body: Option<String>,
    pub status: u16,
    pub success: bool,
    pub headers: HeaderMap,
}

/// HTTP client bound to one store base URL and an optional API key.
pub struct ApiClient {
    inner: ClientWithMiddleware,
    base_url: Url,
    /// Sent as the `key` query parameter.
    api_key: Option<String>,
}

impl ApiClient {
    /// Creates a new `ApiClient` with the default timeout and a retry policy.
    ///
    /// # Errors
    /// Fails if `base_url` is not an absolute URL that can carry path segments.
    pub fn new(base_url: &str, api_key: Option<String>) -> anyhow::Result<Self> {
        Self::with_timeout(base_url, api_key, DEFAULT_TIMEOUT)
    }

    /// Creates a new `ApiClient` with an explicit per-request timeout.
    pub fn with_timeout(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let url = Url::parse(base_url).with_context(|| format!("Invalid base URL: {base_url}"))?;
        if url.cannot_be_a_base() {
            return Err(anyhow!("Base URL cannot carry path segments: {base_url}"));
        }

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(MAX_RETRIES);

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("lib_signage/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        let client = ClientBuilder::new(http)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            inner: client,
            base_url: url,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    /// Builds an absolute URL from the base plus percent-encoded path segments.
    pub fn endpoint(&self, segments: &[&str]) -> anyhow::Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Base URL cannot carry path segments"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Performs a GET request and handles the response.
    ///
    /// Query pairs and the API key are appended to the endpoint URL. A non-2xx
    /// status is not an error: it is reported through `ApiResponse::success`.
    ///
    /// # Errors
    /// Returns an `anyhow::Error` if the URL cannot be built, the request fails at
    /// the transport level, or a 2xx body cannot be deserialized into `T`.
    pub async fn get<T>(&self, segments: &[&str], query: &[(&str, &str)]) -> anyhow::Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
    {
        let mut full_url = self.endpoint(segments)?;
        {
            let mut pairs = full_url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
            if let Some(key) = &self.api_key {
                pairs.append_pair("key", key);
            }
        }

        let response: reqwest::Response = self.inner.get(full_url).send().await?;
        let status = response.status();
        let resp_headers = response.headers().clone();

        if status.is_success() {
            let data = response.json::<T>().await?;
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
                success: true,
                headers: resp_headers,
            })
        } else {
            let error_text = response.text().await.ok();
            Ok(ApiResponse {
                data: None,
                error_body: error_text,
                status: status.as_u16(),
                success: false,
                headers: resp_headers,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_appends_encoded_segments() {
        let api = ApiClient::new("https://sheets.example.com/v4/", None).unwrap();
        let url = api.endpoint(&["spreadsheets", "abc", "values", "'Lobby 1'!A1:C200"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.example.com/v4/spreadsheets/abc/values/'Lobby%201'!A1:C200"
        );
    }

    #[test]
    fn endpoint_works_without_trailing_slash() {
        let api = ApiClient::new("http://127.0.0.1:9000", None).unwrap();
        let url = api.endpoint(&["spreadsheets", "abc"]).unwrap();
        assert_eq!(url.path(), "/spreadsheets/abc");
    }

    #[test]
    fn invalid_base_url_is_an_error() {
        assert!(ApiClient::new("not a url", None).is_err());
        assert!(ApiClient::new("mailto:ops@example.com", None).is_err());
    }
}
