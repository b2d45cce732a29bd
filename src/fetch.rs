//! Part fetch primitive
//!
//! [`PartFetcher`] is the seam between the pipeline and the transport. [`HttpFetcher`]
//! is the reqwest-backed implementation used in production; tests substitute in-memory
//! fetchers.

use crate::error::{Error, FetchError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

/// Timeout for a single part request
const PART_FETCH_TIMEOUT_SECS: u64 = 60;

/// Headers carrying a rate-limit resume time, in lookup order
const RETRY_AFTER_HEADERS: [&str; 2] = ["retry-after", "x-ratelimit-retry-after"];

/// One fetchable location plus provider-specific headers
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchRequest {
    /// Location of the part
    pub url: String,
    /// Extra request headers (e.g. Referer)
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    /// Request without extra headers
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    /// Add a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Fetches the bytes of one part
#[async_trait]
pub trait PartFetcher: Send + Sync {
    /// Fetch the full body of `request`
    ///
    /// Rate limiting must be reported as [`FetchError::RateLimited`] so callers can back off.
    async fn fetch(&self, request: &FetchRequest) -> std::result::Result<Vec<u8>, FetchError>;
}

/// HTTP implementation of [`PartFetcher`]
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher with the default timeout and user agent
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PART_FETCH_TIMEOUT_SECS))
            .user_agent(concat!("content-dl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Wrap an existing client (shared connection pool, custom proxy, ...)
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PartFetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> std::result::Result<Vec<u8>, FetchError> {
        let mut builder = self.client.get(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Transport(format!("timeout fetching {}", request.url))
            } else {
                FetchError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = RETRY_AFTER_HEADERS.iter().find_map(|name| {
                response
                    .headers()
                    .get(*name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            });
            return Err(FetchError::RateLimited { retry_after });
        }

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: request.url.clone(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(format!("failed to read body: {}", e)))?;
        Ok(body.to_vec())
    }
}
