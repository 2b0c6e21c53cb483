//! Plain HTTP client for JSON metadata and data API downloads.

mod response;
mod user_agent;

pub use response::HttpResponse;
pub use user_agent::{resolve_user_agent, BROWSER_USER_AGENT, USER_AGENT};

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Errors from direct HTTP fetches.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("Invalid JSON from {url}: {message}")]
    Json { url: String, message: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// HTTP client with a fixed timeout and politeness delay.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    request_delay: Duration,
}

impl HttpClient {
    pub fn new(timeout: Duration, request_delay: Duration) -> Result<Self, FetchError> {
        Self::with_user_agent(timeout, request_delay, None)
    }

    /// Client with a user agent resolved by [`resolve_user_agent`].
    pub fn with_user_agent(
        timeout: Duration,
        request_delay: Duration,
        user_agent_config: Option<&str>,
    ) -> Result<Self, FetchError> {
        let user_agent = resolve_user_agent(user_agent_config);
        let client = Client::builder()
            .user_agent(&user_agent)
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            request_delay,
        })
    }

    /// GET a URL, waiting the configured delay first.
    pub async fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }

        let response = self.client.get(url).send().await?;
        debug!("GET {} -> {}", url, response.status());
        Ok(HttpResponse::new(response))
    }

    /// GET a URL and parse a JSON body. Non-2xx statuses are errors.
    pub async fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        let response = self.get(url).await?;
        if !response.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status.as_u16(),
            });
        }
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| FetchError::Json {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}
