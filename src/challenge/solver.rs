//! Challenge-solver oracle client (2captcha-compatible API).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::SolverConfig;

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Solver rejected the request: {0}")]
    Rejected(String),

    #[error("No solution after {secs}s")]
    Timeout { secs: u64 },

    #[error("Unexpected solver response: {0}")]
    Unexpected(String),
}

/// Produces a response token for a token-widget challenge.
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    async fn solve(&self, site_key: &str, page_url: &str) -> Result<String, SolverError>;
}

/// Result of one poll for a submitted task.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PollStatus {
    Pending,
    Ready(String),
}

/// `OK|<task id>` on success.
pub(crate) fn parse_submit_response(body: &str) -> Result<String, SolverError> {
    let body = body.trim();
    match body.strip_prefix("OK|") {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(SolverError::Rejected(body.to_string())),
    }
}

/// `CAPCHA_NOT_READY` while pending, `OK|<token>` when solved, `ERROR_*` on failure.
pub(crate) fn parse_poll_response(body: &str) -> Result<PollStatus, SolverError> {
    let body = body.trim();
    if body == "CAPCHA_NOT_READY" {
        return Ok(PollStatus::Pending);
    }
    if let Some(token) = body.strip_prefix("OK|") {
        return Ok(PollStatus::Ready(token.to_string()));
    }
    if body.starts_with("ERROR") {
        return Err(SolverError::Rejected(body.to_string()));
    }
    Err(SolverError::Unexpected(body.to_string()))
}

/// Client for the 2captcha `in.php` / `res.php` protocol.
pub struct TwoCaptchaSolver {
    client: Client,
    api_key: String,
    endpoint: String,
    poll_interval: Duration,
    max_wait: Duration,
}

impl TwoCaptchaSolver {
    pub fn new(api_key: &str, config: &SolverConfig) -> Result<Self, SolverError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            poll_interval: Duration::from_secs(config.poll_interval),
            max_wait: Duration::from_secs(config.max_wait),
        })
    }

    /// Solver for the configured key, if one is set.
    pub fn from_config(config: &SolverConfig) -> Result<Option<Self>, SolverError> {
        match config.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => Ok(Some(Self::new(key, config)?)),
            None => Ok(None),
        }
    }

    async fn submit(&self, site_key: &str, page_url: &str) -> Result<String, SolverError> {
        let body = self
            .client
            .get(format!("{}/in.php", self.endpoint))
            .query(&[
                ("key", self.api_key.as_str()),
                ("method", "userrecaptcha"),
                ("googlekey", site_key),
                ("pageurl", page_url),
            ])
            .send()
            .await?
            .text()
            .await?;
        parse_submit_response(&body)
    }

    async fn poll(&self, task_id: &str) -> Result<PollStatus, SolverError> {
        let body = self
            .client
            .get(format!("{}/res.php", self.endpoint))
            .query(&[
                ("key", self.api_key.as_str()),
                ("action", "get"),
                ("id", task_id),
            ])
            .send()
            .await?
            .text()
            .await?;
        parse_poll_response(&body)
    }
}

#[async_trait]
impl CaptchaSolver for TwoCaptchaSolver {
    async fn solve(&self, site_key: &str, page_url: &str) -> Result<String, SolverError> {
        let task_id = self.submit(site_key, page_url).await?;
        info!("Submitted challenge to solver (task {})", task_id);

        let deadline = Instant::now() + self.max_wait;
        loop {
            tokio::time::sleep(self.poll_interval).await;
            match self.poll(&task_id).await? {
                PollStatus::Ready(token) => return Ok(token),
                PollStatus::Pending => debug!("Task {} not ready", task_id),
            }
            if Instant::now() >= deadline {
                return Err(SolverError::Timeout {
                    secs: self.max_wait.as_secs(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_response_yields_task_id() {
        assert_eq!(parse_submit_response("OK|7312\n").unwrap(), "7312");
        assert!(matches!(
            parse_submit_response("ERROR_WRONG_USER_KEY"),
            Err(SolverError::Rejected(_))
        ));
        assert!(parse_submit_response("OK|").is_err());
    }

    #[test]
    fn poll_response_states() {
        assert_eq!(
            parse_poll_response("CAPCHA_NOT_READY").unwrap(),
            PollStatus::Pending
        );
        assert_eq!(
            parse_poll_response("OK|03AGdBq2").unwrap(),
            PollStatus::Ready("03AGdBq2".to_string())
        );
        assert!(matches!(
            parse_poll_response("ERROR_CAPTCHA_UNSOLVABLE"),
            Err(SolverError::Rejected(_))
        ));
        assert!(matches!(
            parse_poll_response("<html>"),
            Err(SolverError::Unexpected(_))
        ));
    }

    #[test]
    fn no_key_means_no_solver() {
        let config = SolverConfig::default();
        assert!(TwoCaptchaSolver::from_config(&config).unwrap().is_none());
    }
}
