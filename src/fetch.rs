//! Data API payload downloads.
//!
//! Records link to the portal's data API. The payload is downloaded so the
//! publisher can upload it as a file resource instead of a bare link.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::config::PortalConfig;
use crate::http_client::{FetchError, HttpClient};
use crate::models::DatasetRecord;
use crate::store::{RecordStore, StoreError};

/// Hosts accepted for data links.
const ALLOWED_DOMAIN: &str = "egov.kz";

#[derive(Debug, Error)]
pub enum DataFetchError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of fetching one record's payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Saved(PathBuf),
    /// The API answered, but with nothing worth keeping.
    Empty(String),
    NoLink,
}

/// Rewrite a data link onto the portal host over https with our API key.
pub fn normalize_data_url(
    link: &str,
    portal_base: &str,
    api_key: Option<&str>,
) -> Result<String, FetchError> {
    let mut url = Url::parse(link.trim()).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", link, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(FetchError::InvalidUrl(format!("unsupported scheme in {}", link)));
    }
    let host = url.host_str().unwrap_or_default().to_string();
    if !(host == ALLOWED_DOMAIN || host.ends_with(&format!(".{}", ALLOWED_DOMAIN))) {
        return Err(FetchError::InvalidUrl(format!("unsupported domain {}", host)));
    }

    let portal = Url::parse(portal_base).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
    url.set_scheme("https")
        .map_err(|_| FetchError::InvalidUrl(link.to_string()))?;
    url.set_host(portal.host_str())
        .map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
    url.set_port(None)
        .map_err(|_| FetchError::InvalidUrl(link.to_string()))?;

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "apiKey")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    {
        let mut query = url.query_pairs_mut();
        query.clear();
        for (k, v) in &kept {
            query.append_pair(k, v);
        }
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            query.append_pair("apiKey", key);
        }
    }
    if url.query() == Some("") {
        url.set_query(None);
    }
    Ok(url.to_string())
}

/// Whether a decoded payload carries data.
pub fn has_content(data: &Value) -> bool {
    match data {
        Value::Null => false,
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => {
            let failed = map.contains_key("error")
                || map
                    .get("status")
                    .and_then(Value::as_str)
                    .map(|s| s != "success")
                    .unwrap_or(false);
            !failed && !map.is_empty()
        }
        _ => true,
    }
}

pub struct DataFetcher {
    client: HttpClient,
    store: RecordStore,
    portal_base: String,
    api_key: Option<String>,
}

impl DataFetcher {
    pub fn new(client: HttpClient, store: RecordStore, portal: &PortalConfig) -> Self {
        Self {
            client,
            store,
            portal_base: portal.base_url.clone(),
            api_key: portal.api_key.clone(),
        }
    }

    pub fn from_config(portal: &PortalConfig, store: RecordStore) -> Result<Self, FetchError> {
        let client = HttpClient::with_user_agent(
            Duration::from_secs(portal.request_timeout),
            Duration::from_millis(portal.request_delay_ms),
            portal.user_agent.as_deref(),
        )?;
        Ok(Self::new(client, store, portal))
    }

    /// Download the payload behind `record.data_link` and point
    /// `record.data_file` at it.
    pub async fn fetch(&self, record: &mut DatasetRecord) -> Result<FetchOutcome, DataFetchError> {
        let Some(ref link) = record.data_link else {
            return Ok(FetchOutcome::NoLink);
        };
        let url = normalize_data_url(link, &self.portal_base, self.api_key.as_deref())?;

        let response = self.client.get(&url).await?;
        if response.is_not_found() {
            debug!("No data behind {}", link);
            return Ok(FetchOutcome::Empty("404".to_string()));
        }
        if !response.is_success() {
            return Err(FetchError::Status {
                url: link.clone(),
                status: response.status.as_u16(),
            }
            .into());
        }

        let body = response.bytes().await.map_err(FetchError::from)?;
        let data: Value = match serde_json::from_slice(&body) {
            Ok(data) => data,
            Err(e) => {
                return Err(FetchError::Json {
                    url: link.clone(),
                    message: e.to_string(),
                }
                .into())
            }
        };
        if !has_content(&data) {
            return Ok(FetchOutcome::Empty("empty payload".to_string()));
        }

        let path = self
            .store
            .save_data(&record.agency_id, &record.file_stem(), body)
            .await?;
        record.data_file = Some(path.clone());
        Ok(FetchOutcome::Saved(path))
    }

    /// Like [`fetch`](Self::fetch) but only logs failures.
    pub async fn fetch_best_effort(&self, record: &mut DatasetRecord) -> FetchOutcome {
        match self.fetch(record).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Data download failed for '{}': {}", record.title, e);
                FetchOutcome::Empty(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn forces_https_portal_host_and_key() {
        let url = normalize_data_url(
            "http://www.data.egov.kz/api/v4/schools/v1?apiKey=old&source=x",
            "https://data.egov.kz",
            Some("k1"),
        )
        .unwrap();
        assert_eq!(
            url,
            "https://data.egov.kz/api/v4/schools/v1?source=x&apiKey=k1"
        );
    }

    #[test]
    fn rejects_foreign_domains() {
        let err = normalize_data_url("https://evil.example/api/v4/x", "https://data.egov.kz", None);
        assert!(matches!(err, Err(FetchError::InvalidUrl(_))));
        assert!(normalize_data_url("https://notegov.kz/x", "https://data.egov.kz", None).is_err());
        assert!(normalize_data_url("ftp://data.egov.kz/x", "https://data.egov.kz", None).is_err());
    }

    #[test]
    fn no_key_leaves_query_clean() {
        let url = normalize_data_url("https://data.egov.kz/api/v4/a/v1", "https://data.egov.kz", None)
            .unwrap();
        assert_eq!(url, "https://data.egov.kz/api/v4/a/v1");
    }

    #[test]
    fn payload_content_checks() {
        assert!(has_content(&json!([{"id": 1}])));
        assert!(!has_content(&json!([])));
        assert!(!has_content(&json!(null)));
        assert!(!has_content(&json!({"error": "Not authorized"})));
        assert!(!has_content(&json!({"status": "failed"})));
        assert!(has_content(&json!({"status": "success", "rows": []})));
    }

    #[tokio::test]
    async fn record_without_link_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let client = HttpClient::new(Duration::from_secs(1), Duration::ZERO).unwrap();
        let fetcher = DataFetcher::new(client, RecordStore::new(dir.path()), &PortalConfig::default());

        let mut record = DatasetRecord::new("https://data.egov.kz/datasets/view?index=a", "A1", "T");
        assert_eq!(fetcher.fetch(&mut record).await.unwrap(), FetchOutcome::NoLink);
        assert_eq!(record.data_file, None);
    }
}
