//! Configuration management for govharvest using the prefer crate.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::browser::BrowserEngineConfig;
use crate::catalog::PublishOptions;
use crate::crawler::CrawlConfig;
use crate::models::ListingQuery;

/// Default portal root.
pub const DEFAULT_PORTAL_URL: &str = "https://data.egov.kz";

/// Source portal settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    #[serde(default = "default_portal_url")]
    pub base_url: String,
    /// Key appended to data API links as `apiKey`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// User agent for direct HTTP requests ("impersonate" for a browser UA).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Timeout in seconds for meta JSON and data API requests.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    /// Delay between direct HTTP requests in milliseconds.
    #[serde(default)]
    pub request_delay_ms: u64,
    /// Listing status filter (1 = published).
    #[serde(default = "default_status_type")]
    pub status_type: u8,
    #[serde(default = "crate::models::default_sort")]
    pub sort: String,
}

fn default_portal_url() -> String {
    DEFAULT_PORTAL_URL.to_string()
}

fn default_request_timeout() -> u64 {
    20
}

fn default_status_type() -> u8 {
    1
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: default_portal_url(),
            api_key: None,
            user_agent: None,
            request_timeout: default_request_timeout(),
            request_delay_ms: 0,
            status_type: default_status_type(),
            sort: crate::models::default_sort(),
        }
    }
}

impl PortalConfig {
    /// First listing page for an agency with the configured filters.
    pub fn listing_query(&self, agency_id: &str) -> ListingQuery {
        let mut query = ListingQuery::for_agency(agency_id);
        query.status_type = self.status_type;
        query.sort = self.sort.clone();
        query
    }
}

/// Target CKAN catalog settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_url")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Timeout in seconds for action API calls.
    #[serde(default = "default_catalog_timeout")]
    pub timeout: u64,
    /// Timeout in seconds for resource uploads.
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout: u64,
    #[serde(default = "default_license")]
    pub license_id: String,
    /// Upload downloaded payloads instead of linking to the data URL.
    #[serde(default = "default_true")]
    pub upload_files: bool,
}

fn default_catalog_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_catalog_timeout() -> u64 {
    30
}

fn default_upload_timeout() -> u64 {
    60
}

fn default_license() -> String {
    "cc-by".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: default_catalog_url(),
            api_key: None,
            timeout: default_catalog_timeout(),
            upload_timeout: default_upload_timeout(),
            license_id: default_license(),
            upload_files: true,
        }
    }
}

impl CatalogConfig {
    pub fn publish_options(&self) -> PublishOptions {
        PublishOptions {
            license_id: self.license_id.clone(),
            upload_files: self.upload_files,
            ..PublishOptions::default()
        }
    }
}

/// Challenge solver service settings. No key means no solver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_solver_endpoint")]
    pub endpoint: String,
    /// Seconds between result polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    /// Give up on a challenge after this many seconds.
    #[serde(default = "default_max_wait")]
    pub max_wait: u64,
    /// Per-request HTTP timeout in seconds.
    #[serde(default = "default_solver_timeout")]
    pub timeout: u64,
}

fn default_solver_endpoint() -> String {
    "https://2captcha.com".to_string()
}

fn default_poll_interval() -> u64 {
    5
}

fn default_max_wait() -> u64 {
    120
}

fn default_solver_timeout() -> u64 {
    30
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_solver_endpoint(),
            poll_interval: default_poll_interval(),
            max_wait: default_max_wait(),
            timeout: default_solver_timeout(),
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Seconds between worker start-ups.
    #[serde(default = "default_stagger")]
    pub stagger_secs: u64,
    /// Upper bound in seconds for one agency's crawl (0 = none).
    #[serde(default)]
    pub unit_timeout: u64,
    /// Upper bound in seconds for publishing one record.
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout: u64,
}

fn default_workers() -> usize {
    3
}

fn default_stagger() -> u64 {
    2
}

fn default_publish_timeout() -> u64 {
    300
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            stagger_secs: default_stagger(),
            unit_timeout: 0,
            publish_timeout: default_publish_timeout(),
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub portal: PortalConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub browser: BrowserEngineConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Directory for records and downloaded payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    /// Agency reference files by category ("central", "local", "quasi").
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub agency_sources: BTreeMap<String, String>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    /// Automatically discovers govharvest config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("govharvest").await {
            Ok(pref_config) => {
                if let Some(path) = pref_config.source_path() {
                    match Self::load_from_path(path).await {
                        Ok(config) => config,
                        Err(e) => {
                            tracing::warn!("Ignoring config file {}: {}", path.display(), e);
                            Self::default_with_env()
                        }
                    }
                } else {
                    Self::default_with_env()
                }
            }
            Err(_) => Self::default_with_env(),
        }
    }

    /// Defaults plus environment overrides.
    pub fn default_with_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let mut config = Self::parse(&contents, ext)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config.with_env_overrides())
    }

    fn parse(contents: &str, ext: &str) -> Result<Self, String> {
        match ext {
            "toml" => toml::from_str(contents)
                .map_err(|e| format!("Failed to parse TOML config: {}", e)),
            "yaml" | "yml" => serde_yaml::from_str(contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e)),
            _ => serde_json::from_str(contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e)),
        }
    }

    /// Apply environment variable overrides.
    ///
    /// - `GOVHARVEST_CATALOG_URL` - target catalog root
    /// - `CKAN_API_TOKEN` - catalog API token
    /// - `CAPTCHA_API_KEY` - solver service key
    /// - `PORTAL_API_KEY` - key for the portal's data API
    /// - `BROWSER_URL`, `SOCKS_PROXY` - see [`BrowserEngineConfig::with_env_overrides`]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(val) = env_value("GOVHARVEST_CATALOG_URL") {
            self.catalog.base_url = val;
        }
        if let Some(val) = env_value("CKAN_API_TOKEN") {
            self.catalog.api_key = Some(val);
        }
        if let Some(val) = env_value("CAPTCHA_API_KEY") {
            self.solver.api_key = Some(val);
        }
        if let Some(val) = env_value("PORTAL_API_KEY") {
            self.portal.api_key = Some(val);
        }
        self.browser = self.browser.with_env_overrides();
        self
    }

    /// Get the base directory for resolving relative paths.
    /// Returns the config file's parent directory, or the working directory.
    pub fn base_dir(&self) -> PathBuf {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Resolve a path that may be relative to the config file.
    /// - Absolute paths are returned as-is
    /// - Paths starting with ~ are expanded
    /// - Relative paths are resolved relative to `base_dir`
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Output directory, defaulting to the platform data directory.
    pub fn output_dir(&self) -> PathBuf {
        match self.output_dir {
            Some(ref dir) => self.resolve_path(dir, &self.base_dir()),
            None => dirs::data_local_dir()
                .map(|d| d.join("govharvest"))
                .unwrap_or_else(|| PathBuf::from("govharvest-data")),
        }
    }

    /// Agency reference files with resolved paths, in category order.
    pub fn agency_source_paths(&self) -> Vec<(String, PathBuf)> {
        let base = self.base_dir();
        self.agency_sources
            .iter()
            .map(|(category, path)| (category.clone(), self.resolve_path(path, &base)))
            .collect()
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.portal.base_url, DEFAULT_PORTAL_URL);
        assert_eq!(config.catalog.timeout, 30);
        assert_eq!(config.pipeline.workers, 3);
        assert_eq!(config.solver.api_key, None);
        assert_eq!(config.crawl.max_attempts, 3);
    }

    #[test]
    fn parses_toml_sections() {
        let toml = r#"
            output_dir = "out"

            [catalog]
            base_url = "https://ckan.example"
            upload_files = false

            [pipeline]
            workers = 5

            [agency_sources]
            central = "refs/central.json"
        "#;
        let config = Config::parse(toml, "toml").unwrap();
        assert_eq!(config.catalog.base_url, "https://ckan.example");
        assert!(!config.catalog.upload_files);
        assert_eq!(config.catalog.upload_timeout, 60);
        assert_eq!(config.pipeline.workers, 5);
        assert_eq!(config.pipeline.stagger_secs, 2);
        assert_eq!(config.agency_sources.len(), 1);
        assert!(!config.catalog.publish_options().upload_files);
    }

    #[test]
    fn parses_yaml_and_json() {
        let yaml = "portal:\n  request_timeout: 15\n";
        assert_eq!(Config::parse(yaml, "yml").unwrap().portal.request_timeout, 15);

        let json = r#"{"solver": {"poll_interval": 1}}"#;
        let config = Config::parse(json, "json").unwrap();
        assert_eq!(config.solver.poll_interval, 1);
        assert_eq!(config.solver.max_wait, 120);
    }

    #[test]
    fn rejects_malformed_file() {
        assert!(Config::parse("[catalog", "toml").is_err());
    }

    #[test]
    fn relative_paths_resolve_against_config_dir() {
        let config = Config {
            output_dir: Some("data".to_string()),
            source_path: Some(PathBuf::from("/etc/govharvest/govharvest.toml")),
            ..Config::default()
        };
        assert_eq!(config.output_dir(), PathBuf::from("/etc/govharvest/data"));

        let abs = config.resolve_path("/srv/x", Path::new("/ignored"));
        assert_eq!(abs, PathBuf::from("/srv/x"));
    }

    #[test]
    fn listing_query_uses_portal_filters() {
        let portal = PortalConfig {
            sort: "nameAsc".to_string(),
            ..PortalConfig::default()
        };
        let query = portal.listing_query("77");
        assert_eq!(query.agency_id, "77");
        assert_eq!(query.sort, "nameAsc");
        assert_eq!(query.page, 1);
    }

    #[test]
    fn env_overrides_apply() {
        let _guard = ENV_MUTEX.lock().unwrap();
        std::env::set_var("GOVHARVEST_CATALOG_URL", "https://ckan.env");
        std::env::set_var("CAPTCHA_API_KEY", "solver-key");
        let config = Config::default_with_env();
        std::env::remove_var("GOVHARVEST_CATALOG_URL");
        std::env::remove_var("CAPTCHA_API_KEY");

        assert_eq!(config.catalog.base_url, "https://ckan.env");
        assert_eq!(config.solver.api_key.as_deref(), Some("solver-key"));
    }

    #[tokio::test]
    async fn load_from_path_records_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("govharvest.json");
        std::fs::write(&path, r#"{"output_dir": "records"}"#).unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        assert_eq!(config.source_path.as_deref(), Some(path.as_path()));
        assert_eq!(config.output_dir(), dir.path().join("records"));
    }
}
