//! Browser engine configuration types.

use serde::{Deserialize, Serialize};

/// Browser engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserEngineConfig {
    /// Browser engine type.
    #[serde(default)]
    pub engine: BrowserEngineType,

    /// Run in headless mode (default: true).
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Proxy server URL (e.g., "socks5://127.0.0.1:1080").
    #[serde(default)]
    pub proxy: Option<String>,

    /// Page load timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Wait for this CSS selector before considering page loaded.
    #[serde(default)]
    pub wait_for_selector: Option<String>,

    /// Additional Chrome arguments.
    #[serde(default)]
    pub chrome_args: Vec<String>,

    /// Remote Chrome DevTools URL (e.g., "ws://localhost:9222").
    /// If set, sessions connect to an existing browser instead of launching one.
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Several remote browsers; new sessions are spread round-robin.
    #[serde(default, alias = "remote_urls")]
    pub urls: Vec<String>,

    /// Upper bound on concurrently live sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Sessions older than this many seconds are replaced on acquire (0 = never).
    #[serde(default)]
    pub max_session_age: u64,
}

impl Default for BrowserEngineConfig {
    fn default() -> Self {
        Self {
            engine: BrowserEngineType::default(),
            headless: default_headless(),
            proxy: None,
            timeout: default_timeout(),
            wait_for_selector: None,
            chrome_args: Vec::new(),
            remote_url: None,
            urls: Vec::new(),
            max_sessions: default_max_sessions(),
            max_session_age: 0,
        }
    }
}

impl BrowserEngineConfig {
    /// Apply environment variable overrides.
    ///
    /// - `BROWSER_URL` - Remote Chrome DevTools URL(s), comma-separated for multiple
    /// - `SOCKS_PROXY` - SOCKS proxy for browser traffic (e.g., "socks5://127.0.0.1:9050")
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("BROWSER_URL") {
            if !val.is_empty() {
                if val.contains(',') {
                    self.urls = val
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect();
                    self.remote_url = None;
                } else {
                    self.remote_url = Some(val);
                }
            }
        }

        if self.proxy.is_none() {
            if let Ok(proxy) = std::env::var("SOCKS_PROXY") {
                if !proxy.is_empty() {
                    self.proxy = Some(proxy);
                }
            }
        }

        self
    }

    /// Get all remote browser URLs.
    /// Returns an empty Vec when sessions should launch a local browser.
    pub fn all_urls(&self) -> Vec<String> {
        if !self.urls.is_empty() {
            return self.urls.clone();
        }
        match self.remote_url {
            Some(ref url) => url
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => Vec::new(),
        }
    }
}

pub fn default_headless() -> bool {
    true
}

pub fn default_timeout() -> u64 {
    30
}

pub fn default_max_sessions() -> usize {
    3
}

/// Browser engine types.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum BrowserEngineType {
    /// chromiumoxide with stealth patches (default).
    #[default]
    Stealth,

    /// No stealth patches (for debugging).
    Standard,
}
