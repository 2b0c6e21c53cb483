//! Chrome sessions driven over the DevTools protocol.

#[cfg(feature = "browser")]
use std::path::PathBuf;
#[cfg(feature = "browser")]
use std::sync::atomic::{AtomicUsize, Ordering};
#[cfg(feature = "browser")]
use std::time::{Duration, Instant};

use async_trait::async_trait;
#[cfg(feature = "browser")]
use serde_json::Value;
#[cfg(feature = "browser")]
use tokio::task::JoinHandle;
#[cfg(feature = "browser")]
use tracing::{debug, info, warn};

#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
#[cfg(feature = "browser")]
use chromiumoxide::{Browser, BrowserConfig, Page};
#[cfg(feature = "browser")]
use futures::StreamExt;

#[cfg(feature = "browser")]
use super::stealth::{STEALTH_ARGS, STEALTH_SCRIPTS};
#[cfg(feature = "browser")]
use super::{BrowserEngineType, Session};
use super::{BrowserEngineConfig, SessionError, SessionFactory};

#[cfg(feature = "browser")]
use crate::http_client::BROWSER_USER_AGENT;

/// JavaScript to wait for page ready state.
#[cfg(feature = "browser")]
const WAIT_FOR_READY_SCRIPT: &str = r#"
    new Promise((resolve) => {
        if (document.readyState === 'complete' || document.readyState === 'interactive') {
            resolve(document.readyState);
        } else {
            document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
            setTimeout(() => resolve('timeout'), 10000);
        }
    })
"#;

#[cfg(feature = "browser")]
fn page_error(e: impl std::fmt::Display) -> SessionError {
    SessionError::Page(e.to_string())
}

/// Spawn the CDP event loop for a browser connection.
#[cfg(feature = "browser")]
fn spawn_handler(mut handler: chromiumoxide::Handler) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    })
}

/// Creates Chrome sessions, launching a local browser or connecting to
/// remote DevTools endpoints round-robin.
#[cfg(feature = "browser")]
pub struct ChromiumFactory {
    config: BrowserEngineConfig,
    next_url: AtomicUsize,
}

#[cfg(feature = "browser")]
impl ChromiumFactory {
    /// Common Chrome executable paths to check.
    const CHROME_PATHS: &'static [&'static str] = &[
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];

    pub fn new(config: BrowserEngineConfig) -> Self {
        Self {
            config,
            next_url: AtomicUsize::new(0),
        }
    }

    fn find_chrome() -> Result<PathBuf, SessionError> {
        for path in Self::CHROME_PATHS {
            let p = std::path::Path::new(path);
            if p.exists() {
                debug!("Found Chrome at: {}", path);
                return Ok(p.to_path_buf());
            }
        }

        for cmd in [
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
        ] {
            if let Ok(path) = which::which(cmd) {
                debug!("Found Chrome in PATH: {}", path.display());
                return Ok(path);
            }
        }

        Err(SessionError::Create(
            "Chrome/Chromium not found. Install it or set BROWSER_URL to a remote DevTools endpoint"
                .to_string(),
        ))
    }

    async fn launch(&self) -> Result<(Browser, JoinHandle<()>), SessionError> {
        info!("Launching browser (headless={})", self.config.headless);

        let mut builder = BrowserConfig::builder().chrome_executable(Self::find_chrome()?);

        if !self.config.headless {
            builder = builder.with_head();
        }
        if let Some(ref proxy) = self.config.proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }
        if self.config.engine == BrowserEngineType::Stealth {
            for arg in STEALTH_ARGS {
                builder = builder.arg(*arg);
            }
        }
        for arg in &self.config.chrome_args {
            builder = builder.arg(arg);
        }

        let config = builder
            .build()
            .map_err(|e| SessionError::Create(format!("Failed to build browser config: {}", e)))?;

        let (browser, handler) = Browser::launch(config)
            .await
            .map_err(|e| SessionError::Create(format!("Failed to launch browser: {}", e)))?;

        Ok((browser, spawn_handler(handler)))
    }

    async fn connect(&self, url: &str) -> Result<(Browser, JoinHandle<()>), SessionError> {
        info!("Connecting to remote browser at {}", url);

        // The WebSocket URL comes from the /json/version endpoint
        let http_url = url
            .replace("ws://", "http://")
            .replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.timeout))
            .build()
            .map_err(|e| SessionError::Create(e.to_string()))?;
        let resp: serde_json::Value = client
            .get(&version_url)
            .send()
            .await
            .map_err(|e| SessionError::Create(format!("Failed to reach {}: {}", version_url, e)))?
            .json()
            .await
            .map_err(|e| SessionError::Create(format!("Bad browser version info: {}", e)))?;

        let ws_url = resp
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SessionError::Create("No webSocketDebuggerUrl in response".to_string()))?;

        let handler_config = chromiumoxide::handler::HandlerConfig {
            request_timeout: Duration::from_secs(self.config.timeout),
            ..Default::default()
        };

        let (browser, handler) = Browser::connect_with_config(ws_url, handler_config)
            .await
            .map_err(|e| SessionError::Create(format!("Failed to connect to {}: {}", ws_url, e)))?;

        Ok((browser, spawn_handler(handler)))
    }
}

#[cfg(feature = "browser")]
#[async_trait]
impl SessionFactory for ChromiumFactory {
    async fn create(&self) -> Result<Box<dyn Session>, SessionError> {
        let urls = self.config.all_urls();
        let remote = !urls.is_empty();
        let (mut browser, handler) = if remote {
            let idx = self.next_url.fetch_add(1, Ordering::Relaxed) % urls.len();
            self.connect(&urls[idx]).await?
        } else {
            self.launch().await?
        };

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                if !remote {
                    let _ = browser.close().await;
                }
                handler.abort();
                return Err(SessionError::Create(format!("Failed to open page: {}", e)));
            }
        };

        if let Err(e) = page
            .execute(SetUserAgentOverrideParams::new(
                BROWSER_USER_AGENT.to_string(),
            ))
            .await
        {
            warn!("Could not override user agent: {}", e);
        }

        Ok(Box::new(ChromiumSession {
            browser,
            page: Some(page),
            handler,
            config: self.config.clone(),
            remote,
            created_at: Instant::now(),
        }))
    }
}

/// One Chrome page with its browser connection.
#[cfg(feature = "browser")]
pub struct ChromiumSession {
    browser: Browser,
    page: Option<Page>,
    handler: JoinHandle<()>,
    config: BrowserEngineConfig,
    remote: bool,
    created_at: Instant,
}

#[cfg(feature = "browser")]
impl ChromiumSession {
    fn page(&self) -> Result<&Page, SessionError> {
        self.page.as_ref().ok_or(SessionError::Closed)
    }

    async fn wait_for_page_ready(&self, page: &Page) {
        let ready_timeout = Duration::from_secs(self.config.timeout);
        match tokio::time::timeout(
            ready_timeout,
            page.evaluate(WAIT_FOR_READY_SCRIPT.to_string()),
        )
        .await
        {
            Ok(Ok(result)) => {
                let state: String = result
                    .into_value()
                    .unwrap_or_else(|_| "unknown".to_string());
                debug!("Page ready state: {}", state);
            }
            Ok(Err(e)) => debug!("Could not check ready state: {}", e),
            Err(_) => warn!("Timeout waiting for page ready state"),
        }
    }

    async fn wait_for_selector(&self, page: &Page) {
        if let Some(ref selector) = self.config.wait_for_selector {
            let timeout = Duration::from_secs(self.config.timeout);
            match tokio::time::timeout(timeout, page.find_element(selector.as_str())).await {
                Ok(Ok(_)) => debug!("Selector {} found", selector),
                Ok(Err(e)) => warn!("Selector {} not found: {}", selector, e),
                Err(_) => warn!("Timeout waiting for selector {}", selector),
            }
        }
    }

    async fn apply_stealth(&self, page: &Page) {
        for script in STEALTH_SCRIPTS {
            if let Err(e) = page.evaluate(script.to_string()).await {
                debug!("Stealth script injection skipped: {}", e);
            }
        }
    }
}

#[cfg(feature = "browser")]
#[async_trait]
impl Session for ChromiumSession {
    async fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        let page = self.page()?;
        debug!("Navigating to {}", url);

        let nav_params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(|e| SessionError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        tokio::time::timeout(
            Duration::from_secs(self.config.timeout),
            page.execute(nav_params),
        )
        .await
        .map_err(|_| SessionError::Timeout {
            what: format!("navigating to {}", url),
            secs: self.config.timeout,
        })?
        .map_err(|e| SessionError::Navigation {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        self.wait_for_page_ready(page).await;
        if self.config.engine == BrowserEngineType::Stealth {
            self.apply_stealth(page).await;
        }
        self.wait_for_selector(page).await;
        Ok(())
    }

    async fn content(&mut self) -> Result<String, SessionError> {
        self.page()?.content().await.map_err(page_error)
    }

    async fn current_url(&mut self) -> Result<String, SessionError> {
        Ok(self
            .page()?
            .url()
            .await
            .map_err(page_error)?
            .unwrap_or_default())
    }

    async fn click(&mut self, selector: &str) -> Result<bool, SessionError> {
        let page = self.page()?;
        match page.find_element(selector).await {
            Ok(element) => {
                element.click().await.map_err(page_error)?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn evaluate(&mut self, script: &str) -> Result<Value, SessionError> {
        let result = self
            .page()?
            .evaluate(script.to_string())
            .await
            .map_err(page_error)?;
        Ok(result.into_value::<Value>().unwrap_or(Value::Null))
    }

    async fn probe(&mut self) -> bool {
        match self.page() {
            Ok(page) => page.evaluate("1 + 1".to_string()).await.is_ok(),
            Err(_) => false,
        }
    }

    fn created_at(&self) -> Instant {
        self.created_at
    }

    async fn close(&mut self) {
        if let Some(page) = self.page.take() {
            let _ = page.close().await;
        }
        if !self.remote {
            let _ = self.browser.close().await;
        }
        self.handler.abort();
    }
}

// Stub for when browser feature is disabled
#[cfg(not(feature = "browser"))]
pub struct ChromiumFactory {
    _config: BrowserEngineConfig,
}

#[cfg(not(feature = "browser"))]
impl ChromiumFactory {
    pub fn new(config: BrowserEngineConfig) -> Self {
        Self { _config: config }
    }
}

#[cfg(not(feature = "browser"))]
#[async_trait]
impl SessionFactory for ChromiumFactory {
    async fn create(&self) -> Result<Box<dyn super::Session>, SessionError> {
        Err(SessionError::NotCompiled)
    }
}
