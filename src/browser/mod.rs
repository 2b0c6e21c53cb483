//! Browsing sessions for the JS-rendered portal.
//!
//! A [`Session`] is one live page in a browser. Sessions are created by a
//! [`SessionFactory`] and handed out by the [`SessionPool`], which owns
//! their lifecycle. The Chromium implementation drives Chrome over CDP
//! with stealth evasions and is compiled behind the `browser` feature.

mod chromium;
mod config;
mod pool;
mod stealth;

pub use chromium::ChromiumFactory;
pub use config::{BrowserEngineConfig, BrowserEngineType};
pub use pool::{PoolStats, PooledSession, SessionPool};

use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors from session creation and page interaction.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to create browser session: {0}")]
    Create(String),

    #[error("Navigation failed for {url}: {message}")]
    Navigation { url: String, message: String },

    #[error("Timed out after {secs}s: {what}")]
    Timeout { what: String, secs: u64 },

    #[error("Page error: {0}")]
    Page(String),

    #[error("Session is closed")]
    Closed,

    #[error("Browser support not compiled. Rebuild with: cargo build --features browser")]
    NotCompiled,
}

impl SessionError {
    /// Errors after which the session should not be trusted.
    pub fn is_navigation(&self) -> bool {
        matches!(
            self,
            SessionError::Navigation { .. } | SessionError::Timeout { .. } | SessionError::Closed
        )
    }
}

/// One live browser page.
#[async_trait]
pub trait Session: Send {
    /// Load `url` and wait for the document to be ready.
    async fn navigate(&mut self, url: &str) -> Result<(), SessionError>;

    /// Current document HTML.
    async fn content(&mut self) -> Result<String, SessionError>;

    /// URL of the current document.
    async fn current_url(&mut self) -> Result<String, SessionError>;

    /// Click the first element matching `selector`. `Ok(false)` when
    /// nothing matches.
    async fn click(&mut self, selector: &str) -> Result<bool, SessionError>;

    /// Evaluate a script in the page and return its JSON value.
    async fn evaluate(&mut self, script: &str) -> Result<Value, SessionError>;

    /// Cheap liveness probe.
    async fn probe(&mut self) -> bool;

    /// When this session was created.
    fn created_at(&self) -> Instant;

    /// Tear the session down. Idempotent.
    async fn close(&mut self);
}

/// Creates new sessions for the pool.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn Session>, SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_navigation_failures_poison_a_session() {
        let navigation = SessionError::Navigation {
            url: "https://p".to_string(),
            message: "net::ERR_CONNECTION_RESET".to_string(),
        };
        assert!(navigation.is_navigation());
        assert!(SessionError::Closed.is_navigation());
        assert!(!SessionError::Page("undefined is not a function".to_string()).is_navigation());
        assert!(!SessionError::NotCompiled.is_navigation());
    }
}
