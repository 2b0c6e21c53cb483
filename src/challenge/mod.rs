//! Anti-bot challenge detection and resolution.
//!
//! The portal interrupts sessions with a reCAPTCHA checkbox, a token
//! widget, or a confirmation modal. [`ChallengeHandler`] looks for these
//! on the loaded page and works through them in place. It never fails:
//! problems are logged and the caller's retry logic decides what next.

mod solver;

pub use solver::{CaptchaSolver, SolverError, TwoCaptchaSolver};

use std::sync::Arc;
use std::time::Duration;

use scraper::{Html, Selector};
use tracing::{debug, info, warn};

use crate::browser::Session;

pub const CHECKBOX_SELECTOR: &str = ".recaptcha-checkbox-border";
const CHECKBOX_FRAME_SELECTOR: &str = "iframe[src*=\"recaptcha/api2/anchor\"]";
pub const WIDGET_SELECTOR: &str = ".g-recaptcha[data-sitekey]";
pub const SUBMIT_SELECTOR: &str = "button[type=\"submit\"]";

/// Submit buttons that only exist while a challenge modal is shown.
const MODAL_SUBMIT_SELECTORS: &[&str] = &[
    ".modal.show button[type=\"submit\"]",
    "#captcha-form button[type=\"submit\"]",
    "form[action*=\"captcha\"] button[type=\"submit\"]",
];

/// Challenge markers found on a page.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChallengeMarkers {
    pub checkbox: bool,
    pub site_key: Option<String>,
    pub modal_submit: Option<&'static str>,
}

impl ChallengeMarkers {
    /// Scan page HTML for challenge markers.
    pub fn detect(html: &str) -> Self {
        let document = Html::parse_document(html);
        let matches = |selector: &str| {
            Selector::parse(selector)
                .map(|s| document.select(&s).next().is_some())
                .unwrap_or(false)
        };

        let checkbox = matches(CHECKBOX_SELECTOR) || matches(CHECKBOX_FRAME_SELECTOR);

        let site_key = Selector::parse(WIDGET_SELECTOR).ok().and_then(|s| {
            document
                .select(&s)
                .filter_map(|el| el.value().attr("data-sitekey"))
                .map(|k| k.trim().to_string())
                .find(|k| !k.is_empty())
        });

        let modal_submit = MODAL_SUBMIT_SELECTORS
            .iter()
            .copied()
            .find(|selector| matches(selector));

        Self {
            checkbox,
            site_key,
            modal_submit,
        }
    }

    pub fn any(&self) -> bool {
        self.checkbox || self.site_key.is_some() || self.modal_submit.is_some()
    }
}

/// Script that places a solver token where the widget expects it.
fn token_injection_script(token: &str) -> String {
    let literal = serde_json::to_string(token).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        r#"(function(token) {{
    var field = document.getElementById('g-recaptcha-response');
    if (!field) {{
        field = document.createElement('textarea');
        field.id = 'g-recaptcha-response';
        field.name = 'g-recaptcha-response';
        (document.forms[0] || document.body).appendChild(field);
    }}
    field.style.display = 'block';
    field.value = token;
    field.innerHTML = token;
    return true;
}})({})"#,
        literal
    )
}

/// Detects and resolves challenges on the current page of a session.
pub struct ChallengeHandler {
    solver: Option<Arc<dyn CaptchaSolver>>,
    settle: Duration,
}

impl ChallengeHandler {
    pub fn new(solver: Option<Arc<dyn CaptchaSolver>>) -> Self {
        Self {
            solver,
            settle: Duration::from_secs(2),
        }
    }

    /// Pause after interacting with a challenge.
    pub fn with_settle_delay(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Resolve any challenge on the current page.
    ///
    /// Returns `true` when a challenge was present, whether or not it
    /// could be resolved, and `false` otherwise.
    pub async fn resolve_if_present(&self, session: &mut dyn Session) -> bool {
        let html = match session.content().await {
            Ok(html) => html,
            Err(e) => {
                warn!("Could not read page for challenge check: {}", e);
                return false;
            }
        };

        let markers = ChallengeMarkers::detect(&html);
        if !markers.any() {
            return false;
        }
        info!("Challenge detected: {:?}", markers);

        if markers.checkbox {
            match session.click(CHECKBOX_SELECTOR).await {
                Ok(true) => debug!("Clicked challenge checkbox"),
                Ok(false) => debug!("Challenge checkbox not clickable from top frame"),
                Err(e) => warn!("Checkbox click failed: {}", e),
            }
        }

        let mut token_injected = false;
        if let Some(ref site_key) = markers.site_key {
            token_injected = self.solve_and_inject(session, site_key).await;
        }

        if token_injected || markers.modal_submit.is_some() {
            let selector = markers.modal_submit.unwrap_or(SUBMIT_SELECTOR);
            match session.click(selector).await {
                Ok(true) => debug!("Submitted challenge form"),
                Ok(false) => warn!("No submit button found for challenge"),
                Err(e) => warn!("Challenge submit failed: {}", e),
            }
        }

        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }
        true
    }

    async fn solve_and_inject(&self, session: &mut dyn Session, site_key: &str) -> bool {
        let Some(ref solver) = self.solver else {
            warn!("Token challenge present but no solver is configured");
            return false;
        };

        let page_url = match session.current_url().await {
            Ok(url) => url,
            Err(e) => {
                warn!("Could not read page URL for solver: {}", e);
                return false;
            }
        };

        let token = match solver.solve(site_key, &page_url).await {
            Ok(token) => token,
            Err(e) => {
                warn!("Solver failed: {}", e);
                return false;
            }
        };

        match session.evaluate(&token_injection_script(&token)).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Token injection failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::SessionError;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::time::Instant;

    const WIDGET_PAGE: &str = r#"<html><body>
        <form><div class="g-recaptcha" data-sitekey="site-key-1"></div>
        <button type="submit">OK</button></form></body></html>"#;

    #[derive(Default)]
    struct PageStub {
        html: String,
        fail_content: bool,
        clicks: Vec<String>,
        scripts: Vec<String>,
    }

    #[async_trait]
    impl Session for PageStub {
        async fn navigate(&mut self, _url: &str) -> Result<(), SessionError> {
            Ok(())
        }
        async fn content(&mut self) -> Result<String, SessionError> {
            if self.fail_content {
                return Err(SessionError::Closed);
            }
            Ok(self.html.clone())
        }
        async fn current_url(&mut self) -> Result<String, SessionError> {
            Ok("https://portal/datasets/view?index=a".to_string())
        }
        async fn click(&mut self, selector: &str) -> Result<bool, SessionError> {
            self.clicks.push(selector.to_string());
            Ok(true)
        }
        async fn evaluate(&mut self, script: &str) -> Result<Value, SessionError> {
            self.scripts.push(script.to_string());
            Ok(Value::Bool(true))
        }
        async fn probe(&mut self) -> bool {
            true
        }
        fn created_at(&self) -> Instant {
            Instant::now()
        }
        async fn close(&mut self) {}
    }

    struct TokenSolver(Result<&'static str, &'static str>);

    #[async_trait]
    impl CaptchaSolver for TokenSolver {
        async fn solve(&self, site_key: &str, _page_url: &str) -> Result<String, SolverError> {
            assert_eq!(site_key, "site-key-1");
            self.0
                .map(str::to_string)
                .map_err(|e| SolverError::Rejected(e.to_string()))
        }
    }

    fn handler(solver: Option<TokenSolver>) -> ChallengeHandler {
        ChallengeHandler::new(solver.map(|s| Arc::new(s) as Arc<dyn CaptchaSolver>))
            .with_settle_delay(Duration::ZERO)
    }

    #[test]
    fn detects_markers() {
        let markers = ChallengeMarkers::detect(WIDGET_PAGE);
        assert_eq!(markers.site_key.as_deref(), Some("site-key-1"));
        assert!(!markers.checkbox);
        assert!(markers.any());

        let clean = ChallengeMarkers::detect("<html><body><h1>Datasets</h1></body></html>");
        assert!(!clean.any());

        let modal = ChallengeMarkers::detect(
            r#"<div class="modal show"><button type="submit">Да</button></div>"#,
        );
        assert!(modal.modal_submit.is_some());
    }

    #[tokio::test]
    async fn no_challenge_returns_false() {
        let mut page = PageStub {
            html: "<html><body>ok</body></html>".to_string(),
            ..Default::default()
        };
        assert!(!handler(None).resolve_if_present(&mut page).await);
        assert!(page.clicks.is_empty());
    }

    #[tokio::test]
    async fn token_is_injected_and_submitted() {
        let mut page = PageStub {
            html: WIDGET_PAGE.to_string(),
            ..Default::default()
        };
        let found = handler(Some(TokenSolver(Ok("tok-123"))))
            .resolve_if_present(&mut page)
            .await;

        assert!(found);
        assert_eq!(page.scripts.len(), 1);
        assert!(page.scripts[0].contains("\"tok-123\""));
        assert_eq!(page.clicks, vec![SUBMIT_SELECTOR.to_string()]);
    }

    #[tokio::test]
    async fn solver_failure_is_swallowed() {
        let mut page = PageStub {
            html: WIDGET_PAGE.to_string(),
            ..Default::default()
        };
        let found = handler(Some(TokenSolver(Err("ERROR_ZERO_BALANCE"))))
            .resolve_if_present(&mut page)
            .await;

        assert!(found);
        assert!(page.scripts.is_empty());
        assert!(page.clicks.is_empty());
    }

    #[tokio::test]
    async fn unreadable_page_returns_false() {
        let mut page = PageStub {
            fail_content: true,
            ..Default::default()
        };
        assert!(!handler(None).resolve_if_present(&mut page).await);
    }

    #[test]
    fn injection_script_escapes_token() {
        let script = token_injection_script("a'b\"c");
        assert!(script.contains(r#"("a'b\"c")"#));
    }
}
