//! Scripted browsing sessions for crawl tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use govharvest::browser::{Session, SessionError, SessionFactory};
use govharvest::crawler::RecordSink;
use govharvest::models::DatasetRecord;
use govharvest::store::StoreError;

pub const PORTAL: &str = "https://data.egov.kz";

pub const PAGE_ERROR: &str = "script error:";

/// Maps a URL to the HTML the portal serves for it, or a navigation error.
/// Errors starting with [`PAGE_ERROR`] surface as in-page script errors.
pub type Responder = Arc<dyn Fn(&str) -> Result<String, String> + Send + Sync>;

pub fn listing_html(indexes: &[&str]) -> String {
    let links: String = indexes
        .iter()
        .map(|i| format!(r#"<a href="/datasets/view?index={}">{}</a>"#, i, i))
        .collect();
    format!("<html><body><div class=\"list\">{}</div></body></html>", links)
}

pub fn dataset_html(index: &str) -> String {
    format!(
        r#"<html><body>
        <div id="versionName">Набор {index}</div>
        <div id="versionDescription">Описание набора {index}</div>
        <div id="versionKeywordsBlock">образование, {index}</div>
        <a href="/api/v4/{index}/v1">Данные</a>
        </body></html>"#
    )
}

/// Portal serving `pages` as listing pages 1..=n, then empty pages.
pub fn portal(pages: Vec<Vec<&'static str>>) -> Responder {
    Arc::new(move |url: &str| {
        if url.contains("/datasets/search") {
            let page: usize = url
                .rsplit("page=")
                .next()
                .and_then(|p| p.parse().ok())
                .unwrap_or(1);
            let indexes = pages.get(page - 1).cloned().unwrap_or_default();
            return Ok(listing_html(&indexes));
        }
        match url.split("index=").nth(1) {
            Some(index) => Ok(dataset_html(index)),
            None => Err(format!("unexpected url {}", url)),
        }
    })
}

pub struct ScriptedSession {
    responder: Responder,
    html: String,
    url: String,
    created: Instant,
    visits: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Session for ScriptedSession {
    async fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        self.visits.lock().unwrap().push(url.to_string());
        match (self.responder)(url) {
            Ok(html) => {
                self.html = html;
                self.url = url.to_string();
                Ok(())
            }
            Err(message) if message.starts_with(PAGE_ERROR) => Err(SessionError::Page(message)),
            Err(message) => Err(SessionError::Navigation {
                url: url.to_string(),
                message,
            }),
        }
    }

    async fn content(&mut self) -> Result<String, SessionError> {
        Ok(self.html.clone())
    }

    async fn current_url(&mut self) -> Result<String, SessionError> {
        Ok(self.url.clone())
    }

    async fn click(&mut self, _selector: &str) -> Result<bool, SessionError> {
        Ok(false)
    }

    async fn evaluate(&mut self, _script: &str) -> Result<Value, SessionError> {
        Ok(Value::Null)
    }

    async fn probe(&mut self) -> bool {
        true
    }

    fn created_at(&self) -> Instant {
        self.created
    }

    async fn close(&mut self) {}
}

pub struct ScriptedFactory {
    responder: Responder,
    pub created: AtomicUsize,
    pub visits: Arc<Mutex<Vec<String>>>,
}

impl ScriptedFactory {
    pub fn new(responder: Responder) -> Self {
        Self {
            responder,
            created: AtomicUsize::new(0),
            visits: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn visits(&self) -> Vec<String> {
        self.visits.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    async fn create(&self) -> Result<Box<dyn Session>, SessionError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            responder: self.responder.clone(),
            html: String::new(),
            url: String::new(),
            created: Instant::now(),
            visits: self.visits.clone(),
        }))
    }
}

/// Collects records in memory.
#[derive(Default)]
pub struct VecSink {
    pub records: Vec<DatasetRecord>,
}

#[async_trait]
impl RecordSink for VecSink {
    async fn accept(&mut self, record: DatasetRecord) -> Result<(), StoreError> {
        self.records.push(record);
        Ok(())
    }
}
