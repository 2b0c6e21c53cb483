//! Paginated listing crawler.
//!
//! Walks an agency's listing one page at a time on a single session:
//! `FetchingPage(n) -> ExtractingItems(n) -> AdvancingPage(n)` until an
//! empty page (`Done`) or an exhausted retry budget (`Abandoned`).
//! Each listing page is retried with exponential backoff. A failing
//! dataset item is counted and stored as a placeholder record.

mod links;
mod state;

pub use links::{extract_references, transient_marker, REFERENCE_SELECTOR, TRANSIENT_MARKERS};
pub use state::{CrawlConfig, CrawlReport, CrawlState};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::browser::{PooledSession, SessionError, SessionPool};
use crate::challenge::ChallengeHandler;
use crate::extract::Extractor;
use crate::models::{DatasetRecord, ListingQuery};
use crate::store::StoreError;

/// Receives records as the crawler produces them.
#[async_trait]
pub trait RecordSink: Send {
    async fn accept(&mut self, record: DatasetRecord) -> Result<(), StoreError>;
}

/// Why one attempt at a listing page failed.
#[derive(Debug, Error)]
enum PageError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("transient failure marker '{0}' on page")]
    Transient(&'static str),
}

pub struct Crawler {
    pool: Arc<SessionPool>,
    challenges: Arc<ChallengeHandler>,
    extractor: Arc<Extractor>,
    config: CrawlConfig,
    base_url: String,
}

impl Crawler {
    pub fn new(
        pool: Arc<SessionPool>,
        challenges: Arc<ChallengeHandler>,
        extractor: Arc<Extractor>,
        config: CrawlConfig,
        base_url: &str,
    ) -> Self {
        Self {
            pool,
            challenges,
            extractor,
            config,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Crawl every listing page for `query`, starting at `query.page`.
    pub async fn crawl(
        &self,
        session: &mut PooledSession,
        query: &ListingQuery,
        sink: &mut dyn RecordSink,
    ) -> CrawlReport {
        let agency_id = query.agency_id.as_str();
        let mut report = CrawlReport::new(agency_id, query.page);
        let mut page = query.page;

        loop {
            report.enter(CrawlState::FetchingPage(page));
            let url = query.at_page(page).url(&self.base_url);

            let Some(html) = self.fetch_page(session, &url, &mut report).await else {
                warn!(
                    "[{}] Abandoning crawl at page {} after {} attempts",
                    agency_id, page, self.config.max_attempts
                );
                report.enter(CrawlState::Abandoned(page));
                break;
            };
            report.pages += 1;

            report.enter(CrawlState::ExtractingItems(page));
            let references = extract_references(&html, &self.base_url);
            if references.is_empty() {
                info!("[{}] Page {} is empty, crawl complete", agency_id, page);
                report.enter(CrawlState::Done(page));
                break;
            }
            debug!(
                "[{}] Page {}: {} dataset reference(s)",
                agency_id,
                page,
                references.len()
            );

            for reference in &references {
                let record = self.extractor.extract(&mut **session, reference, agency_id).await;
                let placeholder = record.is_placeholder();
                if placeholder {
                    warn!(
                        "[{}] Extraction failed for {}, storing a placeholder",
                        agency_id, reference.url
                    );
                    report.item_failures += 1;
                }
                let title = record.title.clone();
                match sink.accept(record).await {
                    Ok(()) if !placeholder => report.records += 1,
                    Ok(()) => {}
                    Err(e) => {
                        warn!("[{}] Could not store '{}': {}", agency_id, title, e);
                        if !placeholder {
                            report.item_failures += 1;
                        }
                    }
                }
                if placeholder {
                    self.recover(session).await;
                }
                pause(self.config.item_delay_ms).await;
            }

            report.enter(CrawlState::AdvancingPage(page));
            if let Some(max) = self.config.max_pages {
                if page + 1 - query.page >= max {
                    info!("[{}] Reached page limit ({})", agency_id, max);
                    report.enter(CrawlState::Done(page));
                    break;
                }
            }
            page += 1;
            pause(self.config.page_delay_ms).await;
        }

        info!(
            "[{}] Crawl finished in {:?}: {} page(s), {} record(s), {} item failure(s)",
            agency_id, report.outcome, report.pages, report.records, report.item_failures
        );
        report
    }

    /// Fetch a listing page within the retry budget. `None` once exhausted.
    async fn fetch_page(
        &self,
        session: &mut PooledSession,
        url: &str,
        report: &mut CrawlReport,
    ) -> Option<String> {
        for attempt in 1..=self.config.max_attempts {
            match self.attempt_page(session, url).await {
                Ok(html) => return Some(html),
                Err(e) => {
                    let delay = self.config.backoff(attempt);
                    warn!(
                        "Attempt {}/{} for {} failed: {}; retrying in {}s",
                        attempt,
                        self.config.max_attempts,
                        url,
                        e,
                        delay.as_secs()
                    );
                    report.backoffs.push(delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
        None
    }

    async fn attempt_page(
        &self,
        session: &mut PooledSession,
        url: &str,
    ) -> Result<String, PageError> {
        if !self.pool.is_alive(session).await {
            info!("Session is not responding, restarting");
            self.pool.restart(session).await?;
        }

        if let Err(e) = session.navigate(url).await {
            if e.is_navigation() {
                if let Err(restart) = self.pool.restart(session).await {
                    warn!("Session restart failed: {}", restart);
                }
            }
            return Err(e.into());
        }

        self.challenges.resolve_if_present(&mut **session).await;

        let html = session.content().await?;
        match transient_marker(&html) {
            Some(marker) => Err(PageError::Transient(marker)),
            None => Ok(html),
        }
    }

    /// Restart a session that stopped responding during item extraction.
    async fn recover(&self, session: &mut PooledSession) {
        if self.pool.is_alive(session).await {
            return;
        }
        if let Err(e) = self.pool.restart(session).await {
            warn!("Session restart failed: {}", e);
        }
    }
}

async fn pause(millis: u64) {
    if millis > 0 {
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }
}
