//! Crawl states and per-agency reports.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Position of the crawl state machine. The page number is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrawlState {
    FetchingPage(u32),
    ExtractingItems(u32),
    AdvancingPage(u32),
    /// Empty page or page cap reached.
    Done(u32),
    /// Retry budget exhausted for this page.
    Abandoned(u32),
}

impl CrawlState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CrawlState::Done(_) | CrawlState::Abandoned(_))
    }

    pub fn page(self) -> u32 {
        match self {
            CrawlState::FetchingPage(n)
            | CrawlState::ExtractingItems(n)
            | CrawlState::AdvancingPage(n)
            | CrawlState::Done(n)
            | CrawlState::Abandoned(n) => n,
        }
    }
}

/// Crawl tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Attempts per listing page before it is abandoned.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff after failed attempt `k` is `backoff_base^k` seconds.
    #[serde(default = "default_backoff_base")]
    pub backoff_base: u64,
    /// Pause between listing pages in milliseconds.
    #[serde(default = "default_page_delay")]
    pub page_delay_ms: u64,
    /// Pause between dataset pages in milliseconds.
    #[serde(default = "default_item_delay")]
    pub item_delay_ms: u64,
    /// Stop after this many listing pages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<u32>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    2
}

fn default_page_delay() -> u64 {
    1000
}

fn default_item_delay() -> u64 {
    500
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base: default_backoff_base(),
            page_delay_ms: default_page_delay(),
            item_delay_ms: default_item_delay(),
            max_pages: None,
        }
    }
}

impl CrawlConfig {
    /// Delay after the `attempt`-th failure (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.backoff_base.saturating_pow(attempt))
    }
}

/// Outcome of crawling one agency.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    pub agency_id: String,
    pub trace: Vec<CrawlState>,
    /// Listing pages fetched successfully.
    pub pages: u32,
    /// Records handed to the sink.
    pub records: usize,
    pub item_failures: usize,
    pub backoffs: Vec<Duration>,
    pub outcome: CrawlState,
}

impl CrawlReport {
    pub(crate) fn new(agency_id: &str, first_page: u32) -> Self {
        Self {
            agency_id: agency_id.to_string(),
            trace: Vec::new(),
            pages: 0,
            records: 0,
            item_failures: 0,
            backoffs: Vec::new(),
            outcome: CrawlState::FetchingPage(first_page),
        }
    }

    pub(crate) fn enter(&mut self, state: CrawlState) {
        self.trace.push(state);
        self.outcome = state;
    }

    pub fn is_done(&self) -> bool {
        matches!(self.outcome, CrawlState::Done(_))
    }

    pub fn is_abandoned(&self) -> bool {
        matches!(self.outcome, CrawlState::Abandoned(_))
    }
}
