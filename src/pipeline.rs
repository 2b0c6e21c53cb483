//! Per-agency units of work and the worker pool that runs them.
//!
//! A unit crawls one agency into the record store, publishes the stored
//! records, or both. Units run on a fixed number of workers pulling agency
//! ids from a shared queue. A failing or panicking unit is recorded in the
//! [`RunSummary`] and never stops the others.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use indicatif::ProgressBar;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::browser::SessionPool;
use crate::catalog::{CatalogError, PublishStats, Publisher};
use crate::config::{PipelineConfig, PortalConfig};
use crate::crawler::{CrawlReport, Crawler, RecordSink};
use crate::fetch::{DataFetcher, FetchOutcome};
use crate::models::DatasetRecord;
use crate::store::{RecordStore, StoreError};

/// What a unit does for its agency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitMode {
    Crawl,
    Publish,
    /// Crawl, then publish what was stored.
    Run,
}

/// Result of one successful unit.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UnitReport {
    pub crawl: Option<CrawlReport>,
    pub publish: Option<PublishStats>,
}

#[derive(Debug)]
pub struct UnitResult {
    pub agency_id: String,
    pub outcome: Result<UnitReport, String>,
}

/// Aggregate over all units of a run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub units: Vec<UnitResult>,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.units.iter().filter(|u| u.outcome.is_ok()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &str)> {
        self.units.iter().filter_map(|u| match u.outcome {
            Err(ref e) => Some((u.agency_id.as_str(), e.as_str())),
            Ok(_) => None,
        })
    }

    fn reports(&self) -> impl Iterator<Item = &UnitReport> {
        self.units.iter().filter_map(|u| u.outcome.as_ref().ok())
    }

    pub fn records(&self) -> usize {
        self.reports()
            .filter_map(|r| r.crawl.as_ref())
            .map(|c| c.records)
            .sum()
    }

    pub fn item_failures(&self) -> usize {
        self.reports()
            .filter_map(|r| r.crawl.as_ref())
            .map(|c| c.item_failures)
            .sum()
    }

    /// Agencies whose crawl gave up on a page.
    pub fn abandoned(&self) -> Vec<&str> {
        self.reports()
            .filter_map(|r| r.crawl.as_ref())
            .filter(|c| c.is_abandoned())
            .map(|c| c.agency_id.as_str())
            .collect()
    }

    pub fn publish_totals(&self) -> PublishStats {
        let mut totals = PublishStats::default();
        for stats in self.reports().filter_map(|r| r.publish.as_ref()) {
            totals.merge(stats);
        }
        totals
    }
}

/// Fixed-size pool of workers with staggered start-up.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: usize,
    stagger: Duration,
    unit_timeout: Option<Duration>,
}

impl WorkerPool {
    pub fn new(workers: usize, stagger: Duration) -> Self {
        Self {
            workers: workers.max(1),
            stagger,
            unit_timeout: None,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        let timeout = (config.unit_timeout > 0).then(|| Duration::from_secs(config.unit_timeout));
        Self::new(config.workers, Duration::from_secs(config.stagger_secs)).with_unit_timeout(timeout)
    }

    pub fn with_unit_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.unit_timeout = timeout;
        self
    }

    /// Run `work` once per unit id. Results come back in completion order.
    pub async fn run<F, Fut>(
        &self,
        units: Vec<String>,
        work: F,
        progress: Option<ProgressBar>,
    ) -> RunSummary
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<UnitReport>> + Send + 'static,
    {
        let total = units.len();
        let workers = self.workers.min(total.max(1));
        info!("Running {} unit(s) on {} worker(s)", total, workers);

        // Popped from the back, so reverse to keep the given order.
        let queue: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(units.into_iter().rev().collect()));
        let results: Arc<Mutex<Vec<UnitResult>>> = Arc::new(Mutex::new(Vec::with_capacity(total)));
        let completed = Arc::new(AtomicUsize::new(0));
        let work = Arc::new(work);

        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let queue = queue.clone();
            let results = results.clone();
            let completed = completed.clone();
            let work = work.clone();
            let progress = progress.clone();
            let delay = self.stagger * index as u32;
            let unit_timeout = self.unit_timeout;

            handles.push(tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                debug!("Worker {} started", index);

                loop {
                    let unit = { queue.lock().await.pop() };
                    let Some(agency_id) = unit else {
                        break;
                    };
                    if let Some(ref pb) = progress {
                        pb.set_message(agency_id.clone());
                    }

                    let outcome = run_unit((*work)(agency_id.clone()), unit_timeout).await;
                    if let Err(ref e) = outcome {
                        error!("[{}] Unit failed: {}", agency_id, e);
                    }
                    results.lock().await.push(UnitResult {
                        agency_id,
                        outcome,
                    });

                    completed.fetch_add(1, Ordering::Relaxed);
                    if let Some(ref pb) = progress {
                        pb.inc(1);
                    }
                }
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Worker stopped unexpectedly: {}", e);
            }
        }

        let units = std::mem::take(&mut *results.lock().await);
        info!(
            "Run finished: {}/{} unit(s) completed",
            completed.load(Ordering::Relaxed),
            total
        );
        RunSummary { units }
    }
}

/// Run one unit on its own task so a panic stays inside the unit.
async fn run_unit<Fut>(fut: Fut, timeout: Option<Duration>) -> Result<UnitReport, String>
where
    Fut: Future<Output = anyhow::Result<UnitReport>> + Send + 'static,
{
    let mut handle = tokio::spawn(fut);
    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                handle.abort();
                return Err(format!("timed out after {}s", limit.as_secs()));
            }
        },
        None => handle.await,
    };
    match joined {
        Ok(Ok(report)) => Ok(report),
        Ok(Err(e)) => Err(format!("{:#}", e)),
        Err(e) => Err(format!("unit task failed: {}", e)),
    }
}

/// Stores records as they are crawled, downloading their data first.
pub struct HarvestSink {
    store: RecordStore,
    fetcher: Option<Arc<DataFetcher>>,
}

impl HarvestSink {
    pub fn new(store: RecordStore, fetcher: Option<Arc<DataFetcher>>) -> Self {
        Self { store, fetcher }
    }
}

#[async_trait]
impl RecordSink for HarvestSink {
    async fn accept(&mut self, mut record: DatasetRecord) -> Result<(), StoreError> {
        if let Some(ref fetcher) = self.fetcher {
            if let FetchOutcome::Empty(reason) = fetcher.fetch_best_effort(&mut record).await {
                debug!("No data file for '{}': {}", record.title, reason);
            }
        }
        self.store.save(&record).await.map(|_| ())
    }
}

/// Components a unit needs. Crawl-only runs have no publisher and
/// publish-only runs have no crawler.
pub struct Harvester {
    store: RecordStore,
    portal: PortalConfig,
    crawling: Option<(Arc<SessionPool>, Arc<Crawler>)>,
    fetcher: Option<Arc<DataFetcher>>,
    publisher: Option<Arc<Publisher>>,
    publish_timeout: Duration,
}

impl Harvester {
    pub fn new(store: RecordStore, portal: PortalConfig) -> Self {
        Self {
            store,
            portal,
            crawling: None,
            fetcher: None,
            publisher: None,
            publish_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_crawler(mut self, pool: Arc<SessionPool>, crawler: Arc<Crawler>) -> Self {
        self.crawling = Some((pool, crawler));
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<DataFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<Publisher>, timeout: Duration) -> Self {
        self.publisher = Some(publisher);
        self.publish_timeout = timeout;
        self
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Crawl one agency into the store on a pooled session.
    pub async fn crawl_agency(&self, agency_id: &str) -> anyhow::Result<CrawlReport> {
        let (pool, crawler) = self
            .crawling
            .as_ref()
            .ok_or_else(|| anyhow!("crawling is not configured"))?;

        let mut session = pool
            .acquire()
            .await
            .with_context(|| format!("no browsing session for agency {}", agency_id))?;
        let mut sink = HarvestSink::new(self.store.clone(), self.fetcher.clone());
        let query = self.portal.listing_query(agency_id);

        let report = crawler.crawl(&mut session, &query, &mut sink).await;
        pool.release(session).await;
        Ok(report)
    }

    /// Publish every stored record of one agency.
    pub async fn publish_agency(&self, agency_id: &str) -> anyhow::Result<PublishStats> {
        let publisher = self
            .publisher
            .as_ref()
            .ok_or_else(|| anyhow!("publishing is not configured"))?;
        let records = self
            .store
            .load_agency(agency_id)
            .await
            .with_context(|| format!("failed to load records for agency {}", agency_id))?;

        let mut stats = PublishStats::default();
        for record in &records {
            if record.is_placeholder() {
                debug!("[{}] Not publishing placeholder for {}", agency_id, record.source_url);
                stats.placeholders += 1;
                continue;
            }
            let publishing = publisher.publish_record(record);
            let result = match tokio::time::timeout(self.publish_timeout, publishing).await {
                Ok(result) => result,
                Err(_) => Err(CatalogError::Other(format!(
                    "publishing timed out after {}s",
                    self.publish_timeout.as_secs()
                ))),
            };
            match result {
                Ok(ref report) => debug!(
                    "[{}] {} -> {:?}/{:?}",
                    agency_id, report.dataset_id, report.action, report.resource
                ),
                Err(ref e) => warn!("[{}] Failed to publish '{}': {}", agency_id, record.title, e),
            }
            stats.record(&result);
        }
        info!(
            "[{}] Published {} record(s): {} created, {} recreated, {} skipped, {} failed, {} placeholder(s) held back",
            agency_id,
            records.len() - stats.placeholders,
            stats.created,
            stats.recreated,
            stats.skipped,
            stats.failed,
            stats.placeholders
        );
        Ok(stats)
    }

    /// One unit of work for `agency_id`.
    pub async fn run_unit(&self, agency_id: &str, mode: UnitMode) -> anyhow::Result<UnitReport> {
        let mut report = UnitReport::default();
        if matches!(mode, UnitMode::Crawl | UnitMode::Run) {
            let crawl = self.crawl_agency(agency_id).await?;
            let abandoned = crawl.is_abandoned();
            report.crawl = Some(crawl);
            if abandoned && mode == UnitMode::Run {
                warn!("[{}] Crawl abandoned, publishing what was stored", agency_id);
            }
        }
        if matches!(mode, UnitMode::Publish | UnitMode::Run) {
            report.publish = Some(self.publish_agency(agency_id).await?);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("A{}", i)).collect()
    }

    #[tokio::test]
    async fn every_unit_runs_once() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let summary = WorkerPool::new(3, Duration::ZERO)
            .run(
                ids(7),
                move |id| {
                    let recorder = recorder.clone();
                    async move {
                        recorder.lock().unwrap().push(id);
                        Ok(UnitReport::default())
                    }
                },
                None,
            )
            .await;

        assert_eq!(summary.units.len(), 7);
        assert_eq!(summary.succeeded(), 7);
        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        let mut expected = ids(7);
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn failures_and_panics_stay_in_their_unit() {
        let summary = WorkerPool::new(2, Duration::ZERO)
            .run(
                ids(4),
                |id| async move {
                    match id.as_str() {
                        "A2" => Err(anyhow!("session creation failed")),
                        "A3" => panic!("extractor bug"),
                        _ => Ok(UnitReport::default()),
                    }
                },
                None,
            )
            .await;

        assert_eq!(summary.succeeded(), 2);
        let mut failed: Vec<&str> = summary.failed().map(|(id, _)| id).collect();
        failed.sort();
        assert_eq!(failed, vec!["A2", "A3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn workers_start_staggered() {
        let started = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorder = started.clone();
        let origin = tokio::time::Instant::now();

        WorkerPool::new(3, Duration::from_secs(2))
            .run(
                ids(3),
                move |_| {
                    let recorder = recorder.clone();
                    async move {
                        recorder.lock().unwrap().push(origin.elapsed().as_secs());
                        tokio::time::sleep(Duration::from_secs(10)).await;
                        Ok(UnitReport::default())
                    }
                },
                None,
            )
            .await;

        assert_eq!(*started.lock().unwrap(), vec![0, 2, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_units_time_out() {
        let summary = WorkerPool::new(1, Duration::ZERO)
            .with_unit_timeout(Some(Duration::from_secs(5)))
            .run(
                ids(1),
                |_| async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(UnitReport::default())
                },
                None,
            )
            .await;

        let failed: Vec<(&str, &str)> = summary.failed().collect();
        assert_eq!(failed, vec![("A1", "timed out after 5s")]);
    }
}
