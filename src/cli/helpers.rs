//! Shared helper functions for CLI commands.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};

use crate::browser::{ChromiumFactory, SessionPool};
use crate::catalog::{CatalogApi, CkanClient, InMemoryCatalog, Publisher};
use crate::challenge::{CaptchaSolver, ChallengeHandler, TwoCaptchaSolver};
use crate::config::Config;
use crate::crawler::Crawler;
use crate::extract::{Extractor, MetaFetcher};
use crate::fetch::DataFetcher;
use crate::http_client::HttpClient;
use crate::pipeline::WorkerPool;
use crate::reference::ReferenceIndex;
use crate::store::RecordStore;

use super::commands::{PublishFlags, Selection};

/// Truncate a string to at most `max` characters, appending "..." if cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}

/// Progress bar for a batch of units.
pub fn progress_bar(total: usize) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}) {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

pub fn record_store(config: &Config) -> RecordStore {
    RecordStore::new(config.output_dir())
}

pub async fn load_references(config: &Config) -> anyhow::Result<ReferenceIndex> {
    ReferenceIndex::load(&config.agency_source_paths())
        .await
        .context("failed to load agency reference files")
}

/// Agency ids to crawl: explicit ids, else the reference index.
pub fn crawl_targets(selection: &Selection, references: &ReferenceIndex) -> Vec<String> {
    if !selection.agencies.is_empty() {
        return selection.agencies.clone();
    }
    references.agency_ids(selection.category.as_deref())
}

/// Crawl components: session pool plus a crawler wired to it.
pub fn build_crawler(
    config: &Config,
    references: Arc<ReferenceIndex>,
    max_pages: Option<u32>,
) -> anyhow::Result<(Arc<SessionPool>, Arc<Crawler>)> {
    let factory = Arc::new(ChromiumFactory::new(config.browser.clone()));
    let max_age = (config.browser.max_session_age > 0)
        .then(|| Duration::from_secs(config.browser.max_session_age));
    let pool = Arc::new(SessionPool::new(factory, config.browser.max_sessions).with_max_age(max_age));

    let configured = TwoCaptchaSolver::from_config(&config.solver)
        .context("failed to set up captcha solver")?;
    let solver: Option<Arc<dyn CaptchaSolver>> = match configured {
        Some(solver) => Some(Arc::new(solver)),
        None => {
            tracing::info!("No captcha solver key configured, challenges are clicked only");
            None
        }
    };
    let challenges = Arc::new(ChallengeHandler::new(solver));

    let meta_client = HttpClient::with_user_agent(
        Duration::from_secs(config.portal.request_timeout),
        Duration::from_millis(config.portal.request_delay_ms),
        config.portal.user_agent.as_deref(),
    )
    .context("failed to build metadata client")?;
    let meta: Arc<dyn MetaFetcher> = Arc::new(meta_client);
    let extractor = Arc::new(Extractor::new(challenges.clone(), references).with_meta_fetcher(meta));

    let mut crawl_config = config.crawl.clone();
    if max_pages.is_some() {
        crawl_config.max_pages = max_pages;
    }
    let crawler = Arc::new(Crawler::new(
        pool.clone(),
        challenges,
        extractor,
        crawl_config,
        &config.portal.base_url,
    ));
    Ok((pool, crawler))
}

pub fn build_fetcher(config: &Config, store: RecordStore) -> anyhow::Result<Arc<DataFetcher>> {
    let fetcher = DataFetcher::from_config(&config.portal, store)
        .context("failed to build data client")?;
    Ok(Arc::new(fetcher))
}

/// Publisher over the configured catalog, or an in-memory one for dry runs.
pub fn build_publisher(config: &Config, flags: PublishFlags) -> anyhow::Result<Arc<Publisher>> {
    let mut options = config.catalog.publish_options();
    if flags.no_upload {
        options.upload_files = false;
    }
    let api: Arc<dyn CatalogApi> = if flags.dry_run {
        Arc::new(InMemoryCatalog::new())
    } else {
        if config.catalog.api_key.is_none() {
            anyhow::bail!("no catalog API token configured (set CKAN_API_TOKEN or catalog.api_key)");
        }
        Arc::new(CkanClient::from_config(&config.catalog).context("failed to build catalog client")?)
    };
    Ok(Arc::new(Publisher::new(api, options)))
}

/// Worker pool from config, with an optional worker count override.
pub fn worker_pool(config: &Config, workers: Option<usize>) -> WorkerPool {
    let mut pipeline = config.pipeline.clone();
    if let Some(n) = workers {
        pipeline.workers = n;
    }
    WorkerPool::from_config(&pipeline)
}

pub fn publish_timeout(config: &Config) -> Duration {
    Duration::from_secs(config.pipeline.publish_timeout)
}
