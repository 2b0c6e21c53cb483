//! Crawl command.

use std::sync::Arc;

use console::style;

use crate::config::Config;
use crate::pipeline::{Harvester, UnitMode};

use super::super::helpers;
use super::{print_summary, Selection};

/// Crawl agency listings into the record store.
pub async fn cmd_crawl(config: Config, selection: Selection, fetch_data: bool) -> anyhow::Result<()> {
    let references = Arc::new(helpers::load_references(&config).await?);
    let agencies = helpers::crawl_targets(&selection, &references);
    if agencies.is_empty() {
        println!(
            "{} No agencies to crawl. Pass --agency or configure agency_sources.",
            style("!").yellow()
        );
        return Ok(());
    }

    let store = helpers::record_store(&config);
    let (pool, crawler) = helpers::build_crawler(&config, references, selection.max_pages)?;
    let mut harvester = Harvester::new(store.clone(), config.portal.clone()).with_crawler(pool.clone(), crawler);
    if fetch_data {
        harvester = harvester.with_fetcher(helpers::build_fetcher(&config, store.clone())?);
    }

    println!(
        "{} Crawling {} agencies into {}",
        style("→").cyan(),
        agencies.len(),
        store.root().display()
    );

    let workers = helpers::worker_pool(&config, selection.workers);
    let pb = helpers::progress_bar(agencies.len());
    let harvester = Arc::new(harvester);
    let summary = workers
        .run(
            agencies,
            move |agency_id| {
                let harvester = harvester.clone();
                async move { harvester.run_unit(&agency_id, UnitMode::Crawl).await }
            },
            Some(pb.clone()),
        )
        .await;
    pb.finish_with_message("done");

    pool.close_all().await;
    print_summary(&summary, true, false);
    Ok(())
}
