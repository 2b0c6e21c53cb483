//! Crawl-then-publish command.

use std::sync::Arc;

use console::style;

use crate::config::Config;
use crate::pipeline::{Harvester, UnitMode};

use super::super::helpers;
use super::{print_summary, PublishFlags, Selection};

/// Crawl each agency and publish its records as one unit.
pub async fn cmd_run(config: Config, selection: Selection, flags: PublishFlags) -> anyhow::Result<()> {
    let references = Arc::new(helpers::load_references(&config).await?);
    let agencies = helpers::crawl_targets(&selection, &references);
    if agencies.is_empty() {
        println!(
            "{} No agencies to harvest. Pass --agency or configure agency_sources.",
            style("!").yellow()
        );
        return Ok(());
    }

    let store = helpers::record_store(&config);
    let publisher = helpers::build_publisher(&config, flags)?;
    let (pool, crawler) = helpers::build_crawler(&config, references, selection.max_pages)?;
    let fetcher = if flags.no_upload {
        None
    } else {
        Some(helpers::build_fetcher(&config, store.clone())?)
    };

    let mut harvester = Harvester::new(store, config.portal.clone())
        .with_crawler(pool.clone(), crawler)
        .with_publisher(publisher, helpers::publish_timeout(&config));
    if let Some(fetcher) = fetcher {
        harvester = harvester.with_fetcher(fetcher);
    }
    let harvester = Arc::new(harvester);

    println!(
        "{} Harvesting {} agencies into {}{}",
        style("→").cyan(),
        agencies.len(),
        config.catalog.base_url,
        if flags.dry_run { " (dry run)" } else { "" }
    );

    let pb = helpers::progress_bar(agencies.len());
    let summary = helpers::worker_pool(&config, selection.workers)
        .run(
            agencies,
            move |agency_id| {
                let harvester = harvester.clone();
                async move { harvester.run_unit(&agency_id, UnitMode::Run).await }
            },
            Some(pb.clone()),
        )
        .await;
    pb.finish_with_message("done");

    pool.close_all().await;
    print_summary(&summary, true, true);
    Ok(())
}
