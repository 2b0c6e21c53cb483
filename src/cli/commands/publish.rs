//! Publish command.

use std::sync::Arc;

use console::style;

use crate::config::Config;
use crate::pipeline::{Harvester, UnitMode};

use super::super::helpers;
use super::{print_summary, PublishFlags};

/// Publish stored records for the given agencies (or every stored agency).
pub async fn cmd_publish(
    config: Config,
    agencies: Vec<String>,
    workers: Option<usize>,
    flags: PublishFlags,
) -> anyhow::Result<()> {
    let store = helpers::record_store(&config);
    let agencies = if agencies.is_empty() {
        store.agencies().await?
    } else {
        agencies
    };
    if agencies.is_empty() {
        println!(
            "{} No stored records under {}. Run 'govharvest crawl' first.",
            style("!").yellow(),
            store.root().display()
        );
        return Ok(());
    }

    let publisher = helpers::build_publisher(&config, flags)?;
    let harvester = Arc::new(
        Harvester::new(store, config.portal.clone())
            .with_publisher(publisher, helpers::publish_timeout(&config)),
    );

    if flags.dry_run {
        println!(
            "{} Dry run: publishing {} agencies into an in-memory catalog",
            style("→").cyan(),
            agencies.len()
        );
    } else {
        println!(
            "{} Publishing {} agencies to {}",
            style("→").cyan(),
            agencies.len(),
            config.catalog.base_url
        );
    }

    let pb = helpers::progress_bar(agencies.len());
    let summary = helpers::worker_pool(&config, workers)
        .run(
            agencies,
            move |agency_id| {
                let harvester = harvester.clone();
                async move { harvester.run_unit(&agency_id, UnitMode::Publish).await }
            },
            Some(pb.clone()),
        )
        .await;
    pb.finish_with_message("done");

    print_summary(&summary, false, true);
    Ok(())
}
