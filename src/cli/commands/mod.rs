//! Command implementations.

pub mod agencies;
pub mod crawl;
pub mod publish;
pub mod purge;
pub mod run;

use console::style;

use crate::pipeline::RunSummary;

/// Which agencies a crawl touches.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub agencies: Vec<String>,
    pub category: Option<String>,
    pub max_pages: Option<u32>,
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PublishFlags {
    pub dry_run: bool,
    pub no_upload: bool,
}

/// Print the per-run summary shared by crawl, publish and run.
fn print_summary(summary: &RunSummary, crawled: bool, published: bool) {
    println!();
    println!(
        "{} {} of {} agencies completed",
        style("✓").green(),
        summary.succeeded(),
        summary.units.len()
    );

    if crawled {
        println!(
            "  {} records stored, {} items failed",
            summary.records(),
            summary.item_failures()
        );
        let abandoned = summary.abandoned();
        if !abandoned.is_empty() {
            println!(
                "{} Crawl abandoned for: {}",
                style("!").yellow(),
                abandoned.join(", ")
            );
        }
    }

    if published {
        let totals = summary.publish_totals();
        println!(
            "  Datasets: {} created, {} recreated, {} unchanged, {} failed",
            totals.created, totals.recreated, totals.skipped, totals.failed
        );
        println!(
            "  Resources: {} created, {} updated",
            totals.resources_created, totals.resources_updated
        );
    }

    for (agency_id, error) in summary.failed() {
        println!("{} {}: {}", style("✗").red(), agency_id, error);
    }
}
