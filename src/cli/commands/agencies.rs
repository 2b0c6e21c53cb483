//! Agency listing command.

use console::style;

use crate::config::Config;

use super::super::helpers::{self, truncate};

/// List agencies known from the reference files.
pub async fn cmd_agencies(config: Config, category: Option<&str>) -> anyhow::Result<()> {
    let references = helpers::load_references(&config).await?;
    if references.is_empty() {
        println!(
            "{} No agencies loaded. Configure agency_sources in govharvest.toml.",
            style("!").yellow()
        );
        return Ok(());
    }

    println!("\n{}", style("Agencies").bold());
    println!("{}", "-".repeat(72));
    println!("{:<12} {:<10} Name", "ID", "Category");
    println!("{}", "-".repeat(72));

    let mut count = 0;
    for agency in references.agencies(category) {
        println!(
            "{:<12} {:<10} {}",
            agency.id,
            agency.category,
            truncate(agency.name.as_deref().unwrap_or("-"), 48)
        );
        count += 1;
    }

    println!("{}", "-".repeat(72));
    println!(
        "{} agencies in {}",
        count,
        references.categories().join(", ")
    );
    Ok(())
}
