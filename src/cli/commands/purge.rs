//! Organization purge command.

use std::io::{self, Write};

use console::style;

use crate::catalog::CatalogError;
use crate::config::Config;

use super::super::helpers;
use super::PublishFlags;

/// Purge every dataset owned by a catalog organization.
pub async fn cmd_purge_org(config: Config, name: &str, confirm: bool) -> anyhow::Result<()> {
    let publisher = helpers::build_publisher(&config, PublishFlags::default())?;

    let Some(org) = publisher.find_organization(name).await? else {
        println!("{} Organization '{}' not found", style("✗").red(), name);
        return Ok(());
    };

    if !confirm {
        println!(
            "{} This permanently purges every dataset of '{}' ({}) from {}",
            style("!").yellow(),
            org.title,
            org.name,
            config.catalog.base_url
        );
        print!("\nProceed? [y/N] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    match publisher.purge_organization(&org.name).await {
        Ok(report) => {
            println!(
                "{} Purged {} of {} datasets from '{}'",
                style("✓").green(),
                report.purged,
                report.found,
                org.name
            );
            if report.failed > 0 {
                println!("{} {} datasets could not be purged", style("!").yellow(), report.failed);
            }
            Ok(())
        }
        Err(CatalogError::NotFound { .. }) => {
            println!("{} Organization '{}' not found", style("✗").red(), name);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
