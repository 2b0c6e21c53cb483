//! Command-line interface.

mod commands;
mod helpers;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "govharvest")]
#[command(about = "Harvest open-data portal listings into a CKAN catalog")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output directory for records and data files (overrides config)
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl agency listings into the record store
    Crawl {
        /// Agency ids to crawl (default: every agency in the reference files)
        #[arg(short, long = "agency")]
        agencies: Vec<String>,
        /// Restrict to one agency category (central, local, quasi)
        #[arg(long)]
        category: Option<String>,
        /// Stop after this many listing pages per agency
        #[arg(long)]
        max_pages: Option<u32>,
        /// Number of concurrent workers
        #[arg(short, long)]
        workers: Option<usize>,
        /// Do not download data payloads
        #[arg(long)]
        no_data: bool,
    },

    /// Publish stored records to the catalog
    Publish {
        /// Agency ids to publish (default: every agency in the store)
        #[arg(short, long = "agency")]
        agencies: Vec<String>,
        /// Publish into an in-memory catalog and report what would happen
        #[arg(long)]
        dry_run: bool,
        /// Link resources to the data URL instead of uploading files
        #[arg(long)]
        no_upload: bool,
        /// Number of concurrent workers
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Crawl and then publish, one unit per agency
    Run {
        #[arg(short, long = "agency")]
        agencies: Vec<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        max_pages: Option<u32>,
        #[arg(short, long)]
        workers: Option<usize>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        no_upload: bool,
    },

    /// Purge every dataset of a catalog organization
    PurgeOrg {
        /// Organization name, title or slug
        name: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// List agencies from the reference files
    Agencies {
        #[arg(long)]
        category: Option<String>,
    },
}

/// Parse arguments, load configuration and dispatch.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => Config::load_from_path(path)
            .await
            .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?,
        None => Config::load().await,
    };
    if let Some(ref output) = cli.output {
        config.output_dir = Some(output.to_string_lossy().into_owned());
    }

    match cli.command {
        Commands::Crawl {
            agencies,
            category,
            max_pages,
            workers,
            no_data,
        } => {
            let selection = commands::Selection {
                agencies,
                category,
                max_pages,
                workers,
            };
            commands::crawl::cmd_crawl(config, selection, !no_data).await
        }
        Commands::Publish {
            agencies,
            dry_run,
            no_upload,
            workers,
        } => {
            let options = commands::PublishFlags { dry_run, no_upload };
            commands::publish::cmd_publish(config, agencies, workers, options).await
        }
        Commands::Run {
            agencies,
            category,
            max_pages,
            workers,
            dry_run,
            no_upload,
        } => {
            let selection = commands::Selection {
                agencies,
                category,
                max_pages,
                workers,
            };
            let options = commands::PublishFlags { dry_run, no_upload };
            commands::run::cmd_run(config, selection, options).await
        }
        Commands::PurgeOrg { name, yes } => commands::purge::cmd_purge_org(config, &name, yes).await,
        Commands::Agencies { category } => {
            commands::agencies::cmd_agencies(config, category.as_deref()).await
        }
    }
}
