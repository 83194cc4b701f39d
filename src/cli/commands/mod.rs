//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod catalog;
mod init;
mod pipeline;
mod zones;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::cli::helpers::{parse_domain, parse_input, parse_zone};
use crate::config::{load_settings_with_options, LoadOptions};
use crate::models::Domain;
use crate::table::TableFormat;
use crate::zones::Zone;

#[derive(Parser)]
#[command(name = "harvest")]
#[command(about = "Staged data lake: raw -> cleaned -> served, plus a product catalog")]
#[command(version)]
pub struct Cli {
    /// Data directory (overrides config file and HARVEST_DATA_DIR)
    #[arg(long, short = 'd', global = true)]
    data: Option<PathBuf>,

    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

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
    /// Create the data directory, zones, catalog and warehouse
    Init,

    /// Run the pipeline: ingest, clean and load each domain
    Run {
        /// Domains to process (repeatable; default: all configured)
        #[arg(long = "domain", value_parser = parse_domain)]
        domains: Vec<Domain>,
        /// Drop every warehouse table and view first
        #[arg(long)]
        reset: bool,
        /// Raw input per domain as DOMAIN=PATH (repeatable)
        #[arg(long = "input", value_parser = parse_input)]
        inputs: Vec<(Domain, PathBuf)>,
        /// Skip the ingest step
        #[arg(long)]
        no_ingest: bool,
        /// Skip the clean step
        #[arg(long)]
        no_clean: bool,
        /// Skip the load step
        #[arg(long)]
        no_load: bool,
    },

    /// Write a local CSV or JSON export to the raw zone
    Ingest {
        #[arg(value_parser = parse_domain)]
        domain: Domain,
        file: PathBuf,
    },

    /// Clean the latest raw object of a domain
    Clean {
        #[arg(value_parser = parse_domain)]
        domain: Domain,
    },

    /// Load the latest cleaned snapshot of a domain into the warehouse
    Load {
        #[arg(value_parser = parse_domain)]
        domain: Domain,
    },

    /// Inspect the zone store
    Zones {
        #[command(subcommand)]
        command: ZonesCommands,
    },

    /// Product catalog
    Catalog {
        #[command(subcommand)]
        command: CatalogCommands,
    },
}

#[derive(Subcommand)]
enum ZonesCommands {
    /// List objects in a zone
    List {
        #[arg(value_parser = parse_zone)]
        zone: Zone,
        /// Key prefix (e.g. "books/")
        #[arg(default_value = "")]
        prefix: String,
    },
    /// Object counts and sizes per zone
    Stats,
}

#[derive(Subcommand)]
enum CatalogCommands {
    /// Upsert products from a CSV or JSON export
    Import { file: PathBuf },
    /// Global statistics
    Stats,
    /// Statistics per category
    Categories,
    /// Statistics per (category, subcategory)
    Groups {
        /// Restrict to one category
        #[arg(long)]
        category: Option<String>,
    },
    /// Price distribution over bucket boundaries
    Distribution {
        /// Comma-separated ascending boundaries (default from config)
        #[arg(long, value_delimiter = ',')]
        buckets: Option<Vec<f64>>,
    },
    /// Most expensive product of every category
    Expensive,
    /// Best rating for the price
    Value {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Prices shared by more than one product
    Duplicates,
    /// Price history of a product
    History {
        sku: String,
        /// Only the last N days
        #[arg(long)]
        days: Option<u32>,
    },
    /// Recent pipeline and ingestion runs
    Runs {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Query products
    Find {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        min_price: Option<f64>,
        #[arg(long)]
        max_price: Option<f64>,
        /// Case-insensitive title substring
        #[arg(long)]
        search: Option<String>,
        /// Sort keys, `-` for descending (e.g. -price,title)
        #[arg(long, value_delimiter = ',')]
        sort: Vec<String>,
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(long, default_value = "0")]
        skip: usize,
    },
    /// Export every product to the served zone
    Export {
        #[arg(long, default_value = "csv")]
        format: String,
    },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        data: cli.data,
    };
    let (settings, _config) =
        load_settings_with_options(options).await.map_err(anyhow::Error::msg)?;
    let json = cli.json;

    match cli.command {
        Commands::Init => init::cmd_init(&settings).await,
        Commands::Run {
            domains,
            reset,
            inputs,
            no_ingest,
            no_clean,
            no_load,
        } => {
            let plan = pipeline::RunOptions {
                domains,
                reset,
                inputs,
                ingest: !no_ingest,
                clean: !no_clean,
                load: !no_load,
            };
            pipeline::cmd_run(&settings, plan, json).await
        }
        Commands::Ingest { domain, file } => {
            pipeline::cmd_ingest(&settings, domain, &file, json).await
        }
        Commands::Clean { domain } => pipeline::cmd_clean(&settings, domain, json).await,
        Commands::Load { domain } => pipeline::cmd_load(&settings, domain, json).await,
        Commands::Zones { command } => match command {
            ZonesCommands::List { zone, prefix } => {
                zones::cmd_zones_list(&settings, zone, &prefix, json).await
            }
            ZonesCommands::Stats => zones::cmd_zones_stats(&settings, json).await,
        },
        Commands::Catalog { command } => match command {
            CatalogCommands::Import { file } => catalog::cmd_import(&settings, &file, json),
            CatalogCommands::Stats => catalog::cmd_stats(&settings, json),
            CatalogCommands::Categories => catalog::cmd_categories(&settings, json),
            CatalogCommands::Groups { category } => {
                catalog::cmd_groups(&settings, category.as_deref(), json)
            }
            CatalogCommands::Distribution { buckets } => {
                let buckets = buckets.unwrap_or_else(|| settings.price_buckets.clone());
                catalog::cmd_distribution(&settings, &buckets, json)
            }
            CatalogCommands::Expensive => catalog::cmd_expensive(&settings, json),
            CatalogCommands::Value { limit } => catalog::cmd_value(&settings, limit, json),
            CatalogCommands::Duplicates => catalog::cmd_duplicates(&settings, json),
            CatalogCommands::History { sku, days } => {
                catalog::cmd_history(&settings, &sku, days, json)
            }
            CatalogCommands::Runs { limit } => catalog::cmd_runs(&settings, limit, json),
            CatalogCommands::Find {
                category,
                min_price,
                max_price,
                search,
                sort,
                limit,
                skip,
            } => {
                let query = catalog::FindArgs {
                    category,
                    min_price,
                    max_price,
                    search,
                    sort,
                    limit,
                    skip,
                };
                catalog::cmd_find(&settings, query, json)
            }
            CatalogCommands::Export { format } => {
                let format: TableFormat = format
                    .parse()
                    .map_err(|_| anyhow::anyhow!("unknown export format '{}'", format))?;
                catalog::cmd_export(&settings, format, json).await
            }
        },
    }
}
