//! siteseek CLI entry point

use clap::{Parser, Subcommand};
use siteseek::{
    commands::{
        cmd_index, cmd_index_page, cmd_init, cmd_search, cmd_stats, cmd_status,
        print_index_report, print_search_results, print_stats, print_status, IndexOptions,
        InitOptions,
    },
    config::Config,
    error::Result,
    meta::MetaDb,
    progress::LogWriterFactory,
    search::SearchQuery,
};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "siteseek")]
#[command(version, about = "Self-hosted site search: crawl, index and search websites", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, env = "SITESEEK_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize siteseek configuration and database
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Crawl and index the configured sites
    Index {
        /// Only index this site (root URL from the config)
        #[arg(long)]
        site: Option<String>,
    },

    /// Fetch and re-index a single page of a known site
    IndexPage {
        /// Page URL
        url: String,
    },

    /// Search the index
    Search {
        /// The search query
        query: String,

        /// Restrict results to one indexed site
        #[arg(long)]
        site: Option<String>,

        /// Number of results to skip
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show site indexing status
    Status {
        /// Only this site
        #[arg(long)]
        site: Option<String>,
    },

    /// Show index statistics
    Stats,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    if cli.log_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(LogWriterFactory))
            .with(filter)
            .init();
    }

    // Handle init command specially (doesn't need existing config)
    if let Commands::Init { force } = cli.command {
        return handle_init(cli.config, force).await;
    }

    // Load configuration
    let config = load_config(cli.config.as_deref())?;
    let db = MetaDb::connect(&config).await?;

    match cli.command {
        Commands::Init { .. } => unreachable!(),

        Commands::Index { site } => {
            let options = IndexOptions {
                site,
                show_progress: !cli.json && !cli.log_json,
            };
            let report = cmd_index(&config, &db, options).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_index_report(&report);
            }
        }

        Commands::IndexPage { url } => {
            let report = cmd_index_page(&config, &db, &url).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("✓ {} ({}, page #{})", report.url, report.outcome, report.page_id);
            }
        }

        Commands::Search {
            query,
            site,
            offset,
            limit,
        } => {
            let query = SearchQuery {
                text: query,
                site,
                offset,
                limit,
            };
            let response = cmd_search(&config, &db, &query).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_search_results(&query, &response);
            }
        }

        Commands::Status { site } => {
            let status = cmd_status(&config, &db, site.as_deref()).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }

        Commands::Stats => {
            let stats = cmd_stats(&config, &db).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(&stats);
            }
        }
    }

    Ok(())
}

async fn handle_init(config: Option<PathBuf>, force: bool) -> Result<()> {
    // A config path may name the file or the directory holding it
    let (base_dir, config_path) = match config {
        Some(path) if path.extension().is_some_and(|e| e == "toml") => {
            let base = path
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(Config::default_base_dir);
            (base, path)
        }
        Some(dir) => (dir.clone(), dir.join("config.toml")),
        None => {
            let base = Config::default_base_dir();
            (base.clone(), base.join("config.toml"))
        }
    };

    let config = cmd_init(InitOptions {
        base_dir,
        config_path,
        force,
    })
    .await?;

    println!("✓ siteseek initialized successfully");
    println!("  Config: {}", config.paths.config_file.display());
    println!("  Database: {}", config.paths.db_file.display());
    println!("\nNext steps:");
    println!("  1. Add [[sites]] entries to the config file");
    println!("  2. Index them: siteseek index");
    println!("  3. Search: siteseek search \"your words\"");

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config_path = path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_config_path);

    if !config_path.exists() {
        eprintln!(
            "Config file not found: {}\nRun 'siteseek init' first.",
            config_path.display()
        );
        std::process::exit(1);
    }

    Config::load(&config_path)
}
