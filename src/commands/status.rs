//! Status and stats command implementations

use crate::config::Config;
use crate::error::{Error, Result};
use crate::indexer::{SiteIndexer, Statistics};
use crate::lemma::LemmaExtractor;
use crate::meta::{IndexingRun, MetaDb, SiteStatus};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Status of one site
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteStatusInfo {
    pub url: String,
    pub name: String,
    /// `None` when the site is configured but was never indexed
    pub status: Option<SiteStatus>,
    pub status_time: Option<String>,
    pub last_error: Option<String>,
    pub configured: bool,
    pub last_run: Option<IndexingRun>,
}

/// Status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    pub config_path: String,
    pub db_path: String,
    pub sites: Vec<SiteStatusInfo>,
}

/// Get status of every configured or indexed site, or of one site
pub async fn cmd_status(config: &Config, db: &MetaDb, site: Option<&str>) -> Result<StatusInfo> {
    info!("Getting status");

    let mut entries: Vec<(String, String, bool)> = config
        .sites
        .iter()
        .map(|s| (s.url.clone(), s.name.clone(), true))
        .collect();
    for known in db.list_sites().await? {
        if config.find_site(&known.url).is_none() {
            entries.push((known.url, known.name, false));
        }
    }

    if let Some(wanted) = site {
        let wanted = wanted.trim_end_matches('/');
        entries.retain(|(url, _, _)| url.trim_end_matches('/') == wanted);
        if entries.is_empty() {
            return Err(Error::SiteNotFound(wanted.to_string()));
        }
    }

    let mut sites = Vec::with_capacity(entries.len());
    for (url, name, configured) in entries {
        let info = match db.get_site_by_url(&url).await? {
            Some(row) => SiteStatusInfo {
                status: Some(row.status()?),
                last_run: db.latest_run(row.id).await?,
                url: row.url,
                name,
                status_time: Some(row.status_time),
                last_error: row.last_error,
                configured,
            },
            None => SiteStatusInfo {
                url,
                name,
                status: None,
                status_time: None,
                last_error: None,
                configured,
                last_run: None,
            },
        };
        sites.push(info);
    }

    Ok(StatusInfo {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        sites,
    })
}

/// Index-wide and per-site statistics
pub async fn cmd_stats(config: &Config, db: &MetaDb) -> Result<Statistics> {
    let lemmas = LemmaExtractor::from_config(&config.lemma)?;
    let indexer = SiteIndexer::new(config, db.clone(), lemmas)?;
    indexer.statistics().await
}

/// Print status to console
pub fn print_status(status: &StatusInfo) {
    println!("\n📊 siteseek Status\n");
    println!("Configuration: {}", status.config_path);
    println!("Database: {}", status.db_path);
    println!();

    if status.sites.is_empty() {
        println!("No sites configured. Add [[sites]] entries to the config file.");
        return;
    }

    for site in &status.sites {
        let state = site
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "NOT INDEXED".to_string());
        println!("• {} [{}]", site.name, state);
        println!("  URL: {}", site.url);
        if !site.configured {
            println!("  (no longer in the config file)");
        }
        if let Some(time) = &site.status_time {
            println!("  Since: {}", time);
        }
        if let Some(e) = &site.last_error {
            println!("  Last error: {}", e);
        }
        if let Some(run) = &site.last_run {
            println!(
                "  Last run: {} ({} pages, {} failed)",
                run.status, run.pages_indexed, run.pages_failed
            );
        }
        println!();
    }
}

/// Print statistics to console
pub fn print_stats(stats: &Statistics) {
    println!("\n📈 Index Statistics\n");
    println!("Sites: {}", stats.total.sites);
    println!("Pages: {}", stats.total.pages);
    println!("Lemmas: {}", stats.total.lemmas);
    if stats.total.indexing {
        println!("Indexing: in progress");
    }

    for site in &stats.detailed {
        println!("\n• {} [{}]", site.name, site.status);
        println!("  URL: {}", site.url);
        println!("  Pages: {}, Lemmas: {}", site.pages, site.lemmas);
        println!("  Status time: {}", site.status_time);
        if let Some(e) = &site.last_error {
            println!("  Last error: {}", e);
        }
    }
}
