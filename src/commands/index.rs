//! Index and index-page command implementations

use crate::config::Config;
use crate::error::Result;
use crate::indexer::{IndexTarget, RunSummary, SiteIndexer, StartOutcome};
use crate::lemma::LemmaExtractor;
use crate::meta::{MetaDb, PageWrite, SiteStatus};
use crate::progress::SiteSpinners;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Only this site; every configured site when absent
    pub site: Option<String>,
    /// Draw per-site spinners
    pub show_progress: bool,
}

/// Outcome of an index command
#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    pub runs: Vec<RunSummary>,
    /// Sites that were already being indexed
    pub skipped: Vec<String>,
    /// Sites a previous process left mid-run, now marked failed
    pub recovered: usize,
}

/// Index one or all sites and wait for the runs to finish. Ctrl-C requests
/// a stop; the interrupted sites end FAILED.
pub async fn cmd_index(config: &Config, db: &MetaDb, options: IndexOptions) -> Result<IndexReport> {
    let lemmas = LemmaExtractor::from_config(&config.lemma)?;
    let indexer = SiteIndexer::new(config, db.clone(), lemmas)?;
    let recovered = indexer.recover_interrupted().await?;

    let spinners = Arc::new(if options.show_progress {
        SiteSpinners::default()
    } else {
        SiteSpinners::hidden()
    });
    let observer = spinners.clone();
    indexer.set_observer(Arc::new(move |site: &str, path: &str| observer.page(site, path)));

    let target = match options.site {
        Some(url) => IndexTarget::Site(url),
        None => IndexTarget::All,
    };

    let (started, skipped) = match indexer.start_indexing(target).await? {
        StartOutcome::Accepted { started, skipped } => (started, skipped),
        StartOutcome::AlreadyRunning => {
            warn!("Indexing is already running for every requested site");
            return Ok(IndexReport {
                runs: Vec::new(),
                skipped: Vec::new(),
                recovered,
            });
        }
    };

    for handle in &started {
        spinners.start(&handle.url);
    }

    let all_done = join_all(started.into_iter().map(|handle| {
        let spinners = spinners.clone();
        async move {
            let summary = handle.wait().await;
            let message = match &summary.last_error {
                None => format!("indexed {} pages", summary.pages_indexed),
                Some(e) => format!("failed: {}", e),
            };
            spinners.finish(&summary.url, &message);
            summary
        }
    }));
    tokio::pin!(all_done);

    let runs = tokio::select! {
        runs = &mut all_done => runs,
        _ = tokio::signal::ctrl_c() => {
            let stopping = indexer.stop_all();
            info!("Interrupted; stopping {} running site(s)", stopping);
            all_done.await
        }
    };

    Ok(IndexReport {
        runs,
        skipped,
        recovered,
    })
}

/// Outcome of an index-page command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexPageReport {
    pub url: String,
    pub page_id: i64,
    /// `created`, `replaced` or `unchanged`
    pub outcome: String,
}

/// Fetch and index a single page of a known site
pub async fn cmd_index_page(config: &Config, db: &MetaDb, url: &str) -> Result<IndexPageReport> {
    let lemmas = LemmaExtractor::from_config(&config.lemma)?;
    let indexer = SiteIndexer::new(config, db.clone(), lemmas)?;
    indexer.recover_interrupted().await?;

    let write = indexer.index_page(url).await?;
    let outcome = match write {
        PageWrite::Created(_) => "created",
        PageWrite::Replaced(_) => "replaced",
        PageWrite::Unchanged(_) => "unchanged",
    };

    Ok(IndexPageReport {
        url: url.to_string(),
        page_id: write.page_id(),
        outcome: outcome.to_string(),
    })
}

/// Print index report to console
pub fn print_index_report(report: &IndexReport) {
    println!("\n📥 Indexing Results\n");

    if report.recovered > 0 {
        println!(
            "⚠ {} site(s) left mid-run by a previous process were marked failed\n",
            report.recovered
        );
    }

    if report.runs.is_empty() {
        println!("Nothing was indexed: every requested site is already being indexed.");
        return;
    }

    for run in &report.runs {
        let mark = if run.status == SiteStatus::Indexed { "✓" } else { "✗" };
        println!("{} {} [{}]", mark, run.url, run.status);
        println!(
            "  Pages: {} indexed, {} failed, {} removed ({:.1}s)",
            run.pages_indexed,
            run.pages_failed,
            run.pages_removed,
            run.duration_ms as f64 / 1000.0
        );
        if let Some(e) = &run.last_error {
            println!("  Error: {}", e);
        }
    }

    for site in &report.skipped {
        println!("• {} skipped (already indexing)", site);
    }
}
