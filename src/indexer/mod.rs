//! Site indexing orchestration
//!
//! [`SiteIndexer`] owns the site status state machine. A run moves a site to
//! INDEXING, crawls it on its own tokio task, writes every page through the
//! index store and ends in INDEXED or FAILED. At most one run per site is
//! active at a time, across processes sharing the database: a run starts by
//! claiming the site row and keeps the claim alive with a heartbeat.
//! Different sites run concurrently.

mod registry;
mod retry;

pub use registry::*;
pub use retry::*;

use crate::config::{Config, SiteConfig};
use crate::crawl::{page_path, should_crawl_url, site_host, CrawlReport, CrawledPage, Crawler, PageSink};
use crate::error::{Error, Result};
use crate::lemma::LemmaExtractor;
use crate::meta::{MetaDb, PageDraft, PageWrite, RunStatus, Site, SiteStatus};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

/// Error recorded for sites whose claim lapsed without a final status
const INTERRUPTED: &str = "indexing interrupted";

/// Which sites a start request targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexTarget {
    /// Every configured site
    All,
    /// One site by root URL
    Site(String),
}

/// Result of a start request
#[derive(Debug)]
pub enum StartOutcome {
    /// At least one run was launched
    Accepted {
        started: Vec<RunHandle>,
        /// Sites skipped because they were already running
        skipped: Vec<String>,
    },
    /// Every targeted site already has an active run, in this process or
    /// another one
    AlreadyRunning,
}

/// Result of a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Accepted,
    NotRunning,
}

/// Handle to a launched site run
#[derive(Debug)]
pub struct RunHandle {
    pub site_id: i64,
    pub url: String,
    handle: JoinHandle<RunSummary>,
}

impl RunHandle {
    /// Wait for the run to finish
    pub async fn wait(self) -> RunSummary {
        match self.handle.await {
            Ok(summary) => summary,
            Err(e) => RunSummary {
                site_id: self.site_id,
                url: self.url,
                status: SiteStatus::Failed,
                pages_indexed: 0,
                pages_failed: 0,
                pages_removed: 0,
                last_error: Some(format!("indexing task aborted: {}", e)),
                duration_ms: 0,
            },
        }
    }
}

/// Final state of one site run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub site_id: i64,
    pub url: String,
    pub status: SiteStatus,
    pub pages_indexed: usize,
    pub pages_failed: usize,
    pub pages_removed: usize,
    pub last_error: Option<String>,
    pub duration_ms: u64,
}

/// Externally visible status of a site
#[derive(Debug, Clone, Serialize)]
pub struct SiteStatusView {
    pub url: String,
    pub name: String,
    pub status: SiteStatus,
    pub status_time: String,
    pub last_error: Option<String>,
    pub running: bool,
}

/// Index-wide totals
#[derive(Debug, Clone, Serialize)]
pub struct TotalStatistics {
    pub sites: usize,
    pub pages: usize,
    pub lemmas: usize,
    pub indexing: bool,
}

/// Per-site statistics
#[derive(Debug, Clone, Serialize)]
pub struct SiteStatistics {
    pub url: String,
    pub name: String,
    pub status: SiteStatus,
    pub status_time: String,
    pub last_error: Option<String>,
    pub pages: usize,
    pub lemmas: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub total: TotalStatistics,
    pub detailed: Vec<SiteStatistics>,
}

/// Called after each page is stored with the site URL and page path
pub type PageObserver = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Orchestrates site runs; cheap to clone
#[derive(Clone)]
pub struct SiteIndexer {
    inner: Arc<Inner>,
}

struct Inner {
    db: MetaDb,
    crawler: Crawler,
    lemmas: LemmaExtractor,
    retry: RetryPolicy,
    sites: Vec<SiteConfig>,
    registry: RunRegistry,
    /// Identity used for site claims
    owner: String,
    lease: Duration,
    observer: RwLock<Option<PageObserver>>,
}

impl SiteIndexer {
    pub fn new(config: &Config, db: MetaDb, lemmas: LemmaExtractor) -> Result<Self> {
        let retry = RetryPolicy::from_config(&config.indexing);
        let crawler = Crawler::new(config.crawl.clone(), retry)?;
        Ok(Self {
            inner: Arc::new(Inner {
                db,
                crawler,
                lemmas,
                retry,
                sites: config.sites.clone(),
                registry: RunRegistry::new(),
                owner: Uuid::new_v4().to_string(),
                lease: config.indexing.lease(),
                observer: RwLock::new(None),
            }),
        })
    }

    pub fn db(&self) -> &MetaDb {
        &self.inner.db
    }

    pub fn set_observer(&self, observer: PageObserver) {
        *self.inner.observer.write() = Some(observer);
    }

    /// Whether any site run of this process is active
    pub fn is_indexing(&self) -> bool {
        !self.inner.registry.running().is_empty()
    }

    /// Launch runs for the target. Each run proceeds on its own task; the
    /// returned handles can be awaited for the outcome.
    pub async fn start_indexing(&self, target: IndexTarget) -> Result<StartOutcome> {
        let targets: Vec<(String, String)> = match &target {
            IndexTarget::All => {
                if self.inner.sites.is_empty() {
                    return Err(Error::Config("no sites configured".to_string()));
                }
                self.inner
                    .sites
                    .iter()
                    .map(|s| (s.url.clone(), s.name.clone()))
                    .collect()
            }
            IndexTarget::Site(url) => vec![self.resolve_site(url).await?],
        };

        let mut started = Vec::new();
        let mut skipped = Vec::new();

        for (url, name) in targets {
            let site = self
                .inner
                .retry
                .run("Register site", || self.inner.db.upsert_site(&url, &name))
                .await?;

            let Some(guard) = self.inner.registry.try_acquire(site.id) else {
                info!("Indexing of {} already running, skipping", site.url);
                skipped.push(site.url);
                continue;
            };
            if !self.inner.claim(&site).await? {
                info!("{} is being indexed by another process, skipping", site.url);
                skipped.push(site.url);
                continue;
            }

            started.push(self.launch(site, guard));
        }

        if started.is_empty() {
            return Ok(StartOutcome::AlreadyRunning);
        }
        Ok(StartOutcome::Accepted { started, skipped })
    }

    /// Request a site running in this process to stop. The run ends FAILED
    /// with "cancelled by user" once the crawler observes the flag.
    pub async fn stop_indexing(&self, url: &str) -> Result<StopOutcome> {
        let (url, _) = self.resolve_site(url).await?;
        let Some(site) = self.inner.db.get_site_by_url(&url).await? else {
            return Ok(StopOutcome::NotRunning);
        };
        if self.inner.registry.cancel(site.id) {
            info!("Stop requested for {}", site.url);
            Ok(StopOutcome::Accepted)
        } else {
            Ok(StopOutcome::NotRunning)
        }
    }

    /// Request every running site to stop, returning how many were running
    pub fn stop_all(&self) -> usize {
        self.inner.registry.cancel_all()
    }

    pub async fn site_status(&self, url: &str) -> Result<SiteStatusView> {
        let site = self
            .inner
            .db
            .get_site_by_url(url)
            .await?
            .ok_or_else(|| Error::SiteNotFound(url.to_string()))?;
        Ok(SiteStatusView {
            status: site.status()?,
            running: self.inner.registry.is_running(site.id) || site.lease_active(),
            url: site.url,
            name: site.name,
            status_time: site.status_time,
            last_error: site.last_error,
        })
    }

    /// Fetch and re-index a single page of a known site.
    ///
    /// Rejected while a run of that site is active. The site passes through
    /// INDEXING and ends INDEXED on success. On failure it stays INDEXED if
    /// it was INDEXED before, otherwise it ends FAILED.
    pub async fn index_page(&self, url: &str) -> Result<PageWrite> {
        let page_url = Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{}: {}", url, e)))?;
        if !should_crawl_url(&page_url) {
            return Err(Error::InvalidUrl(format!("{} is not an indexable page", url)));
        }
        let host = site_host(&page_url);

        let site_cfg = self
            .inner
            .sites
            .iter()
            .find(|s| Url::parse(&s.url).ok().and_then(|u| site_host(&u)) == host)
            .map(|s| (s.url.clone(), s.name.clone()));
        let known = match site_cfg {
            Some(found) => Some(found),
            None => self
                .inner
                .db
                .list_sites()
                .await?
                .into_iter()
                .find(|s| s.root_url().ok().and_then(|u| site_host(&u)) == host)
                .map(|s| (s.url, s.name)),
        };
        let (site_url, site_name) = known.ok_or_else(|| {
            Error::SiteNotFound(format!("{} is outside of the configured sites", url))
        })?;

        let previous = self.inner.db.get_site_by_url(&site_url).await?;
        let site = self
            .inner
            .retry
            .run("Register site", || self.inner.db.upsert_site(&site_url, &site_name))
            .await?;

        let Some(_guard) = self.inner.registry.try_acquire(site.id) else {
            return Err(Error::AlreadyRunning(site.url));
        };
        if !self.inner.claim(&site).await? {
            return Err(Error::AlreadyRunning(site.url));
        }

        let result = async {
            let page = self.inner.crawler.fetch_page(&page_url).await?;
            self.inner.store_page(&site, &page).await
        }
        .await;

        let was_indexed = previous
            .map(|prev| matches!(prev.status(), Ok(SiteStatus::Indexed)))
            .unwrap_or(false);
        let (status, last_error) = match &result {
            Ok(write) => {
                info!("Indexed page {} ({:?})", url, write);
                (SiteStatus::Indexed, None)
            }
            Err(e) => {
                warn!("Failed to index page {}: {}", url, e);
                if was_indexed {
                    (SiteStatus::Indexed, None)
                } else {
                    (SiteStatus::Failed, Some(e.to_string()))
                }
            }
        };
        self.inner.release(&site, status, last_error.as_deref()).await;

        result
    }

    /// Totals plus per-site detail
    pub async fn statistics(&self) -> Result<Statistics> {
        let sites = self.inner.db.list_sites().await?;
        let global = self.inner.db.global_stats().await?;

        let indexing_elsewhere = sites.iter().any(Site::lease_active);
        let mut detailed = Vec::with_capacity(sites.len());
        for site in sites {
            let stats = self.inner.db.site_stats(site.id).await?;
            detailed.push(SiteStatistics {
                status: site.status()?,
                url: site.url,
                name: site.name,
                status_time: site.status_time,
                last_error: site.last_error,
                pages: stats.page_count,
                lemmas: stats.lemma_count,
            });
        }

        Ok(Statistics {
            total: TotalStatistics {
                sites: global.site_count,
                pages: global.page_count,
                lemmas: global.lemma_count,
                indexing: indexing_elsewhere || self.is_indexing(),
            },
            detailed,
        })
    }

    /// Mark sites left in INDEXING by a dead process as FAILED. Sites whose
    /// claim is still being renewed, by this or any other process, are left
    /// alone.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let failed = self.inner.db.fail_abandoned_sites(INTERRUPTED).await?;
        for url in &failed {
            warn!("Site {} was left mid-indexing; marked failed", url);
        }
        Ok(failed.len())
    }

    /// Configured site for a URL, falling back to sites already in the index
    async fn resolve_site(&self, url: &str) -> Result<(String, String)> {
        if let Some(site) = self.inner.sites.iter().find(|s| same_root(&s.url, url)) {
            return Ok((site.url.clone(), site.name.clone()));
        }
        match self.inner.db.get_site_by_url(url).await? {
            Some(site) => Ok((site.url, site.name)),
            None => Err(Error::SiteNotFound(url.to_string())),
        }
    }

    /// Spawn the run of a claimed site
    fn launch(&self, site: Site, guard: RunGuard) -> RunHandle {
        let site_id = site.id;
        let url = site.url.clone();
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { inner.run_site(site, guard).await });

        RunHandle {
            site_id,
            url,
            handle,
        }
    }
}

fn same_root(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

impl Inner {
    /// Claim the site row for this process; false if another run holds it
    async fn claim(&self, site: &Site) -> Result<bool> {
        self.retry
            .run("Claim site", || self.db.claim_site(site.id, &self.owner, self.lease))
            .await
    }

    /// Record the final status and drop the claim
    async fn release(&self, site: &Site, status: SiteStatus, last_error: Option<&str>) {
        let released = self
            .retry
            .run("Update site status", || {
                self.db.release_site(site.id, &self.owner, status, last_error)
            })
            .await;
        match released {
            Ok(true) => {}
            Ok(false) => warn!(
                "Indexing claim on {} was lost; final status {} not recorded",
                site.url, status
            ),
            Err(e) => error!("Failed to record status of {}: {}", site.url, e),
        }
    }

    /// Renew the site claim until aborted
    fn spawn_heartbeat(&self, site: &Site) -> JoinHandle<()> {
        let db = self.db.clone();
        let owner = self.owner.clone();
        let lease = self.lease;
        let site_id = site.id;
        let url = site.url.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval((lease / 3).max(Duration::from_millis(100)));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match db.renew_claim(site_id, &owner, lease).await {
                    Ok(true) => debug!(site = %url, "Renewed indexing claim"),
                    Ok(false) => {
                        warn!(site = %url, "Indexing claim lost");
                        break;
                    }
                    Err(e) => warn!(site = %url, "Failed to renew indexing claim: {}", e),
                }
            }
        })
    }

    async fn run_site(&self, site: Site, guard: RunGuard) -> RunSummary {
        let started = Instant::now();
        info!(site = %site.url, "Indexing started");
        let heartbeat = self.spawn_heartbeat(&site);

        let run = match self.db.start_run(site.id).await {
            Ok(run) => Some(run),
            Err(e) => {
                warn!("Could not record indexing run for {}: {}", site.url, e);
                None
            }
        };

        let crawled = self.crawl_site(&site, &guard).await;
        let (status, last_error, report) = match crawled {
            Ok(report) if report.cancelled => {
                (SiteStatus::Failed, Some(Error::Cancelled.to_string()), report)
            }
            Ok(report) if report.pages_indexed() == 0 => {
                let cause = report
                    .failures
                    .first()
                    .map(|f| format!("{}: {}", f.url, f.error))
                    .unwrap_or_else(|| "no pages could be fetched".to_string());
                let err = Error::NoPagesIndexed(cause);
                (SiteStatus::Failed, Some(err.to_string()), report)
            }
            Ok(report) => (SiteStatus::Indexed, None, report),
            Err(e) => (SiteStatus::Failed, Some(e.to_string()), CrawlReport::default()),
        };

        let mut pages_removed = 0;
        if status == SiteStatus::Indexed {
            match self.db.delete_stale_pages(site.id, &report.paths).await {
                Ok(removed) => {
                    if !removed.is_empty() {
                        debug!("Removed {} stale pages of {}", removed.len(), site.url);
                    }
                    pages_removed = removed.len();
                }
                Err(e) => warn!("Failed to prune stale pages of {}: {}", site.url, e),
            }
        }

        heartbeat.abort();
        self.release(&site, status, last_error.as_deref()).await;

        if let Some(run) = run {
            let run_status = match status {
                SiteStatus::Indexed => RunStatus::Completed,
                _ if report.cancelled => RunStatus::Cancelled,
                _ => RunStatus::Failed,
            };
            let mut errors: Vec<String> = report
                .failures
                .iter()
                .map(|f| format!("{}: {}", f.url, f.error))
                .collect();
            if let Some(e) = &last_error {
                errors.push(e.clone());
            }
            if let Err(e) = self
                .db
                .complete_run(
                    &run.id,
                    run_status,
                    report.pages_indexed() as i64,
                    report.failures.len() as i64,
                    &errors,
                )
                .await
            {
                warn!("Could not complete indexing run for {}: {}", site.url, e);
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        match &last_error {
            None => info!(
                site = %site.url,
                pages = report.pages_indexed(),
                failed = report.failures.len(),
                "Indexing finished in {}ms",
                duration_ms
            ),
            Some(e) => warn!(site = %site.url, "Indexing failed: {}", e),
        }

        drop(guard);

        RunSummary {
            site_id: site.id,
            url: site.url,
            status,
            pages_indexed: report.pages_indexed(),
            pages_failed: report.failures.len(),
            pages_removed,
            last_error,
            duration_ms,
        }
    }

    async fn crawl_site(&self, site: &Site, guard: &RunGuard) -> Result<CrawlReport> {
        let root = site.root_url()?;
        let sink = IndexingSink { inner: self, site };
        self.crawler.crawl(&root, guard.cancel_flag(), &sink).await
    }

    /// Lemmatize a fetched page and write it, retrying storage contention
    async fn store_page(&self, site: &Site, page: &CrawledPage) -> Result<PageWrite> {
        let lemmas = self.lemmas.extract(&page.extracted.text);
        let draft = PageDraft {
            path: page_path(&page.url),
            code: page.status,
            title: page.extracted.title.clone(),
            content: page.extracted.text.clone(),
        };

        let write = self
            .retry
            .run(&format!("Store {}", page.url), || {
                self.db.index_page(site.id, &draft, &lemmas)
            })
            .await?;

        let observer = self.observer.read().clone();
        if let Some(observer) = observer {
            observer(&site.url, &draft.path);
        }
        Ok(write)
    }
}

struct IndexingSink<'a> {
    inner: &'a Inner,
    site: &'a Site,
}

#[async_trait]
impl PageSink for IndexingSink<'_> {
    async fn accept(&self, page: &CrawledPage) -> Result<()> {
        self.inner.store_page(self.site, page).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn html(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(
            format!("<html><body>{}</body></html>", body).into_bytes(),
            "text/html; charset=utf-8",
        )
    }

    async fn mount(server: &MockServer, at: &str, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(response)
            .mount(server)
            .await;
    }

    fn test_config(tmp: &TempDir, sites: &[&MockServer]) -> Config {
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        config.sites = sites
            .iter()
            .enumerate()
            .map(|(i, s)| SiteConfig {
                url: s.uri(),
                name: format!("Site {}", i + 1),
            })
            .collect();
        config.crawl.timeout_secs = 1;
        config.crawl.politeness_min_ms = 0;
        config.crawl.politeness_max_ms = 0;
        config.crawl.global_requests_per_second = 1000;
        config.indexing.retry_backoff_ms = 10;
        config
    }

    async fn indexer(config: &Config) -> SiteIndexer {
        let db = MetaDb::connect(config).await.unwrap();
        let lemmas = LemmaExtractor::from_config(&config.lemma).unwrap();
        SiteIndexer::new(config, db, lemmas).unwrap()
    }

    async fn run_to_end(indexer: &SiteIndexer, target: IndexTarget) -> Vec<RunSummary> {
        match indexer.start_indexing(target).await.unwrap() {
            StartOutcome::Accepted { started, .. } => {
                let mut summaries = Vec::new();
                for handle in started {
                    summaries.push(handle.wait().await);
                }
                summaries
            }
            StartOutcome::AlreadyRunning => panic!("expected the run to start"),
        }
    }

    async fn mount_cat_site(server: &MockServer) {
        mount(
            server,
            "/",
            html(r#"<a href="/a">A</a> <a href="/b">B</a> <a href="/c">C</a>"#),
        )
        .await;
        mount(server, "/a", html("кот сидит")).await;
        mount(server, "/b", html("кот спит")).await;
        mount(
            server,
            "/c",
            html("никогда").set_delay(Duration::from_secs(3)),
        )
        .await;
    }

    #[tokio::test]
    async fn test_site_reaches_indexed_despite_timeouts() {
        let server = MockServer::start().await;
        mount_cat_site(&server).await;
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp, &[&server]);
        let indexer = indexer(&config).await;

        let summaries = run_to_end(&indexer, IndexTarget::All).await;
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].status, SiteStatus::Indexed);
        assert_eq!(summaries[0].pages_failed, 1);

        let status = indexer.site_status(&server.uri()).await.unwrap();
        assert_eq!(status.status, SiteStatus::Indexed);
        assert_eq!(status.last_error, None);
        assert!(!status.running);

        let site = indexer.db().get_site_by_url(&server.uri()).await.unwrap().unwrap();
        let paths = indexer.db().list_page_paths(site.id).await.unwrap();
        assert_eq!(paths, vec!["/", "/a", "/b"]);

        let run = indexer.db().latest_run(site.id).await.unwrap().unwrap();
        assert_eq!(run.status, "completed");
        assert_eq!(run.pages_indexed, 3);
        assert_eq!(run.pages_failed, 1);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let server = MockServer::start().await;
        mount(&server, "/", html("медленный").set_delay(Duration::from_millis(500))).await;
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp, &[&server]);
        let indexer = indexer(&config).await;

        let first = indexer.start_indexing(IndexTarget::All).await.unwrap();
        let StartOutcome::Accepted { started, skipped } = first else {
            panic!("first start should be accepted");
        };
        assert!(skipped.is_empty());

        let second = indexer
            .start_indexing(IndexTarget::Site(format!("{}/", server.uri())))
            .await
            .unwrap();
        assert!(matches!(second, StartOutcome::AlreadyRunning));
        assert!(matches!(
            indexer.start_indexing(IndexTarget::All).await.unwrap(),
            StartOutcome::AlreadyRunning
        ));

        let status = indexer.site_status(&server.uri()).await.unwrap();
        assert_eq!(status.status, SiteStatus::Indexing);
        assert!(status.running);
        assert!(indexer.is_indexing());

        for handle in started {
            assert_eq!(handle.wait().await.status, SiteStatus::Indexed);
        }
        assert!(!indexer.is_indexing());
    }

    #[tokio::test]
    async fn test_stop_indexing_cancels_run() {
        let server = MockServer::start().await;
        let links: String = (0..20)
            .map(|i| format!(r#"<a href="/p{}">p</a>"#, i))
            .collect();
        mount(&server, "/", html(&links)).await;
        for i in 0..20 {
            mount(&server, &format!("/p{}", i), html("страница")).await;
        }
        let tmp = TempDir::new().unwrap();
        let mut config = test_config(&tmp, &[&server]);
        config.crawl.politeness_min_ms = 200;
        config.crawl.politeness_max_ms = 200;
        let indexer = indexer(&config).await;

        let StartOutcome::Accepted { started, .. } =
            indexer.start_indexing(IndexTarget::All).await.unwrap()
        else {
            panic!("start should be accepted");
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            indexer.stop_indexing(&server.uri()).await.unwrap(),
            StopOutcome::Accepted
        );

        let summary = started.into_iter().next().unwrap().wait().await;
        assert_eq!(summary.status, SiteStatus::Failed);
        assert_eq!(summary.last_error.as_deref(), Some("cancelled by user"));
        assert!(summary.pages_indexed < 21);

        let status = indexer.site_status(&server.uri()).await.unwrap();
        assert_eq!(status.last_error.as_deref(), Some("cancelled by user"));
        assert_eq!(
            indexer.stop_indexing(&server.uri()).await.unwrap(),
            StopOutcome::NotRunning
        );
    }

    #[tokio::test]
    async fn test_unreachable_root_fails_site() {
        let server = MockServer::start().await;
        mount(&server, "/", ResponseTemplate::new(503)).await;
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp, &[&server]);
        let indexer = indexer(&config).await;

        let summaries = run_to_end(&indexer, IndexTarget::All).await;
        assert_eq!(summaries[0].status, SiteStatus::Failed);

        let status = indexer.site_status(&server.uri()).await.unwrap();
        assert_eq!(status.status, SiteStatus::Failed);
        assert!(status.last_error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_sites_index_concurrently_without_mixing() {
        let first = MockServer::start().await;
        let second = MockServer::start().await;
        mount(&first, "/", html("кот кот")).await;
        mount(&second, "/", html("собака")).await;
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp, &[&first, &second]);
        let indexer = indexer(&config).await;

        let summaries = run_to_end(&indexer, IndexTarget::All).await;
        assert!(summaries.iter().all(|s| s.status == SiteStatus::Indexed));

        let db = indexer.db();
        let a = db.get_site_by_url(&first.uri()).await.unwrap().unwrap();
        let b = db.get_site_by_url(&second.uri()).await.unwrap().unwrap();
        assert_eq!(db.get_lemma(a.id, "кот").await.unwrap().unwrap().frequency, 2);
        assert!(db.get_lemma(b.id, "кот").await.unwrap().is_none());
        assert!(db.get_lemma(a.id, "собака").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reindexing_does_not_double_count() {
        let server = MockServer::start().await;
        mount(&server, "/", html(r#"кот <a href="/a">A</a>"#)).await;
        mount(&server, "/a", html("кот сидит")).await;
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp, &[&server]);
        let indexer = indexer(&config).await;

        run_to_end(&indexer, IndexTarget::All).await;
        run_to_end(&indexer, IndexTarget::Site(server.uri())).await;

        let db = indexer.db();
        let site = db.get_site_by_url(&server.uri()).await.unwrap().unwrap();
        assert_eq!(db.get_lemma(site.id, "кот").await.unwrap().unwrap().frequency, 2);
        assert_eq!(db.list_page_paths(site.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_site_is_rejected() {
        let server = MockServer::start().await;
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp, &[&server]);
        let indexer = indexer(&config).await;

        let result = indexer
            .start_indexing(IndexTarget::Site("https://unknown.test".to_string()))
            .await;
        assert!(matches!(result, Err(Error::SiteNotFound(_))));
    }

    #[tokio::test]
    async fn test_recover_interrupted_runs() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp, &[]);
        let indexer = indexer(&config).await;

        // A freshly registered site is INDEXING with no live run
        indexer
            .db()
            .upsert_site("https://stale.test", "Stale")
            .await
            .unwrap();
        assert_eq!(indexer.recover_interrupted().await.unwrap(), 1);

        let status = indexer.site_status("https://stale.test").await.unwrap();
        assert_eq!(status.status, SiteStatus::Failed);
        assert_eq!(status.last_error.as_deref(), Some("indexing interrupted"));
        assert_eq!(indexer.recover_interrupted().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_index_single_page() {
        let server = MockServer::start().await;
        mount(&server, "/", html("главная")).await;
        mount(&server, "/new", html("новая страница")).await;
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp, &[&server]);
        let indexer = indexer(&config).await;

        run_to_end(&indexer, IndexTarget::All).await;
        let write = indexer
            .index_page(&format!("{}/new", server.uri()))
            .await
            .unwrap();
        assert!(matches!(write, PageWrite::Created(_)));

        let site = indexer.db().get_site_by_url(&server.uri()).await.unwrap().unwrap();
        assert_eq!(site.status().unwrap(), SiteStatus::Indexed);
        assert!(indexer.db().get_page(site.id, "/new").await.unwrap().is_some());

        let outside = indexer.index_page("https://elsewhere.test/page").await;
        assert!(matches!(outside, Err(Error::SiteNotFound(_))));
    }

    #[tokio::test]
    async fn test_run_in_another_process_is_not_disturbed() {
        let server = MockServer::start().await;
        mount(&server, "/", html("медленный").set_delay(Duration::from_millis(800))).await;
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp, &[&server]);

        // Separate pools and owners, as two CLI invocations would have
        let first = indexer(&config).await;
        let second = indexer(&config).await;

        let StartOutcome::Accepted { started, .. } =
            first.start_indexing(IndexTarget::All).await.unwrap()
        else {
            panic!("first start should be accepted");
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(second.recover_interrupted().await.unwrap(), 0);
        let status = second.site_status(&server.uri()).await.unwrap();
        assert_eq!(status.status, SiteStatus::Indexing);
        assert_eq!(status.last_error, None);
        assert!(status.running);

        assert!(matches!(
            second.start_indexing(IndexTarget::All).await.unwrap(),
            StartOutcome::AlreadyRunning
        ));
        assert!(matches!(
            second.index_page(&format!("{}/other", server.uri())).await,
            Err(Error::AlreadyRunning(_))
        ));
        assert!(second.statistics().await.unwrap().total.indexing);

        for handle in started {
            assert_eq!(handle.wait().await.status, SiteStatus::Indexed);
        }
        let status = second.site_status(&server.uri()).await.unwrap();
        assert_eq!(status.status, SiteStatus::Indexed);
        assert!(!status.running);
    }

    #[tokio::test]
    async fn test_index_page_rejected_during_full_run() {
        let server = MockServer::start().await;
        mount(&server, "/", html("медленный").set_delay(Duration::from_millis(800))).await;
        mount(&server, "/extra", html("дополнительно")).await;
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp, &[&server]);
        let indexer = indexer(&config).await;

        let StartOutcome::Accepted { started, .. } =
            indexer.start_indexing(IndexTarget::All).await.unwrap()
        else {
            panic!("start should be accepted");
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        let before = indexer.site_status(&server.uri()).await.unwrap();

        let result = indexer.index_page(&format!("{}/extra", server.uri())).await;
        assert!(matches!(result, Err(Error::AlreadyRunning(_))));

        let after = indexer.site_status(&server.uri()).await.unwrap();
        assert_eq!(after.status, SiteStatus::Indexing);
        assert_eq!(after.status_time, before.status_time);
        assert!(after.running);

        for handle in started {
            assert_eq!(handle.wait().await.status, SiteStatus::Indexed);
        }
        let site = indexer.db().get_site_by_url(&server.uri()).await.unwrap().unwrap();
        assert!(indexer.db().get_page(site.id, "/extra").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_page_never_leaves_site_indexing() {
        let server = MockServer::start().await;
        mount(&server, "/", html("главная")).await;
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp, &[&server]);
        let indexer = indexer(&config).await;

        // Registered but never finished: INDEXING with no claim
        indexer.db().upsert_site(&server.uri(), "Site 1").await.unwrap();
        let result = indexer.index_page(&format!("{}/gone", server.uri())).await;
        assert!(matches!(result, Err(Error::HttpStatus { status: 404, .. })));

        let status = indexer.site_status(&server.uri()).await.unwrap();
        assert_eq!(status.status, SiteStatus::Failed);
        assert!(status.last_error.unwrap().contains("404"));
        assert!(!status.running);

        // An indexed site stays indexed when one page fails
        run_to_end(&indexer, IndexTarget::All).await;
        assert!(indexer.index_page(&format!("{}/gone", server.uri())).await.is_err());
        let status = indexer.site_status(&server.uri()).await.unwrap();
        assert_eq!(status.status, SiteStatus::Indexed);
        assert_eq!(status.last_error, None);
    }

    #[tokio::test]
    async fn test_statistics() {
        let server = MockServer::start().await;
        mount(&server, "/", html(r#"кот сидит <a href="/b">B</a>"#)).await;
        mount(&server, "/b", html("кот спит")).await;
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp, &[&server]);
        let indexer = indexer(&config).await;

        run_to_end(&indexer, IndexTarget::All).await;
        let stats = indexer.statistics().await.unwrap();

        assert_eq!(stats.total.sites, 1);
        assert_eq!(stats.total.pages, 2);
        assert_eq!(stats.total.lemmas, 3);
        assert!(!stats.total.indexing);
        assert_eq!(stats.detailed[0].name, "Site 1");
        assert_eq!(stats.detailed[0].status, SiteStatus::Indexed);
    }

    #[tokio::test]
    async fn test_observer_sees_every_page() {
        let server = MockServer::start().await;
        mount(&server, "/", html(r#"<a href="/a">A</a>"#)).await;
        mount(&server, "/a", html("кот")).await;
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp, &[&server]);
        let indexer = indexer(&config).await;

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        indexer.set_observer(Arc::new(move |_site: &str, path: &str| sink.lock().push(path.to_string())));

        run_to_end(&indexer, IndexTarget::All).await;
        assert_eq!(*seen.lock(), vec!["/".to_string(), "/a".to_string()]);
    }
}
