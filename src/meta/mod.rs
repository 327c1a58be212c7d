//! Index storage using SQLite
//!
//! This module is the single source of truth shared by the write path
//! (crawler → lemma extractor → store) and the read path (search):
//! - Sites (configured roots and their indexing status)
//! - Pages (fetched documents, unique per site and path)
//! - Lemmas (site-scoped dictionary with running occurrence counts)
//! - Postings (lemma → page with a per-page rank)
//! - Indexing runs (history and stats)
//!
//! Lemma and posting writes are upserts that merge into existing rows, so
//! concurrent writers never lose updates.

mod schema;

pub use schema::*;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::lemma::LemmaCounts;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

/// Site-level indexing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SiteStatus {
    Indexing,
    Indexed,
    Failed,
}

impl std::fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SiteStatus::Indexing => write!(f, "INDEXING"),
            SiteStatus::Indexed => write!(f, "INDEXED"),
            SiteStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl FromStr for SiteStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "INDEXING" => Ok(SiteStatus::Indexing),
            "INDEXED" => Ok(SiteStatus::Indexed),
            "FAILED" => Ok(SiteStatus::Failed),
            _ => Err(Error::Other(format!("Unknown site status: {}", s))),
        }
    }
}

/// Indexing run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn lease_expiry(lease: Duration) -> i64 {
    now_millis().saturating_add(i64::try_from(lease.as_millis()).unwrap_or(i64::MAX))
}

/// Attempts for a page write that keeps hitting a locked database
const PAGE_WRITE_ATTEMPTS: u32 = 5;
const PAGE_WRITE_BACKOFF: Duration = Duration::from_millis(50);

/// Canonical form of a site root URL: no trailing slash
pub fn canonical_site_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// A configured site
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Site {
    pub id: i64,
    pub url: String,
    pub name: String,
    pub status: String,
    pub status_time: String,
    pub last_error: Option<String>,
    /// Process currently holding the indexing claim
    pub lease_owner: Option<String>,
    /// Claim expiry in unix milliseconds
    pub lease_expires: Option<i64>,
}

impl Site {
    pub fn status(&self) -> Result<SiteStatus> {
        self.status.parse()
    }

    /// Whether some process holds a live indexing claim on this site
    pub fn lease_active(&self) -> bool {
        matches!(self.status(), Ok(SiteStatus::Indexing))
            && self.lease_expires.is_some_and(|t| t >= now_millis())
    }

    /// Root URL to start crawling from
    pub fn root_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| Error::InvalidUrl(format!("{}: {}", self.url, e)))?;
        if url.path().is_empty() {
            url.set_path("/");
        }
        Ok(url)
    }
}

/// A fetched page
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Page {
    pub id: i64,
    pub site_id: i64,
    pub path: String,
    pub code: i64,
    pub title: Option<String>,
    pub content: String,
    pub content_hash: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A site-scoped lemma
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Lemma {
    pub id: i64,
    pub site_id: i64,
    pub lemma: String,
    pub frequency: i64,
}

/// A lemma occurrence on a page
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Posting {
    pub id: i64,
    pub page_id: i64,
    pub lemma_id: i64,
    pub lemma: String,
    pub rank: f64,
}

/// Page data ready to be written
#[derive(Debug, Clone)]
pub struct PageDraft {
    pub path: String,
    pub code: u16,
    pub title: Option<String>,
    pub content: String,
}

impl PageDraft {
    pub fn content_hash(&self) -> String {
        blake3::hash(self.content.as_bytes()).to_hex().to_string()
    }
}

/// Outcome of writing one page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageWrite {
    /// First time this path was indexed
    Created(i64),
    /// Content changed; postings were replaced
    Replaced(i64),
    /// Same content as stored; nothing written
    Unchanged(i64),
}

impl PageWrite {
    pub fn page_id(&self) -> i64 {
        match self {
            PageWrite::Created(id) | PageWrite::Replaced(id) | PageWrite::Unchanged(id) => *id,
        }
    }
}

/// One posting matched by a search
#[derive(Debug, Clone, FromRow)]
pub struct PostingHit {
    pub page_id: i64,
    pub lemma: String,
    pub rank: f64,
}

/// A page joined with its owning site, for rendering results
#[derive(Debug, Clone, FromRow)]
pub struct PageHit {
    pub id: i64,
    pub path: String,
    pub title: Option<String>,
    pub content: String,
    pub site_url: String,
    pub site_name: String,
}

/// An indexing run record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct IndexingRun {
    pub id: String,
    pub site_id: i64,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub status: String,
    pub pages_indexed: i64,
    pub pages_failed: i64,
    pub errors_json: Option<String>,
}

impl IndexingRun {
    pub fn new(site_id: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            site_id,
            started_at: Utc::now().to_rfc3339(),
            completed_at: None,
            status: RunStatus::Running.to_string(),
            pages_indexed: 0,
            pages_failed: 0,
            errors_json: None,
        }
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors_json
            .as_ref()
            .and_then(|j| serde_json::from_str(j).ok())
            .unwrap_or_default()
    }
}

/// Index database handle
#[derive(Clone)]
pub struct MetaDb {
    pool: SqlitePool,
}

impl MetaDb {
    /// Connect to the database named by the configuration
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::new(&config.paths.db_file).await
    }

    /// Create database with path directly, initializing the schema if needed
    pub async fn new(db_path: &std::path::Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };

        if !db.is_initialized().await? {
            db.init_schema().await?;
        }
        db.migrate_site_leases().await?;

        Ok(db)
    }

    async fn migrate_site_leases(&self) -> Result<()> {
        for (column, ddl) in SITE_LEASE_COLUMNS {
            let present: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info('sites') WHERE name = ?")
                    .bind(column)
                    .fetch_one(&self.pool)
                    .await?;
            if present == 0 {
                info!("Adding sites.{} column", column);
                sqlx::query(ddl).execute(&self.pool).await?;
            }
        }
        Ok(())
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing database schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Check if database is initialized
    pub async fn is_initialized(&self) -> Result<bool> {
        let result: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM sqlite_master WHERE type='table' AND name='postings'")
                .fetch_optional(&self.pool)
                .await?;
        Ok(result.is_some())
    }

    // ===== Site Operations =====

    /// Insert a site or refresh the name of an existing one. New sites
    /// start in INDEXING because they are created when a crawl starts.
    pub async fn upsert_site(&self, url: &str, name: &str) -> Result<Site> {
        let site = sqlx::query_as::<_, Site>(
            r#"
            INSERT INTO sites (url, name, status, status_time, last_error)
            VALUES (?, ?, ?, ?, NULL)
            ON CONFLICT(url) DO UPDATE SET name = excluded.name
            RETURNING *
            "#,
        )
        .bind(canonical_site_url(url))
        .bind(name)
        .bind(SiteStatus::Indexing.to_string())
        .bind(Utc::now().to_rfc3339())
        .fetch_one(&self.pool)
        .await?;
        Ok(site)
    }

    /// Get site by ID
    pub async fn get_site(&self, id: i64) -> Result<Option<Site>> {
        let site = sqlx::query_as::<_, Site>("SELECT * FROM sites WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(site)
    }

    /// Get site by root URL (trailing slash insensitive)
    pub async fn get_site_by_url(&self, url: &str) -> Result<Option<Site>> {
        let site = sqlx::query_as::<_, Site>("SELECT * FROM sites WHERE url = ?")
            .bind(canonical_site_url(url))
            .fetch_optional(&self.pool)
            .await?;
        Ok(site)
    }

    /// List all sites
    pub async fn list_sites(&self) -> Result<Vec<Site>> {
        let sites = sqlx::query_as::<_, Site>("SELECT * FROM sites ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(sites)
    }

    /// Move a site to a new status, stamping `status_time`
    pub async fn set_site_status(
        &self,
        id: i64,
        status: SiteStatus,
        last_error: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE sites SET status = ?, status_time = ?, last_error = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(Utc::now().to_rfc3339())
            .bind(last_error)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ===== Indexing Claims =====

    /// Claim a site for indexing on behalf of `owner`.
    ///
    /// The check and the state change are one statement, so across any
    /// number of processes at most one claim on a site is live. A site can
    /// be claimed when it is not INDEXING or when the previous claim has
    /// lapsed. Claiming moves the site to INDEXING and clears `last_error`.
    pub async fn claim_site(&self, id: i64, owner: &str, lease: Duration) -> Result<bool> {
        let indexing = SiteStatus::Indexing.to_string();
        let result = sqlx::query(
            r#"
            UPDATE sites
            SET status = ?, status_time = ?, last_error = NULL, lease_owner = ?, lease_expires = ?
            WHERE id = ? AND (status != ? OR lease_expires IS NULL OR lease_expires < ?)
            "#,
        )
        .bind(&indexing)
        .bind(Utc::now().to_rfc3339())
        .bind(owner)
        .bind(lease_expiry(lease))
        .bind(id)
        .bind(&indexing)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Extend a claim held by `owner`; false if the claim was lost
    pub async fn renew_claim(&self, id: i64, owner: &str, lease: Duration) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE sites SET lease_expires = ? WHERE id = ? AND lease_owner = ? AND status = ?",
        )
        .bind(lease_expiry(lease))
        .bind(id)
        .bind(owner)
        .bind(SiteStatus::Indexing.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Set the final status of a claimed site and drop the claim. Does
    /// nothing (returns false) if `owner` no longer holds it.
    pub async fn release_site(
        &self,
        id: i64,
        owner: &str,
        status: SiteStatus,
        last_error: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sites
            SET status = ?, status_time = ?, last_error = ?, lease_owner = NULL, lease_expires = NULL
            WHERE id = ? AND lease_owner = ?
            "#,
        )
        .bind(status.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(last_error)
        .bind(id)
        .bind(owner)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Move INDEXING sites whose claim is missing or expired to FAILED,
    /// returning their URLs. Sites with a live claim are left alone.
    pub async fn fail_abandoned_sites(&self, reason: &str) -> Result<Vec<String>> {
        let urls: Vec<String> = sqlx::query_scalar(
            r#"
            UPDATE sites
            SET status = ?, status_time = ?, last_error = ?, lease_owner = NULL, lease_expires = NULL
            WHERE status = ? AND (lease_expires IS NULL OR lease_expires < ?)
            RETURNING url
            "#,
        )
        .bind(SiteStatus::Failed.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(reason)
        .bind(SiteStatus::Indexing.to_string())
        .bind(now_millis())
        .fetch_all(&self.pool)
        .await?;
        Ok(urls)
    }

    // ===== Page Operations =====

    /// Get page by site and path
    pub async fn get_page(&self, site_id: i64, path: &str) -> Result<Option<Page>> {
        let page = sqlx::query_as::<_, Page>("SELECT * FROM pages WHERE site_id = ? AND path = ?")
            .bind(site_id)
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(page)
    }

    /// List page paths of a site
    pub async fn list_page_paths(&self, site_id: i64) -> Result<Vec<String>> {
        let paths = sqlx::query_scalar("SELECT path FROM pages WHERE site_id = ? ORDER BY id")
            .bind(site_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(paths)
    }

    /// Write a page and its lemma counts in one transaction.
    ///
    /// Re-indexing a path replaces its postings: the previous ranks are
    /// first subtracted from the site's lemma frequencies, so indexing the
    /// same content any number of times leaves the counts unchanged.
    pub async fn index_page(
        &self,
        site_id: i64,
        draft: &PageDraft,
        lemmas: &LemmaCounts,
    ) -> Result<PageWrite> {
        let mut attempt = 1;
        loop {
            match self.write_page(site_id, draft, lemmas).await {
                Err(e) if e.is_transient() && attempt < PAGE_WRITE_ATTEMPTS => {
                    debug!(
                        site_id,
                        page = %draft.path,
                        "Page write contended (attempt {}): {}",
                        attempt,
                        e
                    );
                    tokio::time::sleep(PAGE_WRITE_BACKOFF * attempt).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn write_page(
        &self,
        site_id: i64,
        draft: &PageDraft,
        lemmas: &LemmaCounts,
    ) -> Result<PageWrite> {
        let hash = draft.content_hash();
        let now = Utc::now().to_rfc3339();
        // Take the write lock up front; a deferred transaction that reads
        // first cannot wait for the lock when it upgrades
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let existing: Option<(i64, String)> =
            sqlx::query_as("SELECT id, content_hash FROM pages WHERE site_id = ? AND path = ?")
                .bind(site_id)
                .bind(&draft.path)
                .fetch_optional(&mut *tx)
                .await?;

        let write = match existing {
            Some((page_id, old_hash)) if old_hash == hash => {
                tx.rollback().await?;
                return Ok(PageWrite::Unchanged(page_id));
            }
            Some((page_id, _)) => {
                release_postings(&mut tx, page_id).await?;
                sqlx::query(
                    r#"
                    UPDATE pages SET code = ?, title = ?, content = ?, content_hash = ?, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(i64::from(draft.code))
                .bind(&draft.title)
                .bind(&draft.content)
                .bind(&hash)
                .bind(&now)
                .bind(page_id)
                .execute(&mut *tx)
                .await?;
                PageWrite::Replaced(page_id)
            }
            None => {
                let page_id: i64 = sqlx::query_scalar(
                    r#"
                    INSERT INTO pages (site_id, path, code, title, content, content_hash, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    RETURNING id
                    "#,
                )
                .bind(site_id)
                .bind(&draft.path)
                .bind(i64::from(draft.code))
                .bind(&draft.title)
                .bind(&draft.content)
                .bind(&hash)
                .bind(&now)
                .bind(&now)
                .fetch_one(&mut *tx)
                .await?;
                PageWrite::Created(page_id)
            }
        };

        let page_id = write.page_id();
        for (lemma, count) in lemmas {
            let delta = i64::from(*count);
            let lemma_id = upsert_lemma_on(&mut tx, site_id, lemma, delta).await?;
            upsert_posting_on(&mut tx, page_id, lemma_id, lemma, delta as f64).await?;
        }

        tx.commit().await?;
        debug!(
            site_id,
            page = %draft.path,
            lemmas = lemmas.len(),
            "Indexed page"
        );
        Ok(write)
    }

    /// Delete pages of a site whose paths are not in `keep`, releasing their
    /// postings. Returns the removed paths.
    pub async fn delete_stale_pages(&self, site_id: i64, keep: &[String]) -> Result<Vec<String>> {
        let stored: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, path FROM pages WHERE site_id = ?")
                .bind(site_id)
                .fetch_all(&self.pool)
                .await?;

        let keep: std::collections::HashSet<&str> = keep.iter().map(String::as_str).collect();
        let mut removed = Vec::new();

        for (page_id, path) in stored {
            if keep.contains(path.as_str()) {
                continue;
            }
            let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
            release_postings(&mut tx, page_id).await?;
            sqlx::query("DELETE FROM pages WHERE id = ?")
                .bind(page_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            removed.push(path);
        }

        Ok(removed)
    }

    /// Fetch pages with their owning site
    pub async fn get_page_hits(&self, page_ids: &[i64]) -> Result<Vec<PageHit>> {
        if page_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; page_ids.len()].join(",");
        let query = format!(
            r#"
            SELECT p.id, p.path, p.title, p.content, s.url AS site_url, s.name AS site_name
            FROM pages p
            JOIN sites s ON s.id = p.site_id
            WHERE p.id IN ({})
            "#,
            placeholders
        );
        let mut query_builder = sqlx::query_as::<_, PageHit>(&query);
        for id in page_ids {
            query_builder = query_builder.bind(id);
        }
        Ok(query_builder.fetch_all(&self.pool).await?)
    }

    // ===== Lemma / Posting Operations =====

    /// Add `delta` occurrences of a lemma to a site's dictionary, creating
    /// the lemma on first sighting. Returns the lemma id.
    pub async fn upsert_lemma(&self, site_id: i64, lemma: &str, delta: i64) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        upsert_lemma_on(&mut conn, site_id, lemma, delta).await
    }

    /// Add `rank_delta` to the posting of a lemma on a page, creating it if
    /// absent. The lemma must belong to the page's site.
    pub async fn upsert_posting(
        &self,
        page_id: i64,
        lemma_id: i64,
        lemma: &str,
        rank_delta: f64,
    ) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        upsert_posting_on(&mut conn, page_id, lemma_id, lemma, rank_delta).await
    }

    /// Get a lemma by site and text
    pub async fn get_lemma(&self, site_id: i64, lemma: &str) -> Result<Option<Lemma>> {
        let row = sqlx::query_as::<_, Lemma>("SELECT * FROM lemmas WHERE site_id = ? AND lemma = ?")
            .bind(site_id)
            .bind(lemma)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Postings of a page
    pub async fn get_postings(&self, page_id: i64) -> Result<Vec<Posting>> {
        let rows = sqlx::query_as::<_, Posting>(
            "SELECT * FROM postings WHERE page_id = ? ORDER BY lemma",
        )
        .bind(page_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// All postings for any of the given lemmas, optionally within one site
    pub async fn postings_for_lemmas(
        &self,
        lemmas: &[String],
        site_id: Option<i64>,
    ) -> Result<Vec<PostingHit>> {
        if lemmas.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; lemmas.len()].join(",");
        let site_clause = if site_id.is_some() {
            " AND l.site_id = ?"
        } else {
            ""
        };
        let query = format!(
            r#"
            SELECT i.page_id, l.lemma, i.rank
            FROM postings i
            JOIN lemmas l ON l.id = i.lemma_id
            WHERE l.lemma IN ({}){}
            "#,
            placeholders, site_clause
        );

        let mut query_builder = sqlx::query_as::<_, PostingHit>(&query);
        for lemma in lemmas {
            query_builder = query_builder.bind(lemma);
        }
        if let Some(id) = site_id {
            query_builder = query_builder.bind(id);
        }
        Ok(query_builder.fetch_all(&self.pool).await?)
    }

    // ===== Indexing Run Operations =====

    /// Start a new indexing run
    pub async fn start_run(&self, site_id: i64) -> Result<IndexingRun> {
        let run = IndexingRun::new(site_id);
        sqlx::query(
            r#"
            INSERT INTO indexing_runs (id, site_id, started_at, status, pages_indexed, pages_failed)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(run.site_id)
        .bind(&run.started_at)
        .bind(&run.status)
        .bind(run.pages_indexed)
        .bind(run.pages_failed)
        .execute(&self.pool)
        .await?;
        Ok(run)
    }

    /// Complete an indexing run
    pub async fn complete_run(
        &self,
        id: &str,
        status: RunStatus,
        pages_indexed: i64,
        pages_failed: i64,
        errors: &[String],
    ) -> Result<()> {
        let errors_json = if errors.is_empty() {
            None
        } else {
            Some(serde_json::to_string(errors)?)
        };
        sqlx::query(
            r#"
            UPDATE indexing_runs SET
                completed_at = ?,
                status = ?,
                pages_indexed = ?,
                pages_failed = ?,
                errors_json = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(status.to_string())
        .bind(pages_indexed)
        .bind(pages_failed)
        .bind(errors_json)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get latest indexing run for a site
    pub async fn latest_run(&self, site_id: i64) -> Result<Option<IndexingRun>> {
        let run = sqlx::query_as::<_, IndexingRun>(
            "SELECT * FROM indexing_runs WHERE site_id = ? ORDER BY started_at DESC LIMIT 1",
        )
        .bind(site_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(run)
    }

    // ===== Statistics =====

    /// Get site statistics
    pub async fn site_stats(&self, site_id: i64) -> Result<SiteStats> {
        let page_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pages WHERE site_id = ?")
            .bind(site_id)
            .fetch_one(&self.pool)
            .await?;

        let lemma_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM lemmas WHERE site_id = ? AND frequency > 0")
                .bind(site_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(SiteStats {
            page_count: page_count as usize,
            lemma_count: lemma_count as usize,
        })
    }

    /// Get global statistics
    pub async fn global_stats(&self) -> Result<GlobalStats> {
        let site_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sites")
            .fetch_one(&self.pool)
            .await?;

        let page_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pages")
            .fetch_one(&self.pool)
            .await?;

        let lemma_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM lemmas WHERE frequency > 0")
            .fetch_one(&self.pool)
            .await?;

        Ok(GlobalStats {
            site_count: site_count as usize,
            page_count: page_count as usize,
            lemma_count: lemma_count as usize,
        })
    }
}

async fn upsert_lemma_on(
    conn: &mut SqliteConnection,
    site_id: i64,
    lemma: &str,
    delta: i64,
) -> Result<i64> {
    let id = sqlx::query_scalar(
        r#"
        INSERT INTO lemmas (site_id, lemma, frequency)
        VALUES (?, ?, ?)
        ON CONFLICT(site_id, lemma) DO UPDATE SET frequency = frequency + excluded.frequency
        RETURNING id
        "#,
    )
    .bind(site_id)
    .bind(lemma)
    .bind(delta)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

async fn upsert_posting_on(
    conn: &mut SqliteConnection,
    page_id: i64,
    lemma_id: i64,
    lemma: &str,
    rank_delta: f64,
) -> Result<i64> {
    // The join rejects postings whose lemma belongs to another site
    let id: Option<i64> = sqlx::query_scalar(
        r#"
        INSERT INTO postings (page_id, lemma_id, lemma, rank)
        SELECT p.id, l.id, l.lemma, ?
        FROM pages p
        JOIN lemmas l ON l.site_id = p.site_id
        WHERE p.id = ? AND l.id = ? AND l.lemma = ?
        ON CONFLICT(page_id, lemma_id) DO UPDATE SET rank = postings.rank + excluded.rank
        RETURNING id
        "#,
    )
    .bind(rank_delta)
    .bind(page_id)
    .bind(lemma_id)
    .bind(lemma)
    .fetch_optional(&mut *conn)
    .await?;

    id.ok_or_else(|| {
        Error::Other(format!(
            "posting rejected: lemma {} ('{}') does not belong to the site of page {}",
            lemma_id, lemma, page_id
        ))
    })
}

/// Subtract a page's posting ranks from its lemmas' frequencies and drop
/// the postings
async fn release_postings(conn: &mut SqliteConnection, page_id: i64) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE lemmas SET frequency = MAX(0, frequency - COALESCE(
            (SELECT CAST(i.rank AS INTEGER) FROM postings i
             WHERE i.lemma_id = lemmas.id AND i.page_id = ?), 0))
        WHERE id IN (SELECT lemma_id FROM postings WHERE page_id = ?)
        "#,
    )
    .bind(page_id)
    .bind(page_id)
    .execute(&mut *conn)
    .await?;

    sqlx::query("DELETE FROM postings WHERE page_id = ?")
        .bind(page_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Statistics for a single site
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteStats {
    pub page_count: usize,
    pub lemma_count: usize,
}

/// Global statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalStats {
    pub site_count: usize,
    pub page_count: usize,
    pub lemma_count: usize,
}
