//! Ranked keyword search over the index
//!
//! Query text is lemmatized exactly like page text. Candidate pages are
//! those with a posting for any query lemma; their scores are summed per
//! page, normalized by the best score and paginated before snippets are
//! built for the returned slice only.

mod rank;
mod snippet;

pub use rank::*;
pub use snippet::*;

use crate::config::SearchConfig;
use crate::error::{Error, Result};
use crate::lemma::LemmaExtractor;
use crate::meta::{MetaDb, PageHit, SiteStatus};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;
use url::Url;

/// Title shown for pages without one
pub const UNTITLED: &str = "untitled";

/// Search request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,
    /// Restrict to one site by root URL
    pub site: Option<String>,
    pub offset: usize,
    /// Page size; the configured default when absent
    pub limit: Option<usize>,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn site(mut self, site: impl Into<String>) -> Self {
        self.site = Some(site.into());
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One ranked page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Site base URL
    pub site: String,
    pub site_name: String,
    /// Path relative to the site
    pub uri: String,
    pub title: String,
    pub snippet: String,
    /// Normalized score in `[0, 1]`
    pub relevance: f64,
}

/// One page of results plus the total number of matches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub count: usize,
    pub results: Vec<SearchResult>,
}

/// Answers search queries from the index
pub struct SearchEngine {
    db: MetaDb,
    lemmas: LemmaExtractor,
    config: SearchConfig,
}

impl SearchEngine {
    pub fn new(db: MetaDb, lemmas: LemmaExtractor, config: SearchConfig) -> Self {
        Self { db, lemmas, config }
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResponse> {
        let query_lemmas = self.lemmas.query_lemmas(&query.text);
        if query_lemmas.is_empty() {
            return Err(Error::EmptyQuery);
        }

        let site_id = match &query.site {
            Some(url) => {
                let site = self
                    .db
                    .get_site_by_url(url)
                    .await?
                    .filter(|s| matches!(s.status(), Ok(SiteStatus::Indexed)))
                    .ok_or_else(|| Error::SiteNotIndexed(url.clone()))?;
                Some(site.id)
            }
            None => None,
        };

        let limit = query
            .limit
            .unwrap_or(self.config.default_limit)
            .min(self.config.max_limit);

        let hits = self.db.postings_for_lemmas(&query_lemmas, site_id).await?;
        let ranked = rank_pages(&hits);
        let count = ranked.len();
        debug!(
            "Query {:?} → lemmas {:?}, {} candidate pages",
            query.text, query_lemmas, count
        );

        let page = paginate(ranked, query.offset, limit);
        let ids: Vec<i64> = page.iter().map(|p| p.page_id).collect();
        let mut pages: HashMap<i64, PageHit> = self
            .db
            .get_page_hits(&ids)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let lemma_set: HashSet<String> = query_lemmas.into_iter().collect();
        let results = page
            .into_iter()
            .filter_map(|scored| {
                let hit = pages.remove(&scored.page_id)?;
                Some(SearchResult {
                    snippet: build_snippet(
                        &hit.content,
                        &lemma_set,
                        &self.lemmas,
                        self.config.snippet_chars,
                    ),
                    title: hit
                        .title
                        .filter(|t| !t.trim().is_empty())
                        .unwrap_or_else(|| UNTITLED.to_string()),
                    uri: relative_uri(&hit.site_url, &hit.path),
                    site: hit.site_url,
                    site_name: hit.site_name,
                    relevance: scored.relevance,
                })
            })
            .collect();

        Ok(SearchResponse { count, results })
    }
}

/// Page path relative to the site root, so that `site + uri` is the page
/// URL even for sites rooted below `/`
pub fn relative_uri(site_url: &str, path: &str) -> String {
    let root = Url::parse(site_url)
        .map(|u| u.path().trim_end_matches('/').to_string())
        .unwrap_or_default();
    if root.is_empty() {
        return path.to_string();
    }
    match path.strip_prefix(root.as_str()) {
        Some("") => "/".to_string(),
        Some(rest) if rest.starts_with('/') => rest.to_string(),
        _ => path.to_string(),
    }
}
