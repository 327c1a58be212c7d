//! Relevance scoring

use crate::meta::PostingHit;
use std::cmp::Ordering;
use std::collections::HashMap;

/// A candidate page with its summed and normalized score
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPage {
    pub page_id: i64,
    /// Sum of the page's posting ranks over the query lemmas
    pub score: f64,
    /// `score` divided by the best score in the candidate set
    pub relevance: f64,
}

/// Sum posting ranks per page, normalize by the maximum and order by
/// relevance descending, then page id ascending.
pub fn rank_pages(hits: &[PostingHit]) -> Vec<ScoredPage> {
    let mut totals: HashMap<i64, f64> = HashMap::new();
    for hit in hits {
        *totals.entry(hit.page_id).or_insert(0.0) += hit.rank;
    }

    let max = totals.values().copied().fold(0.0_f64, f64::max);

    let mut ranked: Vec<ScoredPage> = totals
        .into_iter()
        .map(|(page_id, score)| ScoredPage {
            page_id,
            score,
            relevance: if max > 0.0 { score / max } else { 0.0 },
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.page_id.cmp(&b.page_id))
    });
    ranked
}

/// Skip `offset` items, then take at most `limit`
pub fn paginate<T>(items: Vec<T>, offset: usize, limit: usize) -> Vec<T> {
    items.into_iter().skip(offset).take(limit).collect()
}
