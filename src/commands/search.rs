//! Search command implementation

use crate::config::Config;
use crate::error::Result;
use crate::lemma::LemmaExtractor;
use crate::meta::MetaDb;
use crate::search::{SearchEngine, SearchQuery, SearchResponse};
use tracing::info;

/// Run a search against the index
pub async fn cmd_search(config: &Config, db: &MetaDb, query: &SearchQuery) -> Result<SearchResponse> {
    info!("Searching for {:?}", query.text);

    let lemmas = LemmaExtractor::from_config(&config.lemma)?;
    let engine = SearchEngine::new(db.clone(), lemmas, config.search.clone());
    engine.search(query).await
}

/// Print search results to console
pub fn print_search_results(query: &SearchQuery, response: &SearchResponse) {
    println!("\n🔍 Query: {}\n", query.text);

    if response.results.is_empty() {
        if response.count > 0 {
            println!("No results past offset {} ({} matches in total).", query.offset, response.count);
        } else {
            println!("No matches.");
        }
        return;
    }

    println!(
        "Showing {}-{} of {} results:\n",
        query.offset + 1,
        query.offset + response.results.len(),
        response.count
    );

    for (i, r) in response.results.iter().enumerate() {
        println!(
            "{}. [relevance: {:.3}] {}{}",
            query.offset + i + 1,
            r.relevance,
            r.site,
            r.uri
        );
        println!("   {} ({})", r.title, r.site_name);
        println!("   {}\n", r.snippet);
    }
}
