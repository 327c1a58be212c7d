//! siteseek - a small self-hosted site search engine
//!
//! This crate provides:
//! - A polite breadth-first crawler for a configured set of websites
//! - Text extraction and dictionary-driven lemmatization
//! - A per-site inverted index in SQLite with merge-on-write upserts
//! - Ranked keyword search with highlighted snippets
//! - Site indexing runs with single-flight guards, retries and cancellation

pub mod commands;
pub mod config;
pub mod crawl;
pub mod error;
pub mod indexer;
pub mod lemma;
pub mod meta;
pub mod parse;
pub mod progress;
pub mod search;

pub use config::Config;
pub use error::{Error, Result};
pub use indexer::SiteIndexer;
pub use search::SearchEngine;
