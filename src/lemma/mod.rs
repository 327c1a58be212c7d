//! Tokenization and lemmatization
//!
//! Text is segmented into words (UAX #29) and split into runs of letters,
//! which are filtered, lowercased and mapped
//! to dictionary lemmas through a [`MorphAnalyzer`]. The result for one
//! document is a lemma → occurrence count multiset, the unit of work the
//! index store consumes.

mod analyzer;

pub use analyzer::*;

use crate::config::LemmaConfig;
use crate::error::Result;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use unicode_segmentation::UnicodeSegmentation;

/// Lemma plus grammatical information for one surface word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordForm {
    pub lemma: String,
    pub info: Option<String>,
}

/// Language-specific morphological lookup.
///
/// Implementations must be safe to call concurrently; a miss (`None`) means
/// the word contributes nothing, it is not an error.
pub trait MorphAnalyzer: Send + Sync {
    /// Map a lowercase surface word to its lemma
    fn analyze(&self, word: &str) -> Option<WordForm>;

    /// Analyzer name for logging
    fn name(&self) -> &str;
}

/// Create an analyzer based on configuration
pub fn create_analyzer(config: &LemmaConfig) -> Result<Arc<dyn MorphAnalyzer>> {
    match &config.dictionary {
        Some(path) => Ok(Arc::new(DictionaryAnalyzer::load(path, config.strict)?)),
        None => Ok(Arc::new(IdentityAnalyzer)),
    }
}

/// Lemma → occurrence count for one document. Ordered so that identical
/// input always yields an identical value.
pub type LemmaCounts = BTreeMap<String, u32>;

/// Script of a letter, used to reject mixed-script tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Script {
    Latin,
    Cyrillic,
    Greek,
    Other,
}

fn script_of(c: char) -> Script {
    match c {
        'a'..='z' | 'A'..='Z' | '\u{00C0}'..='\u{024F}' => Script::Latin,
        '\u{0400}'..='\u{052F}' => Script::Cyrillic,
        '\u{0370}'..='\u{03FF}' => Script::Greek,
        _ => Script::Other,
    }
}

/// Maximal runs of letters in `text` with their byte offsets. Anything that
/// is not a letter separates words, so `кот.сидит`, `snake_case` and
/// `don't` all break into their letter runs.
pub fn letter_runs(text: &str) -> impl Iterator<Item = (usize, &str)> + '_ {
    text.unicode_word_indices().flat_map(|(offset, word)| {
        split_letters(word)
            .into_iter()
            .map(move |(start, run)| (offset + start, run))
    })
}

fn split_letters(word: &str) -> Vec<(usize, &str)> {
    let mut runs = Vec::new();
    let mut start = None;
    for (i, c) in word.char_indices() {
        match (c.is_alphabetic(), start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                runs.push((s, &word[s..i]));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push((s, &word[s..]));
    }
    runs
}

/// Apply the token filter, returning the lowercase token if it survives
fn normalize_token(word: &str, min_len: usize) -> Option<String> {
    if word.chars().count() < min_len {
        return None;
    }
    if !word.chars().all(char::is_alphabetic) {
        return None;
    }
    let mut chars = word.chars();
    let first = script_of(chars.next()?);
    if chars.any(|c| script_of(c) != first) {
        return None;
    }
    Some(word.to_lowercase())
}

/// Turns plain text into lemma counts
#[derive(Clone)]
pub struct LemmaExtractor {
    analyzer: Arc<dyn MorphAnalyzer>,
    min_word_length: usize,
}

impl std::fmt::Debug for LemmaExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LemmaExtractor")
            .field("analyzer", &self.analyzer.name())
            .field("min_word_length", &self.min_word_length)
            .finish()
    }
}

impl LemmaExtractor {
    pub fn new(analyzer: Arc<dyn MorphAnalyzer>, min_word_length: usize) -> Self {
        Self {
            analyzer,
            min_word_length,
        }
    }

    pub fn from_config(config: &LemmaConfig) -> Result<Self> {
        Ok(Self::new(create_analyzer(config)?, config.min_word_length))
    }

    /// Lowercase tokens that pass the length/letters-only/single-script filter
    pub fn tokenize<'a>(&self, text: &'a str) -> impl Iterator<Item = String> + 'a {
        let min_len = self.min_word_length;
        letter_runs(text).filter_map(move |(_, word)| normalize_token(word, min_len))
    }

    /// Lemma of a single word, if the word survives the token filter and the
    /// analyzer knows it
    pub fn lemma_of(&self, word: &str) -> Option<String> {
        let token = normalize_token(word, self.min_word_length)?;
        self.analyzer.analyze(&token).map(|form| form.lemma)
    }

    /// Count lemma occurrences in a document
    pub fn extract(&self, text: &str) -> LemmaCounts {
        let mut counts = LemmaCounts::new();
        for token in self.tokenize(text) {
            if let Some(form) = self.analyzer.analyze(&token) {
                *counts.entry(form.lemma).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Distinct lemmas of a query in first-occurrence order
    pub fn query_lemmas(&self, query: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.tokenize(query)
            .filter_map(|token| self.analyzer.analyze(&token))
            .map(|form| form.lemma)
            .filter(|lemma| seen.insert(lemma.clone()))
            .collect()
    }
}
