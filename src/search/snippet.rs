//! Highlighted result snippets

use crate::lemma::{letter_runs, LemmaExtractor};
use std::collections::HashSet;

const HIGHLIGHT_OPEN: &str = "<b>";
const HIGHLIGHT_CLOSE: &str = "</b>";
const ELLIPSIS: &str = "...";

/// Take the first `max_chars` characters of `content`, wrap every word whose
/// lemma (or lowercase form) is a query lemma in `<b>` tags and append an
/// ellipsis when the content was cut.
pub fn build_snippet(
    content: &str,
    query_lemmas: &HashSet<String>,
    lemmas: &LemmaExtractor,
    max_chars: usize,
) -> String {
    let (head, truncated) = match content.char_indices().nth(max_chars) {
        Some((cut, _)) => (&content[..cut], true),
        None => (content, false),
    };

    let mut snippet = String::with_capacity(head.len() + 16);
    let mut copied = 0;

    for (start, word) in letter_runs(head) {
        if !is_match(word, query_lemmas, lemmas) {
            continue;
        }
        snippet.push_str(&head[copied..start]);
        snippet.push_str(HIGHLIGHT_OPEN);
        snippet.push_str(word);
        snippet.push_str(HIGHLIGHT_CLOSE);
        copied = start + word.len();
    }
    snippet.push_str(&head[copied..]);

    if truncated {
        snippet.push_str(ELLIPSIS);
    }
    snippet
}

fn is_match(word: &str, query_lemmas: &HashSet<String>, lemmas: &LemmaExtractor) -> bool {
    if query_lemmas.contains(&word.to_lowercase()) {
        return true;
    }
    lemmas
        .lemma_of(word)
        .map(|lemma| query_lemmas.contains(&lemma))
        .unwrap_or(false)
}
