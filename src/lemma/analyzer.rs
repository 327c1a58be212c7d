//! Morphological analyzers

use super::{MorphAnalyzer, WordForm};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;
use tracing::{debug, info};

/// Treats every lowercase word as its own lemma
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityAnalyzer;

impl MorphAnalyzer for IdentityAnalyzer {
    fn analyze(&self, word: &str) -> Option<WordForm> {
        Some(WordForm {
            lemma: word.to_lowercase(),
            info: None,
        })
    }

    fn name(&self) -> &str {
        "identity"
    }
}

/// Dictionary-backed analyzer.
///
/// The dictionary is a tab-separated file with one surface form per line:
/// `form<TAB>lemma[<TAB>grammatical info]`. Blank lines and lines starting
/// with `#` are ignored. Every lemma is also a form of itself.
#[derive(Debug, Clone, Default)]
pub struct DictionaryAnalyzer {
    forms: HashMap<String, WordForm>,
    strict: bool,
}

impl DictionaryAnalyzer {
    /// Build from `(form, lemma, info)` entries
    pub fn from_entries<I, S>(entries: I, strict: bool) -> Self
    where
        I: IntoIterator<Item = (S, S, Option<S>)>,
        S: Into<String>,
    {
        let mut forms = HashMap::new();
        for (form, lemma, info) in entries {
            let form = form.into().to_lowercase();
            let lemma = lemma.into().to_lowercase();
            let info: Option<String> = info.map(Into::into);
            forms
                .entry(lemma.clone())
                .or_insert_with(|| WordForm {
                    lemma: lemma.clone(),
                    info: info.clone(),
                });
            forms.insert(form, WordForm { lemma, info });
        }
        Self { forms, strict }
    }

    /// Parse a dictionary from any reader
    pub fn from_reader<R: BufRead>(reader: R, strict: bool) -> Result<Self> {
        let mut entries = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut cols = line.split('\t');
            let (Some(form), Some(lemma)) = (cols.next(), cols.next()) else {
                return Err(Error::Config(format!(
                    "lemma dictionary line {}: expected 'form<TAB>lemma'",
                    line_no + 1
                )));
            };
            let info = cols.next().map(str::to_string);
            entries.push((form.trim().to_string(), lemma.trim().to_string(), info));
        }
        Ok(Self::from_entries(entries, strict))
    }

    /// Load a dictionary file
    pub fn load(path: &Path, strict: bool) -> Result<Self> {
        debug!("Loading lemma dictionary from {:?}", path);
        let file = std::fs::File::open(path).map_err(|e| {
            Error::Config(format!(
                "cannot open lemma dictionary {}: {}",
                path.display(),
                e
            ))
        })?;
        let analyzer = Self::from_reader(std::io::BufReader::new(file), strict)?;
        info!(
            "Loaded lemma dictionary with {} forms from {}",
            analyzer.len(),
            path.display()
        );
        Ok(analyzer)
    }

    pub fn len(&self) -> usize {
        self.forms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forms.is_empty()
    }
}

impl MorphAnalyzer for DictionaryAnalyzer {
    fn analyze(&self, word: &str) -> Option<WordForm> {
        let lower = word.to_lowercase();
        match self.forms.get(&lower) {
            Some(form) => Some(form.clone()),
            None if self.strict => None,
            None => Some(WordForm {
                lemma: lower,
                info: None,
            }),
        }
    }

    fn name(&self) -> &str {
        "dictionary"
    }
}
