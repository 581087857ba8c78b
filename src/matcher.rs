//! Keyword lookup against the tail of the input buffer.

use std::collections::HashSet;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use unicode_general_category::{get_general_category, GeneralCategory};

/// Characters whose typing ends a candidate keyword.
pub const DELIMITERS: [char; 8] = [' ', '\n', '\t', '.', ',', ';', '!', '?'];

pub fn is_delimiter(c: char) -> bool {
    DELIMITERS.contains(&c)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordEntry {
    pub keyword: String,
    pub content: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl KeywordEntry {
    pub fn new(keyword: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            content: content.into(),
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub entry: KeywordEntry,
    /// Keyword length in code points.
    pub keyword_length: usize,
    pub trigger: char,
}

/// Read-only view of the snippet catalog. Every call returns an independent
/// snapshot; callers never see a collection that is being mutated.
pub trait SnippetProvider: Send + Sync {
    fn enabled_entries(&self) -> Vec<KeywordEntry>;
}

/// In-memory catalog, replaced wholesale when the owner reloads it.
#[derive(Debug, Default)]
pub struct SnippetCatalog {
    entries: RwLock<Vec<KeywordEntry>>,
}

impl SnippetCatalog {
    pub fn new(entries: Vec<KeywordEntry>) -> Self {
        let catalog = Self::default();
        catalog.replace(entries);
        catalog
    }

    /// Swaps in a new entry list. Keywords are trimmed. Entries with a blank
    /// keyword or blank content are dropped, and so is any keyword that
    /// repeats an earlier one ignoring case.
    pub fn replace(&self, entries: Vec<KeywordEntry>) {
        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(entries.len());
        for mut entry in entries {
            entry.keyword = entry.keyword.trim().to_string();
            if entry.keyword.is_empty() || entry.content.trim().is_empty() {
                warn!("Dropping snippet with a blank keyword or content");
                continue;
            }
            if !seen.insert(entry.keyword.to_lowercase()) {
                warn!(keyword = %entry.keyword, "Dropping duplicate snippet keyword");
                continue;
            }
            kept.push(entry);
        }
        debug!("Catalog now holds {} snippets", kept.len());
        *self.entries.write() = kept;
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl SnippetProvider for SnippetCatalog {
    fn enabled_entries(&self) -> Vec<KeywordEntry> {
        self.entries
            .read()
            .iter()
            .filter(|entry| entry.enabled)
            .cloned()
            .collect()
    }
}

/// Finds the longest enabled keyword that ends `buffer` (before the trigger
/// `last_char`) at a word boundary. Ties go to the earlier catalog entry.
pub fn find_match(
    buffer: &str,
    last_char: char,
    provider: &dyn SnippetProvider,
) -> Option<MatchResult> {
    if !is_delimiter(last_char) {
        return None;
    }

    let mut text: Vec<char> = buffer.chars().collect();
    text.pop()?;
    if text.iter().all(|c| c.is_whitespace()) {
        return None;
    }

    let mut best: Option<(KeywordEntry, usize)> = None;

    for entry in provider.enabled_entries() {
        let keyword: Vec<char> = entry.keyword.chars().collect();
        let length = keyword.len();
        if length == 0 || length > text.len() {
            continue;
        }

        let start = text.len() - length;
        let is_suffix = text[start..]
            .iter()
            .zip(&keyword)
            .all(|(&a, &b)| chars_eq_ignore_case(a, b));
        if !is_suffix {
            continue;
        }

        if start > 0 && !is_word_boundary(text[start - 1]) {
            continue;
        }

        if best.as_ref().map_or(true, |(_, best_len)| length > *best_len) {
            best = Some((entry, length));
        }
    }

    best.map(|(entry, keyword_length)| MatchResult {
        entry,
        keyword_length,
        trigger: last_char,
    })
}

fn chars_eq_ignore_case(a: char, b: char) -> bool {
    a == b || a.to_lowercase().eq(b.to_lowercase())
}

fn is_word_boundary(c: char) -> bool {
    c.is_whitespace() || is_punctuation(c)
}

fn is_punctuation(c: char) -> bool {
    matches!(
        get_general_category(c),
        GeneralCategory::ConnectorPunctuation
            | GeneralCategory::DashPunctuation
            | GeneralCategory::OpenPunctuation
            | GeneralCategory::ClosePunctuation
            | GeneralCategory::InitialPunctuation
            | GeneralCategory::FinalPunctuation
            | GeneralCategory::OtherPunctuation
    )
}
