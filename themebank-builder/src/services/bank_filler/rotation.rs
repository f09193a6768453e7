//! Search phrase rotation for one theme

use std::collections::HashSet;

use crate::models::Theme;
use crate::services::query_expander::{repeat_to, unique_words};

/// Cycles through a theme's search phrases.
///
/// The current phrase is kept until `per_phrase` candidates were taken from
/// it, or until a batch for it comes back empty.
#[derive(Debug, Clone)]
pub struct PhraseRotation {
    phrases: Vec<String>,
    index: usize,
    taken: usize,
    per_phrase: usize,
}

impl PhraseRotation {
    /// Expanded phrases (first spelling of each, case-insensitive) when
    /// available, else the theme's comma-separated search words repeated to
    /// `target` entries
    pub fn for_theme(theme: &Theme, expanded: Option<&[String]>, target: usize, per_phrase: usize) -> Self {
        let phrases = match expanded.filter(|p| p.iter().any(|s| !s.trim().is_empty())) {
            Some(expanded) => {
                let mut seen = HashSet::new();
                expanded
                    .iter()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty() && seen.insert(s.to_lowercase()))
                    .collect()
            }
            None => {
                let mut words = unique_words(theme.search_phrase());
                if words.is_empty() {
                    words.push(theme.name.clone());
                }
                let count = target.max(words.len());
                repeat_to(words, count)
            }
        };
        Self::new(phrases, per_phrase)
    }

    pub fn new(phrases: Vec<String>, per_phrase: usize) -> Self {
        Self {
            phrases,
            index: 0,
            taken: 0,
            per_phrase: per_phrase.max(1),
        }
    }

    pub fn current(&self) -> Option<&str> {
        self.phrases.get(self.index).map(String::as_str)
    }

    /// Record the outcome of a batch for the current phrase
    pub fn record(&mut self, candidates: usize) {
        self.taken += candidates;
        if candidates == 0 || self.taken >= self.per_phrase {
            self.advance();
        }
    }

    fn advance(&mut self) {
        if !self.phrases.is_empty() {
            self.index = (self.index + 1) % self.phrases.len();
        }
        self.taken = 0;
    }

    /// Number of different phrases in the rotation (case-insensitive)
    pub fn distinct_count(&self) -> usize {
        self.phrases
            .iter()
            .map(|p| p.to_lowercase())
            .collect::<HashSet<_>>()
            .len()
    }
}
