//! Search query expansion
//!
//! Turns each theme's search words into a list of concrete search phrases.
//! The bank filler rotates through these; without an expander it rotates
//! through the raw comma-separated search words instead.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ExpansionConfig;
use crate::models::slice::write_json;
use crate::models::Theme;

/// Phrase list per theme name
pub type Expansions = BTreeMap<String, Vec<String>>;

/// Source of expanded search phrases
#[async_trait]
pub trait QueryExpander: Send + Sync {
    /// `samples_per_theme` phrases for every theme, keyed by theme name
    async fn expand(&self, themes: &[Theme], samples_per_theme: usize)
        -> themebank_common::Result<Expansions>;
}

/// Query expansion errors
#[derive(Debug, Error)]
pub enum ExpansionError {
    #[error("API key not set (environment variable {0})")]
    MissingApiKey(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Chat API error {0}: {1}")]
    ApiError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl From<ExpansionError> for themebank_common::Error {
    fn from(err: ExpansionError) -> Self {
        themebank_common::Error::External(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// [`QueryExpander`] over an OpenAI-compatible chat completions endpoint
pub struct ChatQueryExpander {
    http_client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    queries_per_word: usize,
}

impl ChatQueryExpander {
    /// Build from configuration; the API key is read from `config.api_key_env`
    pub fn from_config(config: &ExpansionConfig) -> Result<Self, ExpansionError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ExpansionError::MissingApiKey(config.api_key_env.clone()))?;

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| ExpansionError::NetworkError(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            queries_per_word: config.queries_per_theme.max(1),
        })
    }

    /// Ask the model for phrases for one search word
    async fn expand_word(&self, word: &str, prompt: &str) -> Result<Vec<String>, ExpansionError> {
        let instruction = format!(
            "Create {count} YouTube search queries for the word \"{word}\". \
             The clips should sound like: {prompt}\n\
             Each query must include the word \"{word}\", a descriptive term matching that sound, \
             and a YouTube-style term such as sound, effect, audio, ASMR or compilation.\n\
             Return only a JSON array of {count} strings.",
            count = self.queries_per_word,
            word = word,
            prompt = prompt
        );

        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You are a search query generator. Return only JSON arrays."},
                {"role": "user", "content": instruction}
            ],
            "temperature": 0.6,
            "max_tokens": 200
        });

        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExpansionError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ExpansionError::ApiError(status.as_u16(), error_text));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ExpansionError::ParseError(e.to_string()))?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ExpansionError::ParseError("empty completion".to_string()))?;

        let phrases = parse_phrase_list(&content)
            .ok_or_else(|| ExpansionError::ParseError(format!("no phrase list in '{}'", content)))?;
        Ok(phrases.into_iter().take(self.queries_per_word).collect())
    }
}

#[async_trait]
impl QueryExpander for ChatQueryExpander {
    async fn expand(
        &self,
        themes: &[Theme],
        samples_per_theme: usize,
    ) -> themebank_common::Result<Expansions> {
        let mut expansions = Expansions::new();

        for theme in themes {
            let mut phrases = Vec::new();
            for word in unique_words(theme.search_phrase()) {
                match self.expand_word(&word, &theme.prompt).await {
                    Ok(expanded) if !expanded.is_empty() => {
                        debug!(theme = %theme.name, word = %word, ?expanded, "Expanded search word");
                        phrases.extend(expanded);
                    }
                    Ok(_) => phrases.extend(fallback_phrases(&word)),
                    Err(e) => {
                        warn!(theme = %theme.name, word = %word, error = %e, "Query expansion failed, using fallback phrases");
                        phrases.extend(fallback_phrases(&word));
                    }
                }
            }

            let phrases = repeat_to(phrases, samples_per_theme);
            if let Some(first) = phrases.first() {
                info!(theme = %theme.name, first = %first, count = phrases.len(), "Expanded theme queries");
            }
            expansions.insert(theme.name.clone(), phrases);
        }

        Ok(expansions)
    }
}

/// Comma-separated search words, trimmed, empty and repeated entries dropped
pub fn unique_words(search: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    search
        .split(',')
        .map(str::trim)
        .filter(|w| !w.is_empty())
        .filter(|w| seen.insert(w.to_lowercase()))
        .map(str::to_string)
        .collect()
}

/// Phrases used when the model gives nothing usable for `word`
pub fn fallback_phrases(word: &str) -> Vec<String> {
    ["sound", "audio", "effect", "recording"]
        .iter()
        .map(|suffix| format!("{} {}", word, suffix))
        .collect()
}

/// Cycle `items` until there are `count` of them (empty stays empty)
pub fn repeat_to(items: Vec<String>, count: usize) -> Vec<String> {
    if items.is_empty() {
        return items;
    }
    items.iter().cycle().take(count).cloned().collect()
}

/// Pull a list of strings out of a completion: a bare JSON array, an object
/// holding one, or an array embedded in surrounding prose.
fn parse_phrase_list(content: &str) -> Option<Vec<String>> {
    let strings = |value: &Value| -> Option<Vec<String>> {
        let items: Vec<String> = value
            .as_array()?
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        (!items.is_empty()).then_some(items)
    };

    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if let Some(items) = strings(&value) {
            return Some(items);
        }
        if let Some(object) = value.as_object() {
            return object.values().find_map(strings);
        }
    }

    let start = trimmed.find('[')?;
    let end = trimmed.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&trimmed[start..=end])
        .ok()
        .as_ref()
        .and_then(strings)
}

/// Record of the expansions a session used
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionRecord {
    pub model: Option<String>,
    pub expansions: Expansions,
}

/// Write `expansions.json`
pub fn save_expansions(path: &Path, record: &ExpansionRecord) -> themebank_common::Result<()> {
    write_json(path, record)
}

/// Read a previous session's `expansions.json`, if there is one
pub fn load_expansions(path: &Path) -> Option<ExpansionRecord> {
    let text = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&text) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable expansions file");
            None
        }
    }
}
