//! Scorer adapter
//!
//! Wraps an [`EmbeddingBackend`] behind one contract: given an audio file
//! and candidate theme names, return the best-matching theme and its cosine
//! similarity, or `None` when scoring is off.
//!
//! - Disabled: always `Ok(None)`.
//! - Backend fails to load: the first call returns the error, the adapter
//!   marks itself unavailable, and every later call returns `Ok(None)`
//!   without retrying the load.
//! - Loaded: per-call inference errors are returned to the caller.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use themebank_common::{Error, Result};
use tracing::{info, warn};

use crate::models::Theme;

/// Audio/text embedding model
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Prepare the model. Called at most once per adapter.
    async fn load(&self) -> Result<()>;

    /// Embedding of an audio file
    async fn embed_audio(&self, path: &Path) -> Result<Vec<f32>>;

    /// One embedding per input text, in order
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Best theme for a clip
#[derive(Debug, Clone, PartialEq)]
pub struct ThemeScore {
    pub theme: String,
    pub similarity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadState {
    NotLoaded,
    Ready,
    Unavailable,
}

/// Scoring adapter shared by the segment processor and the bank filler
pub struct Scorer {
    backend: Option<Arc<dyn EmbeddingBackend>>,
    state: tokio::sync::Mutex<LoadState>,
    text_cache: Mutex<HashMap<String, Vec<f32>>>,
}

impl Scorer {
    /// Scoring turned off
    pub fn disabled() -> Self {
        Self {
            backend: None,
            state: tokio::sync::Mutex::new(LoadState::Unavailable),
            text_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Scoring through `backend`, loaded lazily on first use
    pub fn new(backend: Arc<dyn EmbeddingBackend>) -> Self {
        Self {
            backend: Some(backend),
            state: tokio::sync::Mutex::new(LoadState::NotLoaded),
            text_cache: Mutex::new(HashMap::new()),
        }
    }

    /// True unless disabled or a load already failed
    pub async fn is_available(&self) -> bool {
        self.backend.is_some() && *self.state.lock().await != LoadState::Unavailable
    }

    /// Score `audio_path` against the prompts of `candidate_names`.
    ///
    /// Names are matched to `themes` case-insensitively; unknown names are
    /// ignored. Ties go to the earlier candidate, so callers list the
    /// target theme first.
    pub async fn score(
        &self,
        audio_path: &Path,
        themes: &[Theme],
        candidate_names: &[String],
    ) -> Result<Option<ThemeScore>> {
        let Some(backend) = self.ensure_loaded().await? else {
            return Ok(None);
        };

        let candidates: Vec<&Theme> = candidate_names
            .iter()
            .filter_map(|name| themes.iter().find(|t| t.name.eq_ignore_ascii_case(name)))
            .collect();
        if candidates.is_empty() {
            return Ok(None);
        }

        let prompts: Vec<String> = candidates.iter().map(|t| t.prompt.clone()).collect();
        let text_embeddings = self.text_embeddings(&backend, &prompts).await?;
        let audio_embedding = normalized(backend.embed_audio(audio_path).await?);

        let mut best: Option<ThemeScore> = None;
        for (theme, text_embedding) in candidates.iter().zip(text_embeddings.iter()) {
            let similarity = dot(&audio_embedding, text_embedding)?;
            if best.as_ref().map_or(true, |b| similarity > b.similarity) {
                best = Some(ThemeScore {
                    theme: theme.name.clone(),
                    similarity,
                });
            }
        }

        Ok(best)
    }

    async fn ensure_loaded(&self) -> Result<Option<Arc<dyn EmbeddingBackend>>> {
        let Some(backend) = self.backend.clone() else {
            return Ok(None);
        };

        let mut state = self.state.lock().await;
        match *state {
            LoadState::Ready => Ok(Some(backend)),
            LoadState::Unavailable => Ok(None),
            LoadState::NotLoaded => match backend.load().await {
                Ok(()) => {
                    info!("Embedding backend loaded");
                    *state = LoadState::Ready;
                    Ok(Some(backend))
                }
                Err(e) => {
                    warn!(error = %e, "Embedding backend unavailable, scoring disabled for this run");
                    *state = LoadState::Unavailable;
                    Err(Error::External(format!("Scoring backend unavailable: {}", e)))
                }
            },
        }
    }

    /// Unit-normalized embeddings for `prompts`, cached per prompt text
    async fn text_embeddings(
        &self,
        backend: &Arc<dyn EmbeddingBackend>,
        prompts: &[String],
    ) -> Result<Vec<Vec<f32>>> {
        let missing: Vec<String> = {
            let cache = self.cache();
            let mut seen = HashSet::new();
            prompts
                .iter()
                .filter(|p| !cache.contains_key(*p) && seen.insert(p.as_str()))
                .cloned()
                .collect()
        };

        if !missing.is_empty() {
            let embeddings = backend.embed_texts(&missing).await?;
            if embeddings.len() != missing.len() {
                return Err(Error::External(format!(
                    "Embedding count mismatch: expected {}, got {}",
                    missing.len(),
                    embeddings.len()
                )));
            }
            let mut cache = self.cache();
            for (prompt, embedding) in missing.into_iter().zip(embeddings) {
                cache.insert(prompt, normalized(embedding));
            }
        }

        let cache = self.cache();
        prompts
            .iter()
            .map(|p| {
                cache
                    .get(p)
                    .cloned()
                    .ok_or_else(|| Error::Internal(format!("Missing cached embedding for '{}'", p)))
            })
            .collect()
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<f32>>> {
        self.text_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Scale to unit length; the zero vector stays zero
pub fn normalized(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

/// Cosine similarity of two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    dot(&normalized(a.to_vec()), &normalized(b.to_vec()))
}

fn dot(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(Error::External(format!(
            "Embedding dimension mismatch: {} vs {}",
            a.len(),
            b.len()
        )));
    }
    Ok(a.iter().zip(b).map(|(x, y)| x * y).sum())
}
