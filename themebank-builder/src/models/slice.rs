//! Candidate slice and banked sample metadata
//!
//! Every audio file the pipeline produces carries a JSON sidecar with the
//! same stem (`clip.wav` + `clip.json`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use themebank_common::Result;

/// What is known about the source a slice was cut from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub url: String,
    /// Search hit id (platform video id for the default provider)
    pub source_id: String,
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub duration_seconds: Option<f64>,
    pub upload_date: Option<String>,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    pub search_term: String,
    /// Theme the source was fetched for
    pub theme_hint: Option<String>,
    /// Human-readable download strategy (`full_fast` / `ranged_precise 12s-24s`)
    pub download_strategy: Option<String>,
}

/// How a slice's window was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMethod {
    /// Windows taken in order from the start of the source
    Sequential,
    /// Highest-scoring windows against the target theme prompt
    BestScoring,
}

/// Sidecar metadata of a candidate slice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceMetadata {
    #[serde(flatten)]
    pub source: SourceMetadata,
    pub slice_index: usize,
    pub start_ms: u64,
    pub duration_ms: u64,
    pub content_hash: String,
    pub selection: SelectionMethod,
    /// Similarity computed during best-window selection
    pub score: Option<f32>,
    /// Theme the score was computed against
    pub scored_theme: Option<String>,
    /// Number of windows scored during best-window selection
    pub windows_tested: Option<usize>,
    pub created_at: DateTime<Utc>,
}

/// A fixed-duration clip waiting to be routed to a bank
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSlice {
    pub path: PathBuf,
    pub metadata: SliceMetadata,
}

impl CandidateSlice {
    /// Write the sidecar next to the audio file
    pub fn write_sidecar(&self) -> Result<()> {
        write_json(&sidecar_path(&self.path), &self.metadata)
    }

    /// Delete the audio file and its sidecar. Missing files are fine.
    pub fn discard(&self) {
        remove_quietly(&self.path);
        remove_quietly(&sidecar_path(&self.path));
    }
}

/// Sidecar of a sample that made it into a bank
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankedSample {
    #[serde(flatten)]
    pub slice: SliceMetadata,
    pub target_theme: String,
    pub assigned_theme: String,
    /// Similarity to the assigned theme; `None` when scoring was unavailable
    pub assignment_score: Option<f32>,
    pub bank_path: PathBuf,
    pub banked_at: DateTime<Utc>,
}

/// `clip.wav` → `clip.json`
pub fn sidecar_path(audio_path: &Path) -> PathBuf {
    audio_path.with_extension("json")
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}

pub(crate) fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!(path = %path.display(), error = %e, "Could not remove file");
        }
    }
}
