//! Segment processor
//!
//! Cuts a downloaded source into fixed-length candidate slices. Two modes:
//!
//! - **Sequential**: windows from offset 0, one stride apart.
//! - **Best-scoring**: up to [`MAX_TESTED_WINDOWS`] overlapping windows are
//!   scored against the target theme prompt and the top ones kept. Falls
//!   back to sequential when nothing could be scored.
//!
//! Every kept slice is claimed in the ledger by content hash; a collision
//! deletes the slice. The source file is deleted when processing ends,
//! whatever the outcome.

use chrono::Utc;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use themebank_common::{Error, FadeCurve, Result};
use tracing::{debug, info, warn};

use super::scorer::Scorer;
use crate::ledger::Ledger;
use crate::models::slice::remove_quietly;
use crate::models::{CandidateSlice, SelectionMethod, SliceMetadata, SourceMetadata, Theme, ThemeHint};
use crate::utils::{decode_audio_file, export_clip, hash_file_blocking, DecodedAudio};

/// Upper bound on windows scored per source in best-scoring mode
pub const MAX_TESTED_WINDOWS: usize = 20;

/// Smallest offset between tested windows in best-scoring mode
pub const MIN_TEST_STRIDE_MS: u64 = 200;

/// Window geometry shared by both modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceParams {
    pub clip_ms: u64,
    /// Maximum slices kept per source
    pub count: usize,
    pub stride_ms: u64,
}

impl SliceParams {
    /// Offset between windows tested in best-scoring mode
    pub fn test_stride_ms(&self) -> u64 {
        (self.stride_ms / 4).max(MIN_TEST_STRIDE_MS)
    }
}

struct ScoredWindow {
    start_ms: u64,
    score: f32,
    path: PathBuf,
}

/// Turns raw downloads into candidate slices
pub struct SegmentProcessor {
    ledger: Ledger,
    scorer: Arc<Scorer>,
    output_dir: PathBuf,
    fade_curve: FadeCurve,
}

impl SegmentProcessor {
    pub fn new(ledger: Ledger, scorer: Arc<Scorer>, output_dir: PathBuf, fade_curve: FadeCurve) -> Self {
        Self {
            ledger,
            scorer,
            output_dir,
            fade_curve,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Slice `source` sequentially. The source file is deleted afterwards.
    pub async fn slice_sequential(
        &self,
        source: &Path,
        params: SliceParams,
        metadata: &SourceMetadata,
    ) -> Result<Vec<CandidateSlice>> {
        let result = match self.decode(source).await {
            Ok(audio) => self.sequential_from(source, &audio, params, metadata).await,
            Err(e) => Err(e),
        };
        remove_quietly(source);
        result
    }

    /// Slice `source` keeping the windows that best match `hint`'s prompt.
    /// The source file is deleted afterwards.
    pub async fn slice_best_scoring(
        &self,
        source: &Path,
        params: SliceParams,
        metadata: &SourceMetadata,
        hint: &ThemeHint,
    ) -> Result<Vec<CandidateSlice>> {
        let result = match self.decode(source).await {
            Ok(audio) => self.best_scoring_from(source, audio, params, metadata, hint).await,
            Err(e) => Err(e),
        };
        remove_quietly(source);
        result
    }

    async fn decode(&self, source: &Path) -> Result<Arc<DecodedAudio>> {
        let path = source.to_path_buf();
        let audio = tokio::task::spawn_blocking(move || decode_audio_file(&path))
            .await
            .map_err(|e| Error::Internal(format!("Decode task failed: {}", e)))??;
        Ok(Arc::new(audio))
    }

    async fn sequential_from(
        &self,
        source: &Path,
        audio: &Arc<DecodedAudio>,
        params: SliceParams,
        metadata: &SourceMetadata,
    ) -> Result<Vec<CandidateSlice>> {
        let duration_ms = audio.duration_ms();
        let mut slices = Vec::new();
        if duration_ms < params.clip_ms {
            debug!(
                source = %source.display(),
                duration_ms,
                clip_ms = params.clip_ms,
                "Source shorter than one clip"
            );
            return Ok(slices);
        }

        let stride = params.stride_ms.max(1);
        let stem = file_stem(source);
        let mut start_ms = 0u64;

        while slices.len() < params.count && start_ms + params.clip_ms <= duration_ms {
            let index = slices.len() + 1;
            let path = self.output_dir.join(format!("{}_s{}.wav", stem, index));

            let Some(hash) = self
                .export_and_hash(audio, start_ms, params.clip_ms, &path)
                .await?
            else {
                break;
            };

            if !self.claim(&hash, &path, metadata).await {
                debug!(path = %path.display(), start_ms, "Duplicate slice, advancing one stride");
                remove_quietly(&path);
                start_ms += stride;
                continue;
            }

            slices.push(CandidateSlice {
                path,
                metadata: SliceMetadata {
                    source: metadata.clone(),
                    slice_index: index,
                    start_ms,
                    duration_ms: params.clip_ms,
                    content_hash: hash,
                    selection: SelectionMethod::Sequential,
                    score: None,
                    scored_theme: None,
                    windows_tested: None,
                    created_at: Utc::now(),
                },
            });
            start_ms += stride;
        }

        Ok(slices)
    }

    async fn best_scoring_from(
        &self,
        source: &Path,
        audio: Arc<DecodedAudio>,
        params: SliceParams,
        metadata: &SourceMetadata,
        hint: &ThemeHint,
    ) -> Result<Vec<CandidateSlice>> {
        let duration_ms = audio.duration_ms();
        if duration_ms < params.clip_ms {
            return Ok(Vec::new());
        }
        if !self.scorer.is_available().await {
            return self.sequential_from(source, &audio, params, metadata).await;
        }

        let themes = [Theme::new(&hint.name, "", &hint.prompt)];
        let names = [hint.name.clone()];
        let stem = file_stem(source);
        let test_stride = params.test_stride_ms();

        let mut scored: Vec<ScoredWindow> = Vec::new();
        let mut start_ms = 0u64;
        let mut tested = 0usize;

        while tested < MAX_TESTED_WINDOWS && start_ms + params.clip_ms <= duration_ms {
            let path = self.output_dir.join(format!("{}_w{}.wav", stem, tested));
            tested += 1;

            if !self
                .export_window(&audio, start_ms, params.clip_ms, &path)
                .await?
            {
                break;
            }

            match self.scorer.score(&path, &themes, &names).await {
                Ok(Some(best)) => scored.push(ScoredWindow {
                    start_ms,
                    score: best.similarity,
                    path,
                }),
                Ok(None) => remove_quietly(&path),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Window scoring failed");
                    remove_quietly(&path);
                }
            }
            start_ms += test_stride;
        }

        if scored.is_empty() {
            info!(source = %source.display(), "No window could be scored, slicing sequentially");
            return self.sequential_from(source, &audio, params, metadata).await;
        }

        // Stable sort: equal scores keep the earlier window first
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        let windows_tested = scored.len();
        let rejected = scored.split_off(params.count.min(scored.len()));
        for window in &rejected {
            remove_quietly(&window.path);
        }

        debug!(
            source = %source.display(),
            windows_tested,
            best = scored.first().map(|w| w.score),
            "Selected best windows"
        );

        let mut slices = Vec::new();
        for (i, window) in scored.into_iter().enumerate() {
            let index = i + 1;
            let path = self.output_dir.join(format!("{}_s{}.wav", stem, index));
            if let Err(e) = std::fs::rename(&window.path, &path) {
                warn!(path = %window.path.display(), error = %e, "Could not keep scored window");
                remove_quietly(&window.path);
                continue;
            }

            let hash = hash_blocking(&path).await?;
            if !self.claim(&hash, &path, metadata).await {
                debug!(path = %path.display(), "Duplicate best window dropped");
                remove_quietly(&path);
                continue;
            }

            slices.push(CandidateSlice {
                path,
                metadata: SliceMetadata {
                    source: metadata.clone(),
                    slice_index: index,
                    start_ms: window.start_ms,
                    duration_ms: params.clip_ms,
                    content_hash: hash,
                    selection: SelectionMethod::BestScoring,
                    score: Some(window.score),
                    scored_theme: Some(hint.name.clone()),
                    windows_tested: Some(windows_tested),
                    created_at: Utc::now(),
                },
            });
        }

        Ok(slices)
    }

    /// Render and write one window; `false` when it does not fit the source
    async fn export_window(
        &self,
        audio: &Arc<DecodedAudio>,
        start_ms: u64,
        clip_ms: u64,
        path: &Path,
    ) -> Result<bool> {
        std::fs::create_dir_all(&self.output_dir)?;
        let audio = Arc::clone(audio);
        let path = path.to_path_buf();
        let curve = self.fade_curve;
        tokio::task::spawn_blocking(move || export_clip(&audio, start_ms, clip_ms, curve, &path))
            .await
            .map_err(|e| Error::Internal(format!("Render task failed: {}", e)))?
    }

    async fn export_and_hash(
        &self,
        audio: &Arc<DecodedAudio>,
        start_ms: u64,
        clip_ms: u64,
        path: &Path,
    ) -> Result<Option<String>> {
        if !self.export_window(audio, start_ms, clip_ms, path).await? {
            return Ok(None);
        }
        hash_blocking(path).await.map(Some)
    }

    async fn claim(&self, hash: &str, path: &Path, metadata: &SourceMetadata) -> bool {
        self.ledger
            .add_hash_if_absent(hash, Some(path), Some(&metadata.url), None)
            .await
    }
}

async fn hash_blocking(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || hash_file_blocking(&path))
        .await
        .map_err(|e| Error::Internal(format!("Hash task failed: {}", e)))?
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "source".to_string())
}
