//! Search & Fetch
//!
//! Finds candidate sources for a search phrase, drops everything the ledger
//! or this session has already seen, downloads the survivors with bounded
//! concurrency and hands each download straight to the segment processor.
//!
//! A source URL is claimed in the ledger *before* anything is downloaded, so
//! two concurrent workers (or processes) never fetch the same source. Once
//! claimed, a URL stays used even if the source turns out to be unusable.

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use themebank_common::events::SkipReason;
use themebank_common::{BankEvent, Error, EventBus};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::media_source::{DownloadStrategy, FetchRequest, MediaFetcher, SearchHit, SearchProvider};
use super::scorer::Scorer;
use super::segment_processor::{SegmentProcessor, SliceParams};
use crate::config::{FetchConfig, RunConfig};
use crate::ledger::Ledger;
use crate::models::slice::remove_quietly;
use crate::models::{CandidateSlice, SourceMetadata, ThemeHint};
use crate::session_cache::SessionUrlCache;
use crate::utils::{hash_file, transcode_to_wav};

/// Hard cap on results requested from one search
pub const MAX_SEARCH_RESULTS: usize = 96;

/// Result of one `fetch_one` call
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Audio downloaded, rewritten as canonical WAV and claimed by content hash
    Fetched {
        path: PathBuf,
        metadata: SourceMetadata,
    },
    /// URL, video id or content was already consumed
    Duplicate,
    /// Source consumed without usable audio
    Unusable {
        reason: SkipReason,
        metadata: SourceMetadata,
    },
}

/// Collaborators shared by every fetch of a session
#[derive(Clone)]
pub struct FetchServices {
    pub search: Arc<dyn SearchProvider>,
    pub fetcher: Arc<dyn MediaFetcher>,
    pub ledger: Ledger,
    pub session_cache: Arc<SessionUrlCache>,
    pub scorer: Arc<Scorer>,
    pub events: EventBus,
}

/// Search, filter and fetch for one session
pub struct SearchFetcher {
    services: FetchServices,
    processor: SegmentProcessor,
    run: RunConfig,
    fetch: FetchConfig,
    raw_dir: PathBuf,
}

impl SearchFetcher {
    /// `raw_dir` receives downloads, `candidates_dir` the slices cut from them
    pub fn new(
        services: FetchServices,
        run: RunConfig,
        fetch: FetchConfig,
        raw_dir: PathBuf,
        candidates_dir: PathBuf,
    ) -> Self {
        let processor = SegmentProcessor::new(
            services.ledger.clone(),
            Arc::clone(&services.scorer),
            candidates_dir,
            run.fade_curve,
        );
        Self {
            services,
            processor,
            run,
            fetch,
            raw_dir,
        }
    }

    pub fn services(&self) -> &FetchServices {
        &self.services
    }

    /// Length of the downloaded chunk: at least one clip, rounded up to whole seconds
    pub fn chunk_seconds(&self) -> u64 {
        self.fetch
            .download_chunk_seconds
            .max(self.run.clip_seconds.ceil() as u64)
    }

    /// Search `term` and drop hits the ledger or the session already knows.
    ///
    /// Requests `min(96, 2 × max_results)` hits. A failed search yields an
    /// empty list.
    pub async fn extract_candidates(
        &self,
        term: &str,
        max_results: usize,
        hint: Option<&ThemeHint>,
    ) -> Vec<SearchHit> {
        let requested = (max_results.saturating_mul(2)).clamp(1, MAX_SEARCH_RESULTS);
        let hits = match self.services.search.search(term, requested).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(term, error = %e, "Search failed");
                return Vec::new();
            }
        };
        let found = hits.len();

        let mut known_url = Vec::with_capacity(hits.len());
        for hit in hits {
            // Fail closed: an unreadable ledger means "already used"
            let used = self.services.ledger.has_url(&hit.url).await.unwrap_or_else(|e| {
                warn!(url = %hit.url, error = %e, "Ledger URL check failed");
                true
            });
            if !used {
                known_url.push(hit);
            }
        }
        let removed_known_url = found - known_url.len();

        let before_session = known_url.len();
        let fresh_in_session: Vec<SearchHit> = known_url
            .into_iter()
            .filter(|hit| !self.services.session_cache.is_used(&hit.url))
            .collect();
        let removed_session_url = before_session - fresh_in_session.len();

        let before_video_id = fresh_in_session.len();
        let mut candidates = Vec::with_capacity(fresh_in_session.len());
        for hit in fresh_in_session {
            let used = self
                .services
                .ledger
                .has_video_id(&hit.id)
                .await
                .unwrap_or_else(|e| {
                    warn!(video_id = %hit.id, error = %e, "Ledger video id check failed");
                    true
                });
            if !used {
                candidates.push(hit);
            }
        }
        let removed_video_id = before_video_id - candidates.len();

        info!(
            term,
            theme = hint.map(|h| h.name.as_str()),
            found,
            removed_known_url,
            removed_session_url,
            removed_video_id,
            remaining = candidates.len(),
            "Filtered search results"
        );
        self.services.events.emit_lossy(BankEvent::CandidatesFiltered {
            term: term.to_string(),
            found,
            removed_known_url,
            removed_session_url,
            removed_video_id,
            remaining: candidates.len(),
            timestamp: Utc::now(),
        });

        candidates
    }

    /// Claim, probe, download and content-claim one source
    pub async fn fetch_one(&self, hit: &SearchHit, term: &str, hint: Option<&ThemeHint>) -> FetchOutcome {
        let url = hit.url.as_str();
        let ledger = &self.services.ledger;

        self.services.session_cache.mark_used(url);

        match ledger.has_url(url).await {
            Ok(false) => {}
            Ok(true) => return self.skipped_duplicate(url, SkipReason::DuplicateUrl),
            Err(e) => {
                warn!(url, error = %e, "Ledger URL check failed, skipping source");
                return self.skipped_duplicate(url, SkipReason::DuplicateUrl);
            }
        }

        let hint_name = hint.map(|h| h.name.as_str());
        if !ledger
            .add_url_if_absent(url, hit.title.as_deref(), Some(term), hint_name)
            .await
        {
            debug!(url, "Lost URL claim race");
            return self.skipped_duplicate(url, SkipReason::DuplicateUrl);
        }

        let mut metadata = SourceMetadata {
            url: url.to_string(),
            source_id: hit.id.clone(),
            title: hit.title.clone(),
            search_term: term.to_string(),
            theme_hint: hint.map(|h| h.name.clone()),
            ..Default::default()
        };

        let duration = match self.services.fetcher.probe(url).await {
            Ok(info) => {
                metadata.title = info.title.clone().or(metadata.title);
                metadata.uploader = info.uploader.clone();
                metadata.duration_seconds = info.duration_seconds;
                metadata.upload_date = info.upload_date.clone();
                metadata.view_count = info.view_count;
                metadata.like_count = info.like_count;
                metadata.tags = info.tags.clone();
                metadata.categories = info.categories.clone();

                if info.is_live {
                    return self.unusable(SkipReason::LiveStream, metadata);
                }
                if info
                    .duration_seconds
                    .is_some_and(|d| d < self.run.clip_seconds)
                {
                    return self.unusable(SkipReason::TooShort, metadata);
                }
                info.duration_seconds
            }
            Err(e) => {
                debug!(url, error = %e, "Probe failed, downloading from the start");
                None
            }
        };

        let strategy = DownloadStrategy::choose(self.fetch.method, duration, self.chunk_seconds());
        metadata.download_strategy = Some(strategy.label());

        let request = FetchRequest {
            strategy,
            quality: self.fetch.audio_quality,
            retries: self.fetch.retries,
            output_dir: self.raw_dir.clone(),
            file_stem: raw_file_stem(&hit.id),
        };

        let fetched = match self.services.fetcher.fetch(url, &request).await {
            Ok(path) => path,
            Err(e) => {
                warn!(url, strategy = %strategy.label(), error = %e, "Download failed");
                return self.unusable(SkipReason::FetchFailed, metadata);
            }
        };

        let canonical = self.raw_dir.join(format!("{}_pcm.wav", request.file_stem));
        if let Err(e) = transcode_blocking(&fetched, &canonical).await {
            warn!(url, path = %fetched.display(), error = %e, "Downloaded audio could not be decoded");
            remove_quietly(&fetched);
            remove_quietly(&canonical);
            return self.unusable(SkipReason::DecodeFailed, metadata);
        }
        if fetched != canonical {
            remove_quietly(&fetched);
        }

        let hash = match hash_file(&canonical).await {
            Ok(hash) => hash,
            Err(e) => {
                warn!(path = %canonical.display(), error = %e, "Hashing download failed");
                remove_quietly(&canonical);
                return self.unusable(SkipReason::DecodeFailed, metadata);
            }
        };
        if !ledger
            .add_hash_if_absent(&hash, Some(&canonical), Some(url), None)
            .await
        {
            remove_quietly(&canonical);
            return self.skipped_duplicate(url, SkipReason::DuplicateContent);
        }

        FetchOutcome::Fetched {
            path: canonical,
            metadata,
        }
    }

    /// Collect slices for `term` from up to `wanted` sources.
    ///
    /// Fetch-and-slice jobs run in waves of at most `download_workers`;
    /// results are handled in completion order. A source counts toward `wanted` once it
    /// yields at least one slice. In-flight fetches are allowed to finish
    /// when `cancel` fires; no new wave starts.
    pub async fn download_batch(
        &self,
        term: &str,
        hint: Option<&ThemeHint>,
        wanted: usize,
        cancel: &CancellationToken,
    ) -> Vec<CandidateSlice> {
        let mut slices = Vec::new();
        if wanted == 0 {
            return slices;
        }

        let mut queue: VecDeque<SearchHit> = self.extract_candidates(term, wanted, hint).await.into();
        let best_scoring = hint.is_some()
            && self.chunk_seconds() * 1000 > self.run.clip_ms()
            && self.services.scorer.is_available().await;
        let mut successes = 0usize;

        while successes < wanted && !queue.is_empty() && !cancel.is_cancelled() {
            let wave = self
                .run
                .download_workers
                .min(wanted - successes)
                .min(queue.len());

            // Slicing runs inside the job, concurrently with the rest of the wave
            let mut tasks = FuturesUnordered::new();
            for hit in queue.drain(..wave) {
                tasks.push(async move {
                    let produced = match self.fetch_one(&hit, term, hint).await {
                        FetchOutcome::Fetched { path, metadata } => {
                            Some(self.slice_source(&path, &metadata, hint, best_scoring).await)
                        }
                        _ => None,
                    };
                    (hit, produced)
                });
            }

            while let Some((hit, produced)) = tasks.next().await {
                let Some(produced) = produced else {
                    continue;
                };
                if produced.is_empty() {
                    self.services.events.emit_lossy(BankEvent::SourceSkipped {
                        url: hit.url.clone(),
                        reason: SkipReason::NoSlices,
                        timestamp: Utc::now(),
                    });
                    continue;
                }

                successes += 1;
                for slice in &produced {
                    if let Err(e) = slice.write_sidecar() {
                        warn!(path = %slice.path.display(), error = %e, "Could not write slice sidecar");
                    }
                }
                slices.extend(produced);
            }
        }

        debug!(term, wanted, successes, slices = slices.len(), "Batch finished");
        slices
    }

    async fn slice_source(
        &self,
        path: &Path,
        metadata: &SourceMetadata,
        hint: Option<&ThemeHint>,
        best_scoring: bool,
    ) -> Vec<CandidateSlice> {
        let params = SliceParams {
            clip_ms: self.run.clip_ms(),
            count: self.run.slices_per_video,
            stride_ms: self.run.stride_ms(),
        };

        let result = match hint {
            Some(hint) if best_scoring => {
                self.processor
                    .slice_best_scoring(path, params, metadata, hint)
                    .await
            }
            _ => self.processor.slice_sequential(path, params, metadata).await,
        };

        result.unwrap_or_else(|e| {
            warn!(path = %path.display(), url = %metadata.url, error = %e, "Slicing failed");
            Vec::new()
        })
    }

    fn skipped_duplicate(&self, url: &str, reason: SkipReason) -> FetchOutcome {
        self.emit_skip(url, reason);
        FetchOutcome::Duplicate
    }

    fn unusable(&self, reason: SkipReason, metadata: SourceMetadata) -> FetchOutcome {
        info!(url = %metadata.url, ?reason, "Source unusable");
        self.emit_skip(&metadata.url, reason.clone());
        FetchOutcome::Unusable { reason, metadata }
    }

    fn emit_skip(&self, url: &str, reason: SkipReason) {
        self.services.events.emit_lossy(BankEvent::SourceSkipped {
            url: url.to_string(),
            reason,
            timestamp: Utc::now(),
        });
    }
}

async fn transcode_blocking(source: &Path, dest: &Path) -> themebank_common::Result<()> {
    let source = source.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || transcode_to_wav(&source, &dest).map(|_| ()))
        .await
        .map_err(|e| Error::Internal(format!("Transcode task failed: {}", e)))?
}

/// `<id>_<8 hex>` with anything outside `[A-Za-z0-9_-]` dropped from the id
fn raw_file_stem(id: &str) -> String {
    let safe: String = id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .take(64)
        .collect();
    let suffix = Uuid::new_v4().simple().to_string();
    let prefix = if safe.is_empty() { "source" } else { safe.as_str() };
    format!("{}_{}", prefix, &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_file_stem_sanitized() {
        let stem = raw_file_stem("ab/c:d_1-2");
        assert!(stem.starts_with("abcd_1-2_"));
        assert_eq!(stem.len(), "abcd_1-2_".len() + 8);
        assert!(raw_file_stem("///").starts_with("source_"));
    }
}
