//! Search and download capabilities consumed by the fetch layer
//!
//! The pipeline never talks to a concrete tool directly. It sees a
//! [`SearchProvider`] (metadata-only search) and a [`MediaFetcher`]
//! (probe + audio download). `services::yt_dlp` implements both.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use themebank_common::Result;

/// One metadata-only search result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Provider-specific id (platform video id)
    pub id: String,
    pub url: String,
    pub title: Option<String>,
}

/// Probed source metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub duration_seconds: Option<f64>,
    pub title: Option<String>,
    pub is_live: bool,
    pub uploader: Option<String>,
    pub upload_date: Option<String>,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// Configured download method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadMethod {
    /// Ranged download of the middle chunk when the source is longer than one chunk
    #[default]
    Smart,
    /// Ranged download whenever the duration is known
    Segment,
    /// Always download the whole source
    Full,
}

/// Audio stream quality preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioQuality {
    #[default]
    Best,
    /// Smallest stream; faster downloads
    Worst,
}

/// How one source is downloaded, decided once per fetch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DownloadStrategy {
    /// Whole source from the beginning; multi-connection transport allowed
    FullFast,
    /// Only `[start, end)` seconds; single-connection transport, keyframes forced at cuts
    RangedPrecise { start_seconds: f64, end_seconds: f64 },
}

impl DownloadStrategy {
    /// Pick the strategy for a source of `duration_seconds` (if known).
    ///
    /// Ranged windows are centered: `start = max(0, ⌊d/2⌋ - ⌊chunk/2⌋)`,
    /// `end = min(d, start + chunk + 2)`. The two extra seconds absorb
    /// keyframe alignment at the cut. With no usable duration only the first
    /// chunk is fetched, unless `Full` was configured.
    pub fn choose(method: DownloadMethod, duration_seconds: Option<f64>, chunk_seconds: u64) -> Self {
        let Some(duration) = duration_seconds.filter(|d| d.is_finite() && *d > 0.0) else {
            return match method {
                DownloadMethod::Full => DownloadStrategy::FullFast,
                DownloadMethod::Smart | DownloadMethod::Segment => DownloadStrategy::RangedPrecise {
                    start_seconds: 0.0,
                    end_seconds: chunk_seconds as f64,
                },
            };
        };

        let ranged = match method {
            DownloadMethod::Smart => duration > chunk_seconds as f64,
            DownloadMethod::Segment => true,
            DownloadMethod::Full => false,
        };
        if !ranged {
            return DownloadStrategy::FullFast;
        }

        let center = (duration / 2.0).floor();
        let start = (center - (chunk_seconds / 2) as f64).max(0.0);
        let end = (start + chunk_seconds as f64 + 2.0).min(duration);

        DownloadStrategy::RangedPrecise {
            start_seconds: start,
            end_seconds: end,
        }
    }

    pub fn is_ranged(&self) -> bool {
        matches!(self, DownloadStrategy::RangedPrecise { .. })
    }

    /// Short description recorded in slice metadata
    pub fn label(&self) -> String {
        match self {
            DownloadStrategy::FullFast => "full_fast".to_string(),
            DownloadStrategy::RangedPrecise {
                start_seconds,
                end_seconds,
            } => format!("ranged_precise {:.0}s-{:.0}s", start_seconds, end_seconds),
        }
    }
}

/// Parameters of one download
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub strategy: DownloadStrategy,
    pub quality: AudioQuality,
    /// Retries handed to the download tool
    pub retries: u32,
    /// Directory the file is written into
    pub output_dir: PathBuf,
    /// File name without extension
    pub file_stem: String,
}

/// Metadata-only search
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Up to `count` hits for `term`
    async fn search(&self, term: &str, count: usize) -> Result<Vec<SearchHit>>;
}

/// Source probing and audio download
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Read source metadata without downloading media
    async fn probe(&self, url: &str) -> Result<SourceInfo>;

    /// Download audio per `request`; returns the written file
    async fn fetch(&self, url: &str, request: &FetchRequest) -> Result<PathBuf>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smart_ranges_only_long_sources() {
        assert_eq!(
            DownloadStrategy::choose(DownloadMethod::Smart, Some(8.0), 10),
            DownloadStrategy::FullFast
        );
        assert_eq!(
            DownloadStrategy::choose(DownloadMethod::Smart, Some(10.0), 10),
            DownloadStrategy::FullFast
        );
        assert_eq!(
            DownloadStrategy::choose(DownloadMethod::Smart, Some(300.0), 10),
            DownloadStrategy::RangedPrecise {
                start_seconds: 145.0,
                end_seconds: 157.0
            }
        );
    }

    #[test]
    fn test_ranged_window_clamped_to_source() {
        // Short source forced into ranged mode
        assert_eq!(
            DownloadStrategy::choose(DownloadMethod::Segment, Some(7.5), 10),
            DownloadStrategy::RangedPrecise {
                start_seconds: 0.0,
                end_seconds: 7.5
            }
        );
    }

    #[test]
    fn test_unknown_duration_and_full_method() {
        let head = DownloadStrategy::RangedPrecise {
            start_seconds: 0.0,
            end_seconds: 10.0,
        };
        assert_eq!(DownloadStrategy::choose(DownloadMethod::Segment, None, 10), head);
        assert_eq!(DownloadStrategy::choose(DownloadMethod::Smart, None, 10), head);
        assert_eq!(DownloadStrategy::choose(DownloadMethod::Smart, Some(f64::NAN), 10), head);
        assert_eq!(
            DownloadStrategy::choose(DownloadMethod::Full, None, 10),
            DownloadStrategy::FullFast
        );
        assert_eq!(
            DownloadStrategy::choose(DownloadMethod::Full, Some(600.0), 10),
            DownloadStrategy::FullFast
        );
    }

    #[test]
    fn test_label() {
        assert_eq!(DownloadStrategy::FullFast.label(), "full_fast");
        let ranged = DownloadStrategy::RangedPrecise {
            start_seconds: 145.0,
            end_seconds: 157.0,
        };
        assert_eq!(ranged.label(), "ranged_precise 145s-157s");
        assert!(ranged.is_ranged());
    }
}
