//! Bank builder configuration
//!
//! Loaded from a TOML file (see `themebank_common::config::locate_config_file`);
//! every field has a built-in default so an empty or missing file yields a
//! runnable configuration with the sixteen default themes.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use themebank_common::config::{load_toml, LoggingConfig};
use themebank_common::{Error, FadeCurve, Result};

use crate::ledger::LedgerOptions;
use crate::models::{default_themes, Theme};
use crate::services::media_source::{AudioQuality, DownloadMethod};

/// Complete builder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Root folder holding the ledger and session directories
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub run: RunConfig,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub expansion: ExpansionConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default = "default_themes")]
    pub themes: Vec<Theme>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root_folder: None,
            logging: LoggingConfig::default(),
            run: RunConfig::default(),
            fetch: FetchConfig::default(),
            scoring: ScoringConfig::default(),
            expansion: ExpansionConfig::default(),
            ledger: LedgerConfig::default(),
            themes: default_themes(),
        }
    }
}

/// Bank-filling parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Length of every banked clip
    #[serde(default = "default_clip_seconds")]
    pub clip_seconds: f64,

    /// Target number of samples per theme bank
    #[serde(default = "default_samples_per_bank")]
    pub samples_per_bank: usize,

    /// Per-theme retry budget; 0 = unbounded
    #[serde(default)]
    pub max_retries_per_theme: usize,

    /// Candidates requested per batch
    #[serde(default = "default_search_results")]
    pub search_results_per_theme: usize,

    /// Concurrent fetches
    #[serde(default = "default_download_workers")]
    pub download_workers: usize,

    /// Slices cut from each source
    #[serde(default = "default_slices_per_video")]
    pub slices_per_video: usize,

    /// Offset between consecutive slice windows; defaults to the clip length
    #[serde(default)]
    pub slice_stride_seconds: Option<f64>,

    #[serde(default)]
    pub fade_curve: FadeCurve,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            clip_seconds: default_clip_seconds(),
            samples_per_bank: default_samples_per_bank(),
            max_retries_per_theme: 0,
            search_results_per_theme: default_search_results(),
            download_workers: default_download_workers(),
            slices_per_video: default_slices_per_video(),
            slice_stride_seconds: None,
            fade_curve: FadeCurve::default(),
        }
    }
}

impl RunConfig {
    pub fn clip_ms(&self) -> u64 {
        (self.clip_seconds * 1000.0).round() as u64
    }

    pub fn stride_ms(&self) -> u64 {
        self.slice_stride_seconds
            .map(|s| (s * 1000.0).round() as u64)
            .filter(|ms| *ms > 0)
            .unwrap_or_else(|| self.clip_ms())
    }

    /// Candidates taken from one rotation phrase before moving to the next
    pub fn max_per_search(&self) -> usize {
        (self.search_results_per_theme / 4).max(1)
    }
}

/// Download tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_tool_path")]
    pub tool_path: String,

    #[serde(default)]
    pub method: DownloadMethod,

    #[serde(default)]
    pub audio_quality: AudioQuality,

    /// Format selector used with `audio_quality = "best"`
    #[serde(default = "default_format")]
    pub format: String,

    #[serde(default = "default_fetch_retries")]
    pub retries: u32,

    /// Length of the ranged chunk downloaded from long sources
    #[serde(default = "default_chunk_seconds")]
    pub download_chunk_seconds: u64,

    /// Use aria2c for full downloads when it is installed
    #[serde(default = "default_true")]
    pub aria2c: bool,

    #[serde(default = "default_aria2c_connections")]
    pub aria2c_connections: u32,

    #[serde(default = "default_aria2c_min_split_size")]
    pub aria2c_min_split_size: String,

    #[serde(default = "default_socket_timeout")]
    pub socket_timeout_seconds: u64,

    /// Hard limit on one tool invocation
    #[serde(default = "default_process_timeout")]
    pub process_timeout_seconds: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            tool_path: default_tool_path(),
            method: DownloadMethod::default(),
            audio_quality: AudioQuality::default(),
            format: default_format(),
            retries: default_fetch_retries(),
            download_chunk_seconds: default_chunk_seconds(),
            aria2c: true,
            aria2c_connections: default_aria2c_connections(),
            aria2c_min_split_size: default_aria2c_min_split_size(),
            socket_timeout_seconds: default_socket_timeout(),
            process_timeout_seconds: default_process_timeout(),
        }
    }
}

/// Audio-text similarity scoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Base URL of the embedding service
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,

    /// Slices whose best similarity falls below this are discarded
    #[serde(default)]
    pub min_similarity: f32,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_embedding_endpoint(),
            min_similarity: 0.0,
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

/// Search query expansion through a chat-completions endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_expansion_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_expansion_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_queries_per_theme")]
    pub queries_per_theme: usize,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_expansion_endpoint(),
            model: default_expansion_model(),
            api_key_env: default_api_key_env(),
            queries_per_theme: default_queries_per_theme(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

/// Ledger store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_seconds: u64,

    #[serde(default = "default_max_lock_wait_ms")]
    pub max_lock_wait_ms: u64,

    /// Where legacy JSON registries are looked for; defaults to the root folder
    #[serde(default)]
    pub legacy_dir: Option<PathBuf>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            busy_timeout_seconds: default_busy_timeout(),
            max_lock_wait_ms: default_max_lock_wait_ms(),
            legacy_dir: None,
        }
    }
}

impl LedgerConfig {
    pub fn options(&self) -> LedgerOptions {
        LedgerOptions {
            busy_timeout: Duration::from_secs(self.busy_timeout_seconds),
            max_lock_wait_ms: self.max_lock_wait_ms,
            legacy_dir: self.legacy_dir.clone(),
        }
    }
}

fn default_clip_seconds() -> f64 {
    2.0
}

fn default_samples_per_bank() -> usize {
    24
}

fn default_search_results() -> usize {
    32
}

fn default_download_workers() -> usize {
    4
}

fn default_slices_per_video() -> usize {
    1
}

fn default_tool_path() -> String {
    "yt-dlp".to_string()
}

fn default_format() -> String {
    "bestaudio[filesize<10M]/bestaudio/best".to_string()
}

fn default_fetch_retries() -> u32 {
    3
}

fn default_chunk_seconds() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_aria2c_connections() -> u32 {
    16
}

fn default_aria2c_min_split_size() -> String {
    "1M".to_string()
}

fn default_socket_timeout() -> u64 {
    30
}

fn default_process_timeout() -> u64 {
    600
}

fn default_embedding_endpoint() -> String {
    "http://127.0.0.1:8765".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_expansion_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_expansion_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_queries_per_theme() -> usize {
    4
}

fn default_busy_timeout() -> u64 {
    30
}

fn default_max_lock_wait_ms() -> u64 {
    30_000
}

impl Settings {
    /// Load from `path`, or built-in defaults when `None`, then validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            Some(path) => load_toml::<Settings>(path)?,
            None => Settings::default(),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn theme_names(&self) -> Vec<String> {
        self.themes.iter().map(|t| t.name.clone()).collect()
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let run = &self.run;
        if !(run.clip_seconds.is_finite() && run.clip_seconds > 0.0) {
            return Err(Error::Config("run.clip_seconds must be positive".to_string()));
        }
        if run.samples_per_bank == 0 {
            return Err(Error::Config("run.samples_per_bank must be at least 1".to_string()));
        }
        if run.search_results_per_theme == 0 {
            return Err(Error::Config(
                "run.search_results_per_theme must be at least 1".to_string(),
            ));
        }
        if run.download_workers == 0 {
            return Err(Error::Config("run.download_workers must be at least 1".to_string()));
        }
        if run.slices_per_video == 0 {
            return Err(Error::Config("run.slices_per_video must be at least 1".to_string()));
        }
        if let Some(stride) = run.slice_stride_seconds {
            if !(stride.is_finite() && stride > 0.0) {
                return Err(Error::Config(
                    "run.slice_stride_seconds must be positive".to_string(),
                ));
            }
        }
        if !(-1.0..=1.0).contains(&self.scoring.min_similarity) {
            return Err(Error::Config(
                "scoring.min_similarity must be within [-1, 1]".to_string(),
            ));
        }

        if self.themes.is_empty() {
            return Err(Error::Config("At least one theme is required".to_string()));
        }
        let mut seen = HashSet::new();
        for theme in &self.themes {
            let name = theme.name.trim();
            if name.is_empty() {
                return Err(Error::Config("Theme names must not be empty".to_string()));
            }
            if name != theme.name
                || name.contains(['/', '\\'])
                || name == "."
                || name == ".."
            {
                return Err(Error::Config(format!(
                    "Theme name '{}' cannot be used as a directory name",
                    theme.name
                )));
            }
            if !seen.insert(name.to_lowercase()) {
                return Err(Error::Config(format!(
                    "Duplicate theme name '{}' (names are case-insensitive)",
                    theme.name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_file_gives_defaults() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings.run.clip_seconds, 2.0);
        assert_eq!(settings.run.samples_per_bank, 24);
        assert_eq!(settings.run.max_retries_per_theme, 0);
        assert_eq!(settings.run.search_results_per_theme, 32);
        assert_eq!(settings.run.download_workers, 4);
        assert_eq!(settings.fetch.method, DownloadMethod::Smart);
        assert_eq!(settings.fetch.download_chunk_seconds, 10);
        assert_eq!(settings.themes.len(), 16);
        assert!(!settings.scoring.enabled);
        settings.validate().unwrap();
    }

    #[test]
    fn test_partial_file_overrides() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
root_folder = "/srv/themebank"

[run]
clip_seconds = 1.5
samples_per_bank = 3

[fetch]
method = "segment"
audio_quality = "worst"

[scoring]
enabled = true
min_similarity = 0.2

[[themes]]
name = "Soft"
search = "whisper, fabric rustle"
prompt = "Quiet and gentle"
"#,
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.root_folder, Some(PathBuf::from("/srv/themebank")));
        assert_eq!(settings.run.clip_ms(), 1500);
        assert_eq!(settings.run.stride_ms(), 1500);
        assert_eq!(settings.fetch.method, DownloadMethod::Segment);
        assert_eq!(settings.fetch.audio_quality, AudioQuality::Worst);
        assert_eq!(settings.themes.len(), 1);
        assert_eq!(settings.theme_names(), vec!["Soft".to_string()]);
    }

    #[test]
    fn test_duplicate_theme_names_rejected() {
        let mut settings = Settings::default();
        settings.themes = vec![
            Theme::new("Soft", "soft", "quiet"),
            Theme::new("soft", "soft", "quiet"),
        ];
        assert!(matches!(settings.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_path_like_theme_names_rejected() {
        let mut settings = Settings::default();
        settings.themes = vec![Theme::new("../escape", "x", "y")];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_max_per_search() {
        let mut run = RunConfig::default();
        assert_eq!(run.max_per_search(), 8);
        run.search_results_per_theme = 2;
        assert_eq!(run.max_per_search(), 1);
    }
}
