//! Test Helper Utilities
//!
//! Shared utilities for testing themebank-builder
#![allow(dead_code)]

pub mod audio_generator;
pub mod fakes;

use std::path::Path;
use std::sync::Arc;
use themebank_builder::config::Settings;
use themebank_builder::ledger::{Ledger, LedgerOptions};
use themebank_builder::models::Theme;
use themebank_builder::services::{EmbeddingBackend, FetchServices, Scorer};
use themebank_builder::session_cache::SessionUrlCache;
use themebank_builder::Backends;
use themebank_common::EventBus;

pub use audio_generator::{generate_test_wav, AudioConfig, FIXTURE_SAMPLE_RATE};
pub use fakes::{hit, FakeEmbedding, FakeFetcher, FakeSearch, FakeSource};

pub const SOFT_PROMPT: &str = "Quiet and gentle";
pub const LOUD_PROMPT: &str = "Booming and powerful";

/// Two themes searched as "soft" and "loud"
pub fn soft_loud_themes() -> Vec<Theme> {
    vec![
        Theme::new("Soft", "soft", SOFT_PROMPT),
        Theme::new("Loud", "loud", LOUD_PROMPT),
    ]
}

/// Small, fast settings: one-second clips, one source per batch, sequential
/// slicing (download chunk no longer than a clip), scoring off
pub fn test_settings(themes: Vec<Theme>, samples_per_bank: usize) -> Settings {
    let mut settings = Settings::default();
    settings.themes = themes;
    settings.run.clip_seconds = 1.0;
    settings.run.samples_per_bank = samples_per_bank;
    settings.run.search_results_per_theme = 1;
    settings.run.download_workers = 2;
    settings.run.slices_per_video = 1;
    settings.fetch.download_chunk_seconds = 1;
    settings.scoring.enabled = false;
    settings
}

/// Ledger in `dir` with short lock waits
pub async fn open_test_ledger(dir: &Path) -> Ledger {
    let options = LedgerOptions {
        max_lock_wait_ms: 5_000,
        ..Default::default()
    };
    Ledger::open_with(&dir.join("ledger.db"), options)
        .await
        .expect("open ledger")
}

/// Fetch collaborators around the given fakes
pub fn fetch_services(
    ledger: &Ledger,
    search: Arc<FakeSearch>,
    fetcher: Arc<FakeFetcher>,
    scorer: Scorer,
) -> FetchServices {
    FetchServices {
        search,
        fetcher,
        ledger: ledger.clone(),
        session_cache: Arc::new(SessionUrlCache::new()),
        scorer: Arc::new(scorer),
        events: EventBus::new(256),
    }
}

pub fn backends(
    search: Arc<FakeSearch>,
    fetcher: Arc<FakeFetcher>,
    embedding: Option<Arc<FakeEmbedding>>,
) -> Backends {
    Backends {
        search,
        fetcher,
        embedding: embedding.map(|e| e as Arc<dyn EmbeddingBackend>),
        expander: None,
    }
}
