//! Segment processor tests
//!
//! Sequential and best-scoring slicing against generated WAV sources, with
//! ledger-backed slice deduplication.

mod helpers;

use helpers::{generate_test_wav, open_test_ledger, AudioConfig, FakeEmbedding, SOFT_PROMPT};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use themebank_builder::models::{SelectionMethod, SourceMetadata, ThemeHint};
use themebank_builder::services::{Scorer, SegmentProcessor, SliceParams};
use themebank_common::FadeCurve;

fn metadata(url: &str) -> SourceMetadata {
    SourceMetadata {
        url: url.to_string(),
        source_id: "src".to_string(),
        search_term: "soft".to_string(),
        ..Default::default()
    }
}

fn params(count: usize) -> SliceParams {
    SliceParams {
        clip_ms: 1000,
        count,
        stride_ms: 1000,
    }
}

fn soft_hint() -> ThemeHint {
    ThemeHint {
        name: "Soft".to_string(),
        prompt: SOFT_PROMPT.to_string(),
    }
}

fn wav_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|e| e == "wav"))
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

#[tokio::test]
async fn test_sequential_windows_one_stride_apart() {
    let temp_dir = TempDir::new().unwrap();
    let ledger = open_test_ledger(temp_dir.path()).await;
    let out_dir = temp_dir.path().join("candidates");
    let processor = SegmentProcessor::new(
        ledger.clone(),
        Arc::new(Scorer::disabled()),
        out_dir.clone(),
        FadeCurve::default(),
    );

    let source = generate_test_wav(&temp_dir.path().join("src.wav"), &AudioConfig::ramped(5.0, 1)).unwrap();
    let slices = processor
        .slice_sequential(&source, params(3), &metadata("https://youtu.be/seq01"))
        .await
        .unwrap();

    assert_eq!(slices.len(), 3);
    let starts: Vec<u64> = slices.iter().map(|s| s.metadata.start_ms).collect();
    assert_eq!(starts, vec![0, 1000, 2000]);
    for (i, slice) in slices.iter().enumerate() {
        assert!(slice.path.exists());
        assert!(slice.path.ends_with(format!("src_s{}.wav", i + 1)));
        assert_eq!(slice.metadata.slice_index, i + 1);
        assert_eq!(slice.metadata.duration_ms, 1000);
        assert_eq!(slice.metadata.selection, SelectionMethod::Sequential);
        assert_eq!(slice.metadata.score, None);
        assert!(ledger.has_hash(&slice.metadata.content_hash).await.unwrap());

        let reader = hound::WavReader::open(&slice.path).unwrap();
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.len(), helpers::FIXTURE_SAMPLE_RATE);
    }
    assert_ne!(slices[0].metadata.content_hash, slices[1].metadata.content_hash);

    // Source is always consumed
    assert!(!source.exists());
}

#[tokio::test]
async fn test_duplicate_windows_are_skipped() {
    let temp_dir = TempDir::new().unwrap();
    let ledger = open_test_ledger(temp_dir.path()).await;
    let out_dir = temp_dir.path().join("candidates");
    let processor = SegmentProcessor::new(
        ledger.clone(),
        Arc::new(Scorer::disabled()),
        out_dir.clone(),
        FadeCurve::default(),
    );

    // Every one-second window of a steady tone is identical
    let first = generate_test_wav(&temp_dir.path().join("a.wav"), &AudioConfig::steady(4.0)).unwrap();
    let slices = processor
        .slice_sequential(&first, params(3), &metadata("https://youtu.be/dup01"))
        .await
        .unwrap();
    assert_eq!(slices.len(), 1);
    assert_eq!(wav_files(&out_dir).len(), 1);

    // A second copy of the same audio yields nothing new
    let second = generate_test_wav(&temp_dir.path().join("b.wav"), &AudioConfig::steady(4.0)).unwrap();
    let again = processor
        .slice_sequential(&second, params(3), &metadata("https://youtu.be/dup02"))
        .await
        .unwrap();
    assert!(again.is_empty());
    assert_eq!(wav_files(&out_dir).len(), 1);
    assert_eq!(ledger.stats().await.unwrap().hash_count, 1);
}

#[tokio::test]
async fn test_source_shorter_than_clip_yields_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let ledger = open_test_ledger(temp_dir.path()).await;
    let processor = SegmentProcessor::new(
        ledger,
        Arc::new(Scorer::disabled()),
        temp_dir.path().join("candidates"),
        FadeCurve::default(),
    );

    let source = generate_test_wav(&temp_dir.path().join("short.wav"), &AudioConfig::ramped(0.5, 2)).unwrap();
    let slices = processor
        .slice_sequential(&source, params(2), &metadata("https://youtu.be/short1"))
        .await
        .unwrap();

    assert!(slices.is_empty());
    assert!(!source.exists());
}

#[tokio::test]
async fn test_undecodable_source_is_an_error_and_removed() {
    let temp_dir = TempDir::new().unwrap();
    let ledger = open_test_ledger(temp_dir.path()).await;
    let processor = SegmentProcessor::new(
        ledger,
        Arc::new(Scorer::disabled()),
        temp_dir.path().join("candidates"),
        FadeCurve::default(),
    );

    let source = temp_dir.path().join("broken.wav");
    std::fs::write(&source, b"this is not audio").unwrap();

    let result = processor
        .slice_sequential(&source, params(1), &metadata("https://youtu.be/broken1"))
        .await;
    assert!(result.is_err());
    assert!(!source.exists());
}

#[tokio::test]
async fn test_best_scoring_keeps_top_windows() {
    let temp_dir = TempDir::new().unwrap();
    let ledger = open_test_ledger(temp_dir.path()).await;
    let out_dir = temp_dir.path().join("candidates");

    let embedding = FakeEmbedding::new(vec![0.0, 1.0])
        .audio_for("_w3.", vec![1.0, 0.0])
        .audio_for("_w5.", vec![0.8, 0.6])
        .text_for(SOFT_PROMPT, vec![1.0, 0.0]);
    let scorer = Arc::new(Scorer::new(Arc::new(embedding)));
    let processor = SegmentProcessor::new(ledger.clone(), scorer, out_dir.clone(), FadeCurve::default());

    let source = generate_test_wav(&temp_dir.path().join("src.wav"), &AudioConfig::ramped(5.0, 4)).unwrap();
    let slices = processor
        .slice_best_scoring(&source, params(2), &metadata("https://youtu.be/best01"), &soft_hint())
        .await
        .unwrap();

    assert_eq!(slices.len(), 2);
    // Test stride is a quarter of the 1000 ms stride
    assert_eq!(slices[0].metadata.start_ms, 750);
    assert_eq!(slices[1].metadata.start_ms, 1250);
    assert!((slices[0].metadata.score.unwrap() - 1.0).abs() < 1e-5);
    assert!((slices[1].metadata.score.unwrap() - 0.8).abs() < 1e-5);
    for slice in &slices {
        assert_eq!(slice.metadata.selection, SelectionMethod::BestScoring);
        assert_eq!(slice.metadata.scored_theme.as_deref(), Some("Soft"));
        // Windows at 0, 250, ..., 4000 ms
        assert_eq!(slice.metadata.windows_tested, Some(17));
        assert!(ledger.has_hash(&slice.metadata.content_hash).await.unwrap());
    }

    // Rejected windows are cleaned up
    let kept = wav_files(&out_dir);
    assert_eq!(kept.len(), 2);
    assert!(kept.iter().all(|p| {
        let name = p.file_name().unwrap().to_string_lossy();
        name == "src_s1.wav" || name == "src_s2.wav"
    }));
    assert!(!source.exists());
}

#[tokio::test]
async fn test_best_scoring_falls_back_to_sequential() {
    let temp_dir = TempDir::new().unwrap();
    let ledger = open_test_ledger(temp_dir.path()).await;
    let out_dir = temp_dir.path().join("candidates");

    let embedding = Arc::new(FakeEmbedding::new(vec![1.0, 0.0]).failing_load());
    let scorer = Arc::new(Scorer::new(embedding.clone()));
    let processor = SegmentProcessor::new(ledger, scorer.clone(), out_dir.clone(), FadeCurve::default());

    let source = generate_test_wav(&temp_dir.path().join("src.wav"), &AudioConfig::ramped(3.0, 5)).unwrap();
    let slices = processor
        .slice_best_scoring(&source, params(2), &metadata("https://youtu.be/fall01"), &soft_hint())
        .await
        .unwrap();

    assert_eq!(slices.len(), 2);
    assert!(slices
        .iter()
        .all(|s| s.metadata.selection == SelectionMethod::Sequential));
    assert_eq!(slices[1].metadata.start_ms, 1000);
    assert_eq!(wav_files(&out_dir).len(), 2);

    // The load is attempted once and never retried
    assert_eq!(embedding.load_count(), 1);
    assert!(!scorer.is_available().await);
}
