//! Bank directory placement
//!
//! Samples are named `<Theme>_NN.wav` (at least two digits) with a
//! `<Theme>_NN.json` sidecar. The next number is one past the highest in
//! use, so gaps left by manual deletion are never reused.

use chrono::Utc;
use std::path::{Path, PathBuf};
use themebank_common::Result;

use crate::models::slice::{remove_quietly, write_json};
use crate::models::{sidecar_path, BankedSample, CandidateSlice};

/// Number of `.wav` files in a bank directory (0 if it does not exist)
pub fn count_in_bank(bank_dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(bank_dir) else {
        return 0;
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_wav(p))
        .count()
}

fn is_wav(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("wav"))
}

/// Sequence number of `<theme>_NN.wav`, if the name has that shape
fn sample_number(theme: &str, path: &Path) -> Option<u32> {
    if !is_wav(path) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let digits = stem.strip_prefix(theme)?.strip_prefix('_')?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Next free `<theme>_NN.wav` path in `bank_dir`
pub fn next_sample_path(bank_dir: &Path, theme: &str) -> PathBuf {
    let highest = std::fs::read_dir(bank_dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter_map(|e| sample_number(theme, &e.path()))
                .max()
                .unwrap_or(0)
        })
        .unwrap_or(0);

    let mut number = highest + 1;
    loop {
        let candidate = bank_dir.join(format!("{}_{:02}.wav", theme, number));
        if !candidate.exists() {
            return candidate;
        }
        number += 1;
    }
}

/// Move `slice` into `bank_dir` as the next sample of `assigned_theme`.
///
/// The candidate's sidecar is replaced by a [`BankedSample`] sidecar next to
/// the banked file. Returns the banked audio path.
pub fn move_to_bank(
    slice: &CandidateSlice,
    bank_dir: &Path,
    target_theme: &str,
    assigned_theme: &str,
    score: Option<f32>,
) -> Result<PathBuf> {
    std::fs::create_dir_all(bank_dir)?;
    let dest = next_sample_path(bank_dir, assigned_theme);

    if std::fs::rename(&slice.path, &dest).is_err() {
        // Different filesystem: copy, then drop the original
        std::fs::copy(&slice.path, &dest)?;
        remove_quietly(&slice.path);
    }

    let banked = BankedSample {
        slice: slice.metadata.clone(),
        target_theme: target_theme.to_string(),
        assigned_theme: assigned_theme.to_string(),
        assignment_score: score,
        bank_path: dest.clone(),
        banked_at: Utc::now(),
    };
    write_json(&sidecar_path(&dest), &banked)?;
    remove_quietly(&sidecar_path(&slice.path));

    Ok(dest)
}
