//! Bank-building session state
//!
//! A session owns one directory under `<root>/sessions/<id>/`. Progress is
//! snapshotted to `progress.json` after every assignment decision and the
//! final report goes to `session.json`. On resume, filled counts are rebuilt
//! from the bank directories, never from the snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use themebank_common::events::{BankEvent, SessionOutcome, ThemeState};
use themebank_common::Result;

use super::slice::write_json;

/// Directory layout of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    dir: PathBuf,
}

impl SessionPaths {
    pub fn new(root_folder: &Path, session_id: &str) -> Self {
        Self {
            dir: sessions_root(root_folder).join(session_id),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn themes_dir(&self) -> PathBuf {
        self.dir.join("themes")
    }

    pub fn theme_dir(&self, theme: &str) -> PathBuf {
        self.themes_dir().join(theme)
    }

    /// Transient slices awaiting assignment
    pub fn candidates_dir(&self) -> PathBuf {
        self.dir.join("candidates")
    }

    /// Transient raw downloads
    pub fn raw_dir(&self) -> PathBuf {
        self.dir.join("raw")
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join("session.log")
    }

    pub fn progress_path(&self) -> PathBuf {
        self.dir.join("progress.json")
    }

    pub fn report_path(&self) -> PathBuf {
        self.dir.join("session.json")
    }

    pub fn expansions_path(&self) -> PathBuf {
        self.dir.join("expansions.json")
    }

    /// Create the session directory tree
    pub fn create_all(&self, theme_names: &[String]) -> Result<()> {
        std::fs::create_dir_all(self.candidates_dir())?;
        std::fs::create_dir_all(self.raw_dir())?;
        for name in theme_names {
            std::fs::create_dir_all(self.theme_dir(name))?;
        }
        Ok(())
    }
}

/// `<root>/sessions`
pub fn sessions_root(root_folder: &Path) -> PathBuf {
    root_folder.join("sessions")
}

/// Per-theme counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeProgress {
    pub filled: usize,
    pub retries: usize,
    pub state: ThemeState,
}

impl Default for ThemeProgress {
    fn default() -> Self {
        Self {
            filled: 0,
            retries: 0,
            state: ThemeState::Pending,
        }
    }
}

/// Live progress of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionProgress {
    pub session_id: String,
    pub target_per_bank: usize,
    pub themes: BTreeMap<String, ThemeProgress>,
    pub current_theme: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionProgress {
    pub fn new(session_id: &str, theme_names: &[String], target_per_bank: usize) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.to_string(),
            target_per_bank,
            themes: theme_names
                .iter()
                .map(|name| (name.clone(), ThemeProgress::default()))
                .collect(),
            current_theme: None,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn theme(&self, name: &str) -> ThemeProgress {
        self.themes.get(name).copied().unwrap_or_default()
    }

    pub fn filled(&self, name: &str) -> usize {
        self.theme(name).filled
    }

    pub fn retries(&self, name: &str) -> usize {
        self.theme(name).retries
    }

    pub fn state(&self, name: &str) -> ThemeState {
        self.theme(name).state
    }

    pub fn is_full(&self, name: &str) -> bool {
        self.filled(name) >= self.target_per_bank
    }

    /// Set the filled count (resume: count taken from disk)
    pub fn set_filled(&mut self, name: &str, filled: usize) {
        self.themes.entry(name.to_string()).or_default().filled = filled;
        self.touch();
    }

    pub fn record_banked(&mut self, name: &str) {
        self.themes.entry(name.to_string()).or_default().filled += 1;
        self.touch();
    }

    pub fn record_retry(&mut self, name: &str) {
        self.themes.entry(name.to_string()).or_default().retries += 1;
        self.touch();
    }

    /// Move a theme to `state`, returning the previous state
    pub fn transition(&mut self, name: &str, state: ThemeState) -> ThemeState {
        let entry = self.themes.entry(name.to_string()).or_default();
        let previous = entry.state;
        entry.state = state;
        self.touch();
        previous
    }

    pub fn banks_completed(&self) -> usize {
        self.themes
            .values()
            .filter(|t| t.filled >= self.target_per_bank)
            .count()
    }

    /// Share of all bank slots filled, 0.0 - 100.0
    pub fn percent(&self) -> f32 {
        let total = self.target_per_bank * self.themes.len();
        if total == 0 {
            return 100.0;
        }
        let filled: usize = self
            .themes
            .values()
            .map(|t| t.filled.min(self.target_per_bank))
            .sum();
        (filled as f32 / total as f32) * 100.0
    }

    pub fn progress_event(&self) -> BankEvent {
        BankEvent::Progress {
            filled: self.themes.iter().map(|(k, v)| (k.clone(), v.filled)).collect(),
            retries: self.themes.iter().map(|(k, v)| (k.clone(), v.retries)).collect(),
            target_per_bank: self.target_per_bank,
            banks_completed: self.banks_completed(),
            percent: self.percent(),
            current_theme: self.current_theme.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Final summary written to `session.json` and printed by the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: String,
    pub resumed: bool,
    pub outcome: SessionOutcome,
    pub target_per_bank: usize,
    pub themes: BTreeMap<String, ThemeProgress>,
    pub banks_completed: usize,
    pub total_banked: usize,
    pub session_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SessionReport {
    pub fn from_progress(
        progress: &SessionProgress,
        outcome: SessionOutcome,
        resumed: bool,
        session_dir: &Path,
    ) -> Self {
        Self {
            session_id: progress.session_id.clone(),
            resumed,
            outcome,
            target_per_bank: progress.target_per_bank,
            themes: progress.themes.clone(),
            banks_completed: progress.banks_completed(),
            total_banked: progress.themes.values().map(|t| t.filled).sum(),
            session_dir: session_dir.to_path_buf(),
            started_at: progress.started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }
}
