//! Bank assignment loop
//!
//! Drives one session: visits every theme in order, requests batches of
//! candidate slices through [`SearchFetcher`], scores each slice against all
//! theme prompts (target first) and moves it into the winning bank or
//! deletes it.
//!
//! Per-theme state: `Pending → Filling → {Complete | Exhausted | Stopped}`.
//! Accounting rules:
//!
//! - best similarity below the minimum: deleted, target retry +1
//! - winner already full: deleted, target retry +1
//! - winner is another theme: winner filled +1, target retry +1
//! - no score (disabled, unavailable, failed): banked under the target
//!
//! A bank never holds more than `samples_per_bank` samples. Progress is
//! saved after every decision; on resume filled counts come from the bank
//! directories.

pub mod placement;
pub mod rotation;

use chrono::Utc;
use std::sync::Arc;
use themebank_common::events::{DiscardReason, SessionOutcome, ThemeState};
use themebank_common::{BankEvent, EventBus, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::query_expander::Expansions;
use super::scorer::{Scorer, ThemeScore};
use super::search_fetch::SearchFetcher;
use crate::config::RunConfig;
use crate::models::{CandidateSlice, SessionPaths, SessionProgress, SessionReport, Theme};

pub use placement::{count_in_bank, move_to_bank};
pub use rotation::PhraseRotation;

/// Fixed parameters of a bank-filling session
#[derive(Debug, Clone)]
pub struct BankFillerConfig {
    pub session_id: String,
    pub themes: Vec<Theme>,
    pub run: RunConfig,
    pub min_similarity: f32,
}

/// Drives a session to completion, exhaustion or stop
pub struct BankFiller {
    config: BankFillerConfig,
    fetcher: SearchFetcher,
    scorer: Arc<Scorer>,
    events: EventBus,
    paths: SessionPaths,
    expansions: Option<Expansions>,
    cancel: CancellationToken,
}

impl BankFiller {
    pub fn new(
        config: BankFillerConfig,
        fetcher: SearchFetcher,
        paths: SessionPaths,
        cancel: CancellationToken,
    ) -> Self {
        let services = fetcher.services();
        let scorer = Arc::clone(&services.scorer);
        let events = services.events.clone();
        Self {
            config,
            fetcher,
            scorer,
            events,
            paths,
            expansions: None,
            cancel,
        }
    }

    /// Rotate through these phrases instead of the raw search words
    pub fn with_expansions(mut self, expansions: Expansions) -> Self {
        self.expansions = Some(expansions);
        self
    }

    pub fn paths(&self) -> &SessionPaths {
        &self.paths
    }

    fn target(&self) -> usize {
        self.config.run.samples_per_bank
    }

    fn theme_names(&self) -> Vec<String> {
        self.config.themes.iter().map(|t| t.name.clone()).collect()
    }

    /// Run the session. `resumed` keeps the session URL cache and rebuilds
    /// filled counts from the bank directories.
    pub async fn run(&self, resumed: bool) -> Result<SessionReport> {
        let names = self.theme_names();
        self.paths.create_all(&names)?;

        if !resumed {
            self.fetcher.services().session_cache.clear();
        }

        let mut progress = SessionProgress::new(&self.config.session_id, &names, self.target());
        for name in &names {
            let on_disk = count_in_bank(&self.paths.theme_dir(name));
            progress.set_filled(name, on_disk);
            if progress.is_full(name) {
                progress.transition(name, ThemeState::Complete);
            }
        }
        self.save_progress(&progress);

        info!(
            session_id = %self.config.session_id,
            resumed,
            themes = names.len(),
            target_per_bank = self.target(),
            "Session started"
        );
        self.events.emit_lossy(BankEvent::SessionStarted {
            session_id: self.config.session_id.clone(),
            resumed,
            themes: names.clone(),
            target_per_bank: self.target(),
            timestamp: Utc::now(),
        });

        for theme in &self.config.themes {
            if self.cancel.is_cancelled() {
                break;
            }
            self.fill_theme(theme, &mut progress).await;
        }

        if self.cancel.is_cancelled() {
            for name in &names {
                if !progress.state(name).is_terminal() {
                    progress.transition(name, ThemeState::Stopped);
                }
            }
        }

        progress.current_theme = None;
        self.save_progress(&progress);

        let outcome = session_outcome(&progress, &names);
        let report = SessionReport::from_progress(&progress, outcome, resumed, self.paths.dir());
        if let Err(e) = report.save(&self.paths.report_path()) {
            warn!(error = %e, "Could not write session report");
        }

        info!(
            session_id = %self.config.session_id,
            ?outcome,
            banks_completed = report.banks_completed,
            total_banked = report.total_banked,
            "Session finished"
        );
        self.events.emit_lossy(BankEvent::SessionFinished {
            session_id: self.config.session_id.clone(),
            outcome,
            timestamp: Utc::now(),
        });

        Ok(report)
    }

    async fn fill_theme(&self, theme: &Theme, progress: &mut SessionProgress) {
        let name = theme.name.as_str();
        if progress.is_full(name) {
            debug!(theme = name, "Bank already complete");
            progress.transition(name, ThemeState::Complete);
            return;
        }

        progress.transition(name, ThemeState::Filling);
        progress.current_theme = Some(name.to_string());
        self.events.emit_lossy(BankEvent::ThemeStarted {
            theme: name.to_string(),
            filled: progress.filled(name),
            target: self.target(),
            timestamp: Utc::now(),
        });
        self.save_progress(progress);

        let expanded = self
            .expansions
            .as_ref()
            .and_then(|e| e.get(name))
            .map(Vec::as_slice);
        let mut rotation = PhraseRotation::for_theme(
            theme,
            expanded,
            self.target(),
            self.config.run.max_per_search(),
        );
        let distinct_phrases = rotation.distinct_count().max(1);
        let max_retries = self.config.run.max_retries_per_theme;
        let hint = theme.hint();
        let mut empty_streak = 0usize;

        let final_state = loop {
            if progress.is_full(name) {
                break ThemeState::Complete;
            }
            if self.cancel.is_cancelled() {
                break ThemeState::Stopped;
            }
            if max_retries > 0 && progress.retries(name) >= max_retries {
                info!(theme = name, retries = progress.retries(name), "Retry budget exhausted");
                break ThemeState::Exhausted;
            }
            if empty_streak >= distinct_phrases {
                info!(theme = name, "Every search phrase came back empty");
                break ThemeState::Exhausted;
            }
            let Some(phrase) = rotation.current().map(str::to_string) else {
                break ThemeState::Exhausted;
            };

            let wanted = (self.target() - progress.filled(name))
                .min(self.config.run.search_results_per_theme)
                .max(1);
            self.events.emit_lossy(BankEvent::BatchRequested {
                theme: name.to_string(),
                phrase: phrase.clone(),
                wanted,
                timestamp: Utc::now(),
            });

            let slices = self
                .fetcher
                .download_batch(&phrase, Some(&hint), wanted, &self.cancel)
                .await;
            rotation.record(slices.len());

            if slices.is_empty() {
                empty_streak += 1;
                debug!(theme = name, phrase = %phrase, empty_streak, "Empty batch");
                continue;
            }
            empty_streak = 0;

            let mut remaining = slices.into_iter();
            while let Some(slice) = remaining.next() {
                self.route_slice(name, slice, progress).await;
                if self.cancel.is_cancelled() {
                    remaining.by_ref().for_each(|s| s.discard());
                    break;
                }
            }
        };

        // A cross-assignment may have completed the bank on the way out
        let final_state = if progress.is_full(name) {
            ThemeState::Complete
        } else {
            final_state
        };
        progress.transition(name, final_state);
        self.save_progress(progress);

        info!(
            theme = name,
            state = ?final_state,
            filled = progress.filled(name),
            retries = progress.retries(name),
            "Theme finished"
        );
        self.events.emit_lossy(BankEvent::ThemeFinished {
            theme: name.to_string(),
            state: final_state,
            filled: progress.filled(name),
            retries: progress.retries(name),
            timestamp: Utc::now(),
        });
    }

    /// Score, route and account for one slice
    async fn route_slice(&self, target: &str, slice: CandidateSlice, progress: &mut SessionProgress) {
        let candidate_names = self.candidate_order(target);
        let scored = self.score(&slice, &candidate_names).await;

        let (winner, score) = match &scored {
            Some(ThemeScore { theme, similarity }) => {
                if *similarity < self.config.min_similarity {
                    debug!(
                        path = %slice.path.display(),
                        best = %theme,
                        similarity,
                        min = self.config.min_similarity,
                        "Below similarity threshold"
                    );
                    self.discard(
                        target,
                        slice,
                        Some(theme.clone()),
                        Some(*similarity),
                        DiscardReason::BelowThreshold,
                        progress,
                    );
                    return;
                }
                (theme.clone(), Some(*similarity))
            }
            None => (target.to_string(), None),
        };

        if progress.is_full(&winner) {
            self.discard(
                target,
                slice,
                Some(winner),
                score,
                DiscardReason::ThemeAlreadyComplete,
                progress,
            );
            return;
        }

        let bank_dir = self.paths.theme_dir(&winner);
        let banked = match move_to_bank(&slice, &bank_dir, target, &winner, score) {
            Ok(path) => path,
            Err(e) => {
                warn!(path = %slice.path.display(), theme = %winner, error = %e, "Could not place slice");
                self.discard(
                    target,
                    slice,
                    Some(winner),
                    score,
                    DiscardReason::PlacementFailed,
                    progress,
                );
                return;
            }
        };

        progress.record_banked(&winner);
        if winner != target {
            progress.record_retry(target);
        }
        if progress.is_full(&winner) && winner != target {
            progress.transition(&winner, ThemeState::Complete);
        }

        info!(
            target,
            assigned = %winner,
            score,
            path = %banked.display(),
            "Slice banked"
        );
        self.events.emit_lossy(BankEvent::SliceAssigned {
            target_theme: target.to_string(),
            assigned_theme: winner,
            score,
            path: banked,
            timestamp: Utc::now(),
        });
        self.record_decision(progress);
    }

    fn discard(
        &self,
        target: &str,
        slice: CandidateSlice,
        best_theme: Option<String>,
        score: Option<f32>,
        reason: DiscardReason,
        progress: &mut SessionProgress,
    ) {
        slice.discard();
        progress.record_retry(target);
        debug!(target, ?best_theme, score, ?reason, "Slice discarded");
        self.events.emit_lossy(BankEvent::SliceDiscarded {
            target_theme: target.to_string(),
            best_theme,
            score,
            reason,
            timestamp: Utc::now(),
        });
        self.record_decision(progress);
    }

    /// Score across every theme; `None` falls back to the target theme
    async fn score(&self, slice: &CandidateSlice, candidate_names: &[String]) -> Option<ThemeScore> {
        match self
            .scorer
            .score(&slice.path, &self.config.themes, candidate_names)
            .await
        {
            Ok(best) => best,
            Err(e) => {
                if self.scorer.is_available().await {
                    warn!(path = %slice.path.display(), error = %e, "Scoring failed, keeping intended theme");
                } else {
                    self.events.emit_lossy(BankEvent::ScoringUnavailable {
                        reason: e.to_string(),
                        timestamp: Utc::now(),
                    });
                }
                None
            }
        }
    }

    /// Target theme first, then the rest in configured order
    fn candidate_order(&self, target: &str) -> Vec<String> {
        std::iter::once(target.to_string())
            .chain(
                self.config
                    .themes
                    .iter()
                    .filter(|t| t.name != target)
                    .map(|t| t.name.clone()),
            )
            .collect()
    }

    fn record_decision(&self, progress: &SessionProgress) {
        self.save_progress(progress);
        self.events.emit_lossy(progress.progress_event());
    }

    fn save_progress(&self, progress: &SessionProgress) {
        if let Err(e) = progress.save(&self.paths.progress_path()) {
            warn!(error = %e, "Could not save progress snapshot");
        }
    }
}

fn session_outcome(progress: &SessionProgress, names: &[String]) -> SessionOutcome {
    if names.iter().any(|n| progress.state(n) == ThemeState::Stopped) {
        SessionOutcome::Stopped
    } else if names.iter().all(|n| progress.is_full(n)) {
        SessionOutcome::Completed
    } else {
        SessionOutcome::Exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_outcome() {
        let names = vec!["Loud".to_string(), "Soft".to_string()];
        let mut progress = SessionProgress::new("s", &names, 1);
        progress.record_banked("Soft");
        progress.transition("Loud", ThemeState::Exhausted);
        assert_eq!(session_outcome(&progress, &names), SessionOutcome::Exhausted);

        progress.record_banked("Loud");
        assert_eq!(session_outcome(&progress, &names), SessionOutcome::Completed);

        progress.transition("Loud", ThemeState::Stopped);
        assert_eq!(session_outcome(&progress, &names), SessionOutcome::Stopped);
    }
}
