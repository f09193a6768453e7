//! Event types for the themebank event system
//!
//! Every observable step of a bank-building session is published as a
//! [`BankEvent`] on an [`EventBus`]. Subscribers (the session log writer,
//! tests, a future UI) receive events independently; publishing never blocks
//! the session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::broadcast;

/// Lifecycle state of one theme bank within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThemeState {
    /// Not yet visited in this session
    Pending,
    /// Currently requesting and routing candidates
    Filling,
    /// Bank holds the target number of samples
    Complete,
    /// Retry budget or search phrases ran out before the bank was full
    Exhausted,
    /// Stop was requested while the theme was pending or filling
    Stopped,
}

impl ThemeState {
    /// True once no further work will happen for the theme in this session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ThemeState::Complete | ThemeState::Exhausted | ThemeState::Stopped
        )
    }
}

/// Overall result of a session run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Every bank reached its target
    Completed,
    /// All themes were visited but at least one bank was left short
    Exhausted,
    /// Stop was requested before all themes finished
    Stopped,
}

/// Why a source was consumed without producing a candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// URL or video id already recorded in the ledger
    DuplicateUrl,
    /// Downloaded audio is byte-identical to an earlier download
    DuplicateContent,
    /// Source is a live stream
    LiveStream,
    /// Source is shorter than one clip
    TooShort,
    /// Download tool failed
    FetchFailed,
    /// Downloaded file could not be decoded or rewritten
    DecodeFailed,
    /// Source produced no unique slice
    NoSlices,
}

/// Why a candidate slice was deleted instead of banked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// Best similarity was below the configured minimum
    BelowThreshold,
    /// Best-matching theme is already full
    ThemeAlreadyComplete,
    /// Moving the slice into its bank failed
    PlacementFailed,
}

/// Themebank event types
///
/// Events are broadcast via [`EventBus`] and serialized as one JSON object
/// per line into the session log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BankEvent {
    /// Session created or resumed
    SessionStarted {
        session_id: String,
        resumed: bool,
        themes: Vec<String>,
        target_per_bank: usize,
        timestamp: DateTime<Utc>,
    },

    /// Theme entered the filling loop
    ThemeStarted {
        theme: String,
        filled: usize,
        target: usize,
        timestamp: DateTime<Utc>,
    },

    /// A batch was requested for a search phrase
    BatchRequested {
        theme: String,
        phrase: String,
        wanted: usize,
        timestamp: DateTime<Utc>,
    },

    /// Search results after the three ledger/session filter layers
    CandidatesFiltered {
        term: String,
        found: usize,
        removed_known_url: usize,
        removed_session_url: usize,
        removed_video_id: usize,
        remaining: usize,
        timestamp: DateTime<Utc>,
    },

    /// A source was consumed without yielding a candidate
    SourceSkipped {
        url: String,
        reason: SkipReason,
        timestamp: DateTime<Utc>,
    },

    /// A candidate slice was moved into a bank
    SliceAssigned {
        target_theme: String,
        assigned_theme: String,
        score: Option<f32>,
        path: PathBuf,
        timestamp: DateTime<Utc>,
    },

    /// A candidate slice was deleted
    SliceDiscarded {
        target_theme: String,
        best_theme: Option<String>,
        score: Option<f32>,
        reason: DiscardReason,
        timestamp: DateTime<Utc>,
    },

    /// Scoring was requested but the embedding backend is unusable
    ScoringUnavailable {
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Progress snapshot after every assignment decision
    Progress {
        filled: BTreeMap<String, usize>,
        retries: BTreeMap<String, usize>,
        target_per_bank: usize,
        banks_completed: usize,
        percent: f32,
        current_theme: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Theme left the filling loop
    ThemeFinished {
        theme: String,
        state: ThemeState,
        filled: usize,
        retries: usize,
        timestamp: DateTime<Utc>,
    },

    /// Session finished (completed, exhausted or stopped)
    SessionFinished {
        session_id: String,
        outcome: SessionOutcome,
        timestamp: DateTime<Utc>,
    },
}

impl BankEvent {
    /// Event type name as it appears in the `type` tag
    pub fn event_type(&self) -> &'static str {
        match self {
            BankEvent::SessionStarted { .. } => "SessionStarted",
            BankEvent::ThemeStarted { .. } => "ThemeStarted",
            BankEvent::BatchRequested { .. } => "BatchRequested",
            BankEvent::CandidatesFiltered { .. } => "CandidatesFiltered",
            BankEvent::SourceSkipped { .. } => "SourceSkipped",
            BankEvent::SliceAssigned { .. } => "SliceAssigned",
            BankEvent::SliceDiscarded { .. } => "SliceDiscarded",
            BankEvent::ScoringUnavailable { .. } => "ScoringUnavailable",
            BankEvent::Progress { .. } => "Progress",
            BankEvent::ThemeFinished { .. } => "ThemeFinished",
            BankEvent::SessionFinished { .. } => "SessionFinished",
        }
    }
}

/// Broadcast bus for [`BankEvent`]s
///
/// Cloning the bus shares the underlying channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BankEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<BankEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)`, or `Err` if nobody is listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: BankEvent,
    ) -> Result<usize, broadcast::error::SendError<BankEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: BankEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
