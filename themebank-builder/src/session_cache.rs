//! Session URL cache
//!
//! In-memory mirror of the URLs touched during this process. It answers the
//! "did we already try this in this run" question without a database round
//! trip and covers the window between a fetch task starting and its ledger
//! claim landing. Advisory only: the ledger stays authoritative.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use crate::ledger::normalize;

#[derive(Debug, Default)]
struct UsedSets {
    raw: HashSet<String>,
    normalized: HashSet<String>,
    video_ids: HashSet<String>,
}

/// Process-lifetime set of used URLs, safe to share between fetch tasks
#[derive(Debug, Default)]
pub struct SessionUrlCache {
    inner: Mutex<UsedSets>,
}

impl SessionUrlCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything. Called only when a new (not resumed) session starts.
    pub fn clear(&self) {
        let mut sets = self.lock();
        sets.raw.clear();
        sets.normalized.clear();
        sets.video_ids.clear();
    }

    /// Record the raw URL, its normalized form and its video id
    pub fn mark_used(&self, url: &str) {
        let normalized = normalize(url);
        let mut sets = self.lock();
        sets.raw.insert(url.to_string());
        sets.normalized.insert(normalized.url);
        if let Some(video_id) = normalized.video_id {
            sets.video_ids.insert(video_id);
        }
    }

    /// True if any form of the URL was marked in this session
    pub fn is_used(&self, url: &str) -> bool {
        let normalized = normalize(url);
        let sets = self.lock();
        sets.raw.contains(url)
            || sets.normalized.contains(&normalized.url)
            || normalized
                .video_id
                .as_ref()
                .is_some_and(|id| sets.video_ids.contains(id))
    }

    /// Number of distinct raw URLs marked
    pub fn len(&self) -> usize {
        self.lock().raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Poisoned lock: keep using the sets
    fn lock(&self) -> MutexGuard<'_, UsedSets> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
