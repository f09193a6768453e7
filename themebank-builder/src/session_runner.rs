//! Session assembly
//!
//! Wires configuration, the ledger and the external backends into a
//! [`BankFiller`] for a new or resumed session, runs it and keeps the
//! session log writer alive for its duration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use themebank_common::time::{generate_session_id, is_valid_session_id};
use themebank_common::{Error, EventBus, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Settings;
use crate::ledger::Ledger;
use crate::models::slice::remove_quietly;
use crate::models::{SessionPaths, SessionReport};
use crate::services::bank_filler::{BankFiller, BankFillerConfig};
use crate::services::media_source::{MediaFetcher, SearchProvider};
use crate::services::query_expander::{
    load_expansions, save_expansions, ExpansionRecord, Expansions, QueryExpander,
};
use crate::services::scorer::{EmbeddingBackend, Scorer};
use crate::services::search_fetch::{FetchServices, SearchFetcher};
use crate::session_cache::SessionUrlCache;
use crate::session_log::run_session_log;

/// New session or resume of an existing one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStart {
    /// Fresh session; generated id unless one is given
    New { session_id: Option<String> },
    /// Continue the session with this id
    Resume { session_id: String },
}

/// External capabilities a session runs against
#[derive(Clone)]
pub struct Backends {
    pub search: Arc<dyn SearchProvider>,
    pub fetcher: Arc<dyn MediaFetcher>,
    /// Used only when scoring is enabled in the configuration
    pub embedding: Option<Arc<dyn EmbeddingBackend>>,
    /// Used only when expansion is enabled in the configuration
    pub expander: Option<Arc<dyn QueryExpander>>,
}

/// Runs bank-building sessions under one root folder
pub struct SessionRunner {
    settings: Settings,
    root_folder: PathBuf,
    ledger: Ledger,
    backends: Backends,
    session_cache: Arc<SessionUrlCache>,
    events: EventBus,
}

impl SessionRunner {
    pub fn new(settings: Settings, root_folder: PathBuf, ledger: Ledger, backends: Backends, events: EventBus) -> Self {
        Self {
            settings,
            root_folder,
            ledger,
            backends,
            session_cache: Arc::new(SessionUrlCache::new()),
            events,
        }
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Run one session until its banks are full, its themes are exhausted or
    /// `cancel` fires
    pub async fn run(&self, start: SessionStart, cancel: CancellationToken) -> Result<SessionReport> {
        let (session_id, resumed) = self.resolve_session(start)?;
        let paths = SessionPaths::new(&self.root_folder, &session_id);
        paths.create_all(&self.settings.theme_names())?;

        let log_writer = {
            let rx = self.events.subscribe();
            let log_path = paths.log_path();
            tokio::spawn(async move {
                if let Err(e) = run_session_log(rx, &log_path).await {
                    warn!(path = %log_path.display(), error = %e, "Session log writer failed");
                }
            })
        };

        let scorer = Arc::new(self.build_scorer());
        let expansions = self.expansions(&paths, resumed).await;

        let services = FetchServices {
            search: Arc::clone(&self.backends.search),
            fetcher: Arc::clone(&self.backends.fetcher),
            ledger: self.ledger.clone(),
            session_cache: Arc::clone(&self.session_cache),
            scorer,
            events: self.events.clone(),
        };
        let fetcher = SearchFetcher::new(
            services,
            self.settings.run.clone(),
            self.settings.fetch.clone(),
            paths.raw_dir(),
            paths.candidates_dir(),
        );

        let config = BankFillerConfig {
            session_id: session_id.clone(),
            themes: self.settings.themes.clone(),
            run: self.settings.run.clone(),
            min_similarity: self.settings.scoring.min_similarity,
        };
        let mut filler = BankFiller::new(config, fetcher, paths.clone(), cancel);
        if let Some(expansions) = expansions {
            filler = filler.with_expansions(expansions);
        }

        let result = filler.run(resumed).await;
        match &result {
            // The writer stops by itself after the SessionFinished event
            Ok(_) => {
                if let Err(e) = log_writer.await {
                    warn!(error = %e, "Session log writer task failed");
                }
            }
            Err(_) => log_writer.abort(),
        }

        clear_transient(&paths);
        result
    }

    fn resolve_session(&self, start: SessionStart) -> Result<(String, bool)> {
        match start {
            SessionStart::New { session_id } => {
                let session_id = match session_id {
                    Some(id) => validated(id)?,
                    None => generate_session_id(),
                };
                if SessionPaths::new(&self.root_folder, &session_id).dir().exists() {
                    return Err(Error::InvalidInput(format!(
                        "Session '{}' already exists; resume it instead",
                        session_id
                    )));
                }
                Ok((session_id, false))
            }
            SessionStart::Resume { session_id } => {
                let session_id = validated(session_id)?;
                let exists = SessionPaths::new(&self.root_folder, &session_id).dir().exists();
                if !exists {
                    warn!(session_id = %session_id, "No such session to resume, starting it fresh");
                }
                Ok((session_id, exists))
            }
        }
    }

    fn build_scorer(&self) -> Scorer {
        match (&self.backends.embedding, self.settings.scoring.enabled) {
            (Some(backend), true) => Scorer::new(Arc::clone(backend)),
            (None, true) => {
                warn!("Scoring enabled but no embedding backend configured; banking unscored");
                Scorer::disabled()
            }
            _ => Scorer::disabled(),
        }
    }

    /// Phrases to rotate through: a resumed session reuses the expansions it
    /// saved; a new one asks the expander (when enabled)
    async fn expansions(&self, paths: &SessionPaths, resumed: bool) -> Option<Expansions> {
        if resumed {
            if let Some(record) = load_expansions(&paths.expansions_path()) {
                info!(themes = record.expansions.len(), "Reusing saved query expansions");
                return Some(record.expansions);
            }
        }
        if !self.settings.expansion.enabled {
            return None;
        }
        let expander = self.backends.expander.as_ref()?;

        match expander
            .expand(&self.settings.themes, self.settings.run.samples_per_bank)
            .await
        {
            Ok(expansions) => {
                let record = ExpansionRecord {
                    model: Some(self.settings.expansion.model.clone()),
                    expansions,
                };
                if let Err(e) = save_expansions(&paths.expansions_path(), &record) {
                    warn!(error = %e, "Could not save query expansions");
                }
                Some(record.expansions)
            }
            Err(e) => {
                warn!(error = %e, "Query expansion failed, rotating raw search terms");
                None
            }
        }
    }
}

fn validated(session_id: String) -> Result<String> {
    if is_valid_session_id(&session_id) {
        Ok(session_id)
    } else {
        Err(Error::InvalidInput(format!(
            "Invalid session id '{}' (letters, digits, '_' and '-' only)",
            session_id
        )))
    }
}

/// Remove leftover candidate slices and raw downloads
fn clear_transient(paths: &SessionPaths) {
    for dir in [paths.candidates_dir(), paths.raw_dir()] {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_file() {
                remove_quietly(&path);
            }
        }
    }
}
