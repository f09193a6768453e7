//! In-memory stand-ins for the search tool, the download tool and the
//! embedding service

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use themebank_builder::services::media_source::{
    FetchRequest, MediaFetcher, SearchHit, SearchProvider, SourceInfo,
};
use themebank_builder::services::EmbeddingBackend;
use themebank_common::{Error, Result};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::audio_generator::{generate_test_wav, AudioConfig};

/// Search hit for a platform video id
pub fn hit(id: &str) -> SearchHit {
    SearchHit {
        id: id.to_string(),
        url: format!("https://www.youtube.com/watch?v={}", id),
        title: Some(format!("Title {}", id)),
    }
}

/// Search results queued per term; each call pops the next batch
#[derive(Default)]
pub struct FakeSearch {
    batches: Mutex<HashMap<String, VecDeque<Vec<SearchHit>>>>,
    requests: Mutex<Vec<(String, usize)>>,
}

impl FakeSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self, term: &str, hits: Vec<SearchHit>) {
        self.batches
            .lock()
            .unwrap()
            .entry(term.to_string())
            .or_default()
            .push_back(hits);
    }

    /// `(term, count)` of every search so far
    pub fn requests(&self) -> Vec<(String, usize)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchProvider for FakeSearch {
    async fn search(&self, term: &str, count: usize) -> Result<Vec<SearchHit>> {
        self.requests.lock().unwrap().push((term.to_string(), count));
        let mut hits = self
            .batches
            .lock()
            .unwrap()
            .get_mut(term)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default();
        hits.truncate(count);
        Ok(hits)
    }
}

/// Behaviour of one fake source
#[derive(Debug, Clone)]
pub struct FakeSource {
    pub info: SourceInfo,
    pub audio: AudioConfig,
    pub fail_fetch: bool,
    /// Download takes this long
    pub fetch_delay: Duration,
}

impl FakeSource {
    /// Ramped tone of `seconds`; distinct `variant`s give distinct content
    pub fn tone(seconds: f64, variant: usize) -> Self {
        Self {
            info: SourceInfo {
                duration_seconds: Some(seconds),
                title: Some(format!("Tone {}", variant)),
                ..Default::default()
            },
            audio: AudioConfig::ramped(seconds, variant),
            fail_fetch: false,
            fetch_delay: Duration::ZERO,
        }
    }

    pub fn live() -> Self {
        let mut source = Self::tone(5.0, 0);
        source.info.is_live = true;
        source.info.duration_seconds = None;
        source
    }

    pub fn failing(seconds: f64) -> Self {
        Self {
            fail_fetch: true,
            ..Self::tone(seconds, 0)
        }
    }
}

/// Writes generated WAV files in place of real downloads
pub struct FakeFetcher {
    sources: Mutex<HashMap<String, FakeSource>>,
    fetches: Mutex<Vec<(String, FetchRequest)>>,
    probes: AtomicUsize,
    /// One permit per completed download
    completed: Arc<Semaphore>,
}

impl Default for FakeFetcher {
    fn default() -> Self {
        Self {
            sources: Mutex::new(HashMap::new()),
            fetches: Mutex::new(Vec::new()),
            probes: AtomicUsize::new(0),
            completed: Arc::new(Semaphore::new(0)),
        }
    }
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gains a permit every time a download completes
    pub fn completed_downloads(&self) -> Arc<Semaphore> {
        Arc::clone(&self.completed)
    }

    pub fn add(&self, hit: &SearchHit, source: FakeSource) {
        self.sources.lock().unwrap().insert(hit.url.clone(), source);
    }

    /// `(url, request)` of every download so far
    pub fn fetches(&self) -> Vec<(String, FetchRequest)> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    fn source(&self, url: &str) -> Option<FakeSource> {
        self.sources.lock().unwrap().get(url).cloned()
    }
}

#[async_trait]
impl MediaFetcher for FakeFetcher {
    async fn probe(&self, url: &str) -> Result<SourceInfo> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.source(url)
            .map(|s| s.info)
            .ok_or_else(|| Error::External(format!("unknown source {}", url)))
    }

    async fn fetch(&self, url: &str, request: &FetchRequest) -> Result<PathBuf> {
        self.fetches
            .lock()
            .unwrap()
            .push((url.to_string(), request.clone()));

        let source = self
            .source(url)
            .ok_or_else(|| Error::External(format!("unknown source {}", url)))?;
        if !source.fetch_delay.is_zero() {
            tokio::time::sleep(source.fetch_delay).await;
        }
        if source.fail_fetch {
            return Err(Error::External("HTTP Error 403: Forbidden".to_string()));
        }

        let path = request.output_dir.join(format!("{}.wav", request.file_stem));
        let written = generate_test_wav(&path, &source.audio).map_err(|e| Error::External(e.to_string()))?;
        self.completed.add_permits(1);
        Ok(written)
    }
}

/// Embeddings chosen by file name and prompt text
pub struct FakeEmbedding {
    /// `(file name fragment, vector)`; the first matching fragment wins
    audio: Vec<(String, Vec<f32>)>,
    default_audio: Vec<f32>,
    texts: HashMap<String, Vec<f32>>,
    fail_load: bool,
    loads: AtomicUsize,
    /// Audio embedding blocks until this many permits are available
    gate: Option<(Arc<Semaphore>, u32)>,
    /// Cancelled on the first audio embedding
    cancel_on_audio: Option<CancellationToken>,
}

impl FakeEmbedding {
    pub fn new(default_audio: Vec<f32>) -> Self {
        Self {
            audio: Vec::new(),
            default_audio,
            texts: HashMap::new(),
            fail_load: false,
            loads: AtomicUsize::new(0),
            gate: None,
            cancel_on_audio: None,
        }
    }

    /// Audio files whose name contains `fragment` embed to `vector`
    pub fn audio_for(mut self, fragment: &str, vector: Vec<f32>) -> Self {
        self.audio.push((fragment.to_string(), vector));
        self
    }

    pub fn text_for(mut self, prompt: &str, vector: Vec<f32>) -> Self {
        self.texts.insert(prompt.to_string(), vector);
        self
    }

    pub fn failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    /// Hold every audio embedding until `permits` are available on `gate`
    pub fn gated_on(mut self, gate: Arc<Semaphore>, permits: u32) -> Self {
        self.gate = Some((gate, permits));
        self
    }

    /// Cancel `token` when the first audio file is embedded
    pub fn cancel_on_first_audio(mut self, token: CancellationToken) -> Self {
        self.cancel_on_audio = Some(token);
        self
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingBackend for FakeEmbedding {
    async fn load(&self) -> Result<()> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_load {
            Err(Error::External("model weights missing".to_string()))
        } else {
            Ok(())
        }
    }

    async fn embed_audio(&self, path: &Path) -> Result<Vec<f32>> {
        if let Some((gate, permits)) = &self.gate {
            // Permits go back on drop, so an open gate stays open
            let _open = gate
                .acquire_many(*permits)
                .await
                .map_err(|e| Error::External(e.to_string()))?;
        }
        if let Some(token) = &self.cancel_on_audio {
            token.cancel();
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(self
            .audio
            .iter()
            .find(|(fragment, _)| name.contains(fragment.as_str()))
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| self.default_audio.clone()))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                self.texts
                    .get(t)
                    .cloned()
                    .unwrap_or_else(|| vec![0.0; self.default_audio.len()])
            })
            .collect())
    }
}
