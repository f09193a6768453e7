//! Services for themebank-builder

pub mod bank_filler;
pub mod embedding_client;
pub mod media_source;
pub mod query_expander;
pub mod scorer;
pub mod search_fetch;
pub mod segment_processor;
pub mod yt_dlp;

pub use bank_filler::{BankFiller, BankFillerConfig};
pub use embedding_client::{EmbeddingClientError, HttpEmbeddingBackend};
pub use media_source::{
    AudioQuality, DownloadMethod, DownloadStrategy, FetchRequest, MediaFetcher, SearchHit,
    SearchProvider, SourceInfo,
};
pub use query_expander::{ChatQueryExpander, ExpansionError, Expansions, QueryExpander};
pub use scorer::{EmbeddingBackend, Scorer, ThemeScore};
pub use search_fetch::{FetchOutcome, FetchServices, SearchFetcher};
pub use segment_processor::{SegmentProcessor, SliceParams};
pub use yt_dlp::YtDlp;
