//! Data models for themebank-builder

pub mod session;
pub mod slice;
pub mod theme;

pub use session::{sessions_root, SessionPaths, SessionProgress, SessionReport, ThemeProgress};
pub use slice::{
    sidecar_path, BankedSample, CandidateSlice, SelectionMethod, SliceMetadata, SourceMetadata,
};
pub use theme::{default_themes, Theme, ThemeHint};
