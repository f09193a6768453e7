//! themebank-builder library interface
//!
//! Builds themed banks of short audio clips: searches a video platform,
//! downloads and slices candidate audio, scores slices against theme
//! prompts and routes each one into exactly one bank, never consuming a
//! source or an audio clip twice.

pub mod config;
pub mod ledger;
pub mod models;
pub mod services;
pub mod session_cache;
pub mod session_log;
pub mod session_runner;
pub mod utils;

pub use config::Settings;
pub use ledger::Ledger;
pub use session_runner::{Backends, SessionRunner, SessionStart};
