//! # Themebank Common Library
//!
//! Shared code for the themebank crates:
//! - Error type and `Result` alias
//! - Configuration file discovery and root folder resolution
//! - Bank events and the broadcast event bus
//! - Ledger database initialization
//! - Clip fade curves
//! - Timestamp and session id helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod fade_curves;
pub mod time;

pub use error::{Error, Result};
pub use events::{BankEvent, EventBus};
pub use fade_curves::FadeCurve;
