//! Utility modules for themebank-builder

pub mod audio_decoder;
pub mod clip_render;
pub mod db_retry;
pub mod hashing;
pub mod transaction;

pub use audio_decoder::{decode_audio_file, DecodedAudio};
pub use clip_render::{export_clip, render_clip, transcode_to_wav, write_wav_mono16};
pub use db_retry::retry_on_lock;
pub use hashing::{hash_file, hash_file_blocking};
pub use transaction::{begin_immediate, ImmediateTransaction};
