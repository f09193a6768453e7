//! Audio Test Fixture Generator
//!
//! Mono 16-bit WAV fixtures. Tones are built from an integer-period
//! waveform so windows of a steady tone are sample-identical, while a ramped
//! tone gives every window different content.

use std::path::{Path, PathBuf};

/// Sample rate used by every fixture; low to keep tests fast
pub const FIXTURE_SAMPLE_RATE: u32 = 8000;

/// Configuration for generated audio
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub duration_seconds: f64,
    pub sample_rate: u32,
    /// Samples per waveform period; `sample_rate / period` is the frequency
    pub period_samples: usize,
    /// Grow the amplitude linearly from 10% to 90% over the file
    pub ramp: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            duration_seconds: 5.0,
            sample_rate: FIXTURE_SAMPLE_RATE,
            period_samples: 20,
            ramp: true,
        }
    }
}

impl AudioConfig {
    /// Ramped tone; different `variant`s give different content
    pub fn ramped(duration_seconds: f64, variant: usize) -> Self {
        Self {
            duration_seconds,
            period_samples: 16 + (variant % 32) * 2,
            ..Default::default()
        }
    }

    /// Constant-amplitude tone whose one-second windows are identical
    pub fn steady(duration_seconds: f64) -> Self {
        Self {
            duration_seconds,
            ramp: false,
            ..Default::default()
        }
    }
}

/// Generate a test WAV file with the given configuration
pub fn generate_test_wav(path: &Path, config: &AudioConfig) -> anyhow::Result<PathBuf> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: config.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    let total_samples = (config.duration_seconds * config.sample_rate as f64) as usize;
    let period = config.period_samples.max(2);

    for i in 0..total_samples {
        let amplitude = if config.ramp {
            0.1 + 0.8 * (i as f32 / total_samples.max(1) as f32)
        } else {
            0.5
        };
        let phase = (i % period) as f32 / period as f32;
        let value = amplitude * (2.0 * std::f32::consts::PI * phase).sin();
        writer.write_sample((value * i16::MAX as f32) as i16)?;
    }

    writer.finalize()?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_generate_ramped_wav() {
        let temp_dir = TempDir::new().unwrap();
        let wav_path = temp_dir.path().join("tone.wav");

        generate_test_wav(&wav_path, &AudioConfig::ramped(2.0, 3)).unwrap();

        let reader = hound::WavReader::open(&wav_path).unwrap();
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.len(), 2 * FIXTURE_SAMPLE_RATE);
    }
}
