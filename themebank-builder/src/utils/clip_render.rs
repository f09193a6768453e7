//! Clip windowing, fades, normalization and WAV export

use std::path::Path;
use themebank_common::{Error, FadeCurve, Result};

use super::DecodedAudio;

/// Peak level clips are normalized to, in dBFS
pub const NORMALIZE_HEADROOM_DB: f32 = -0.1;

/// Cut `[start_ms, start_ms + duration_ms)` out of `audio`, fade both edges
/// over a quarter of the clip and peak-normalize.
///
/// Returns `None` when the window does not fit inside the source.
pub fn render_clip(
    audio: &DecodedAudio,
    start_ms: u64,
    duration_ms: u64,
    curve: FadeCurve,
) -> Option<Vec<f32>> {
    let start = audio.samples_for_ms(start_ms);
    let len = audio.samples_for_ms(duration_ms);
    if len == 0 || start + len > audio.samples.len() {
        return None;
    }

    let mut clip = audio.samples[start..start + len].to_vec();
    curve.apply_edge_fades(&mut clip, audio.samples_for_ms(duration_ms / 4));
    normalize_peak(&mut clip, NORMALIZE_HEADROOM_DB);
    Some(clip)
}

/// Scale so the loudest sample sits at `headroom_db` dBFS. Silence is left alone.
pub fn normalize_peak(samples: &mut [f32], headroom_db: f32) {
    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if peak <= f32::EPSILON {
        return;
    }
    let target = 10f32.powf(headroom_db / 20.0);
    let gain = target / peak;
    for sample in samples.iter_mut() {
        *sample *= gain;
    }
}

/// Write mono f32 samples as a 16-bit PCM WAV file
pub fn write_wav_mono16(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| Error::Audio(format!("Failed to create {}: {}", path.display(), e)))?;
    for sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
        writer
            .write_sample(value)
            .map_err(|e| Error::Audio(format!("Failed to write {}: {}", path.display(), e)))?;
    }
    writer
        .finalize()
        .map_err(|e| Error::Audio(format!("Failed to finalize {}: {}", path.display(), e)))?;

    Ok(())
}

/// Decode `source` (any supported container) and rewrite it as a mono
/// 16-bit WAV at `dest`, so identical audio always hashes identically.
pub fn transcode_to_wav(source: &Path, dest: &Path) -> Result<DecodedAudio> {
    let decoded = super::decode_audio_file(source)?;
    write_wav_mono16(dest, &decoded.samples, decoded.sample_rate)?;
    Ok(decoded)
}

/// Render a window and write it to `path`. `Ok(false)` if the window does not fit.
pub fn export_clip(
    audio: &DecodedAudio,
    start_ms: u64,
    duration_ms: u64,
    curve: FadeCurve,
    path: &Path,
) -> Result<bool> {
    match render_clip(audio, start_ms, duration_ms, curve) {
        Some(clip) => {
            write_wav_mono16(path, &clip, audio.sample_rate)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::decode_audio_file;
    use tempfile::TempDir;

    fn constant_audio(value: f32, seconds: f64) -> DecodedAudio {
        let sample_rate = 1000;
        DecodedAudio {
            samples: vec![value; (seconds * sample_rate as f64) as usize],
            sample_rate,
            channels: 1,
            duration_seconds: seconds,
        }
    }

    #[test]
    fn test_window_outside_source_is_none() {
        let audio = constant_audio(0.5, 1.0);
        assert!(render_clip(&audio, 0, 2000, FadeCurve::Linear).is_none());
        assert!(render_clip(&audio, 500, 600, FadeCurve::Linear).is_none());
        assert!(render_clip(&audio, 0, 1000, FadeCurve::Linear).is_some());
    }

    #[test]
    fn test_clip_is_faded_and_normalized() {
        let audio = constant_audio(0.25, 3.0);
        let clip = render_clip(&audio, 500, 2000, FadeCurve::Linear).unwrap();

        assert_eq!(clip.len(), 2000);
        assert_eq!(clip[0], 0.0);
        assert_eq!(clip[1999], 0.0);

        let peak = clip.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        let expected = 10f32.powf(NORMALIZE_HEADROOM_DB / 20.0);
        assert!((peak - expected).abs() < 1e-4, "peak {}", peak);
        // Middle of the clip is outside both fades
        assert!((clip[1000] - expected).abs() < 1e-4);
    }

    #[test]
    fn test_silence_stays_silent() {
        let mut samples = vec![0.0f32; 100];
        normalize_peak(&mut samples, NORMALIZE_HEADROOM_DB);
        assert!(samples.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_export_writes_readable_wav() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("clip.wav");
        let audio = constant_audio(0.5, 2.0);

        assert!(export_clip(&audio, 0, 1000, FadeCurve::SCurve, &path).unwrap());
        let decoded = decode_audio_file(&path).unwrap();
        assert_eq!(decoded.sample_rate, 1000);
        assert_eq!(decoded.samples.len(), 1000);

        let missing = temp_dir.path().join("none.wav");
        assert!(!export_clip(&audio, 1500, 1000, FadeCurve::Linear, &missing).unwrap());
        assert!(!missing.exists());
    }
}
