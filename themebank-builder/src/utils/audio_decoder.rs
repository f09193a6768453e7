//! Source decoding
//!
//! Turns whatever container the download tool produced (WAV, M4A, WebM,
//! MP3, ...) into one mono f32 channel using symphonia.

use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use themebank_common::{Error, Result};

/// Mono PCM for a whole source
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Channel count before the mono mixdown
    pub channels: usize,
    pub duration_seconds: f64,
}

impl DecodedAudio {
    pub fn duration_ms(&self) -> u64 {
        (self.duration_seconds * 1000.0) as u64
    }

    /// Number of samples covering `ms` milliseconds at this sample rate
    pub fn samples_for_ms(&self, ms: u64) -> usize {
        (ms as u128 * self.sample_rate as u128 / 1000) as usize
    }
}

/// First audio track of an opened container, ready to decode
struct OpenedSource {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: Option<u32>,
    channels: Option<usize>,
}

fn audio_error(path: &Path, what: &str, err: impl std::fmt::Display) -> Error {
    Error::Audio(format!("{} {}: {}", what, path.display(), err))
}

fn open_source(path: &Path) -> Result<OpenedSource> {
    let file = std::fs::File::open(path).map_err(|e| audio_error(path, "Failed to open audio file", e))?;
    let stream = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let reader = symphonia::default::get_probe()
        .format(&hint, stream, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| audio_error(path, "Unrecognized container in", e))?
        .format;

    let params = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .map(|t| (t.id, t.codec_params.clone()))
        .ok_or_else(|| Error::Audio(format!("No audio track in {}", path.display())))?;
    let (track_id, codec_params) = params;

    let decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| audio_error(path, "Unsupported codec in", e))?;

    Ok(OpenedSource {
        reader,
        decoder,
        track_id,
        sample_rate: codec_params.sample_rate,
        channels: codec_params.channels.map(|c| c.count()),
    })
}

/// Decode a source file to mono f32 PCM
///
/// Channels are averaged. Corrupt packets are skipped; a file yielding no
/// samples at all is an error.
pub fn decode_audio_file(path: &Path) -> Result<DecodedAudio> {
    let OpenedSource {
        mut reader,
        mut decoder,
        track_id,
        mut sample_rate,
        mut channels,
    } = open_source(path)?;

    let mut mono: Vec<f32> = Vec::new();
    let mut scratch: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match reader.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(audio_error(path, "Unreadable packet in", e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let block = match decoder.decode(&packet) {
            Ok(block) => block,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::debug!(path = %path.display(), error = %e, "Dropping corrupt packet");
                continue;
            }
            Err(e) => return Err(audio_error(path, "Decoder failed on", e)),
        };

        let spec = *block.spec();
        let width = spec.channels.count().max(1);
        sample_rate.get_or_insert(spec.rate);
        channels.get_or_insert(width);

        let frames = block.capacity() as u64;
        if scratch.as_ref().map_or(true, |b| (b.capacity() as u64) < frames * width as u64) {
            scratch = Some(SampleBuffer::new(frames, spec));
        }
        let Some(buf) = scratch.as_mut() else {
            continue;
        };
        buf.copy_interleaved_ref(block);
        mono.extend(
            buf.samples()
                .chunks_exact(width)
                .map(|frame| frame.iter().sum::<f32>() / width as f32),
        );
    }

    let sample_rate = sample_rate
        .filter(|rate| *rate > 0)
        .ok_or_else(|| Error::Audio(format!("Sample rate unknown for {}", path.display())))?;
    if mono.is_empty() {
        return Err(Error::Audio(format!("No decodable audio in {}", path.display())));
    }

    let duration_seconds = mono.len() as f64 / sample_rate as f64;
    tracing::debug!(
        path = %path.display(),
        samples = mono.len(),
        sample_rate,
        duration_seconds,
        "Decoded source"
    );

    Ok(DecodedAudio {
        samples: mono,
        sample_rate,
        channels: channels.unwrap_or(1),
        duration_seconds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_stereo_wav(path: &Path, seconds: f32, left: i16, right: i16) {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..(seconds * 8000.0) as usize {
            writer.write_sample(left).unwrap();
            writer.write_sample(right).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_decode_audio_file_not_found() {
        let result = decode_audio_file(Path::new("/nonexistent/file.mp3"));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Failed to open audio file"));
    }

    #[test]
    fn test_decode_stereo_wav_mixes_to_mono() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("stereo.wav");
        write_stereo_wav(&path, 0.5, 16384, 0);

        let decoded = decode_audio_file(&path).unwrap();
        assert_eq!(decoded.sample_rate, 8000);
        assert_eq!(decoded.channels, 2);
        assert_eq!(decoded.samples.len(), 4000);
        assert_eq!(decoded.duration_ms(), 500);
        // Average of 0.5 and 0.0
        assert!((decoded.samples[100] - 0.25).abs() < 0.01);
    }

    #[test]
    fn test_garbage_file_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("garbage.wav");
        std::fs::write(&path, b"definitely not audio").unwrap();
        assert!(decode_audio_file(&path).is_err());
    }
}
