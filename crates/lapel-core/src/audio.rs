//! Canonical audio math.
//!
//! The only format on the ingest side, and the only format produced on the
//! reply side, is PCM 16-bit little-endian, mono, 16 000 Hz. Reply audio may
//! optionally be wrapped in a minimal WAV container; everything else in the
//! system reasons about raw sample bytes.

use std::io::Cursor;
use std::time::Duration;

/// Canonical sample rate in Hz.
pub const SAMPLE_RATE: u32 = 16_000;

/// Bytes per PCM16 mono sample.
pub const BYTES_PER_SAMPLE: u64 = 2;

/// Errors from WAV container handling.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("WAV encoding failed: {0}")]
    Wav(#[from] hound::Error),
}

/// Duration of a PCM16 mono byte stream at the given sample rate.
#[must_use]
pub fn duration_from_bytes(len_bytes: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let samples = len_bytes / BYTES_PER_SAMPLE;
    Duration::from_secs_f64(samples as f64 / f64::from(sample_rate))
}

/// Normalised RMS level (0.0–1.0) of a PCM16LE byte stream.
///
/// An RMS around 0.3 corresponds to very loud speech; silence is ~0.0.
/// A trailing odd byte is ignored.
#[must_use]
pub fn rms_level(pcm: &[u8]) -> f32 {
    let mut sum_sq = 0.0f64;
    let mut count = 0u64;

    for chunk in pcm.chunks_exact(2) {
        let sample = f64::from(i16::from_le_bytes([chunk[0], chunk[1]])) / 32_768.0;
        sum_sq += sample * sample;
        count += 1;
    }

    if count == 0 {
        return 0.0;
    }
    ((sum_sq / count as f64).sqrt()) as f32
}

/// Fraction of samples at or near full scale.
///
/// Used to flag clipped recordings: a microphone held against the speaker's
/// mouth produces long runs of railed samples.
#[must_use]
pub fn clipping_ratio(pcm: &[u8]) -> f32 {
    const RAIL: i16 = 32_000;

    let mut clipped = 0u64;
    let mut count = 0u64;

    for chunk in pcm.chunks_exact(2) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        if sample == i16::MIN || sample.saturating_abs() >= RAIL {
            clipped += 1;
        }
        count += 1;
    }

    if count == 0 {
        return 0.0;
    }
    clipped as f32 / count as f32
}

/// Wrap raw PCM16LE mono bytes in a minimal WAV container.
pub fn wrap_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>, AudioError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(pcm.len() + 44));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for chunk in pcm.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([chunk[0], chunk[1]]))?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_of_one_second_of_audio() {
        // 16 000 samples * 2 bytes = 32 000 bytes = exactly 1 s.
        assert_eq!(
            duration_from_bytes(32_000, SAMPLE_RATE),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn duration_of_half_second_chunk() {
        assert_eq!(
            duration_from_bytes(16_000, SAMPLE_RATE),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn silence_has_zero_rms() {
        let silence = vec![0u8; 1024];
        assert!(rms_level(&silence) < f32::EPSILON);
    }

    #[test]
    fn loud_signal_has_high_rms() {
        // Alternating full-scale samples.
        let mut pcm = Vec::new();
        for i in 0..1000i16 {
            let sample = if i % 2 == 0 { 20_000i16 } else { -20_000i16 };
            pcm.extend_from_slice(&sample.to_le_bytes());
        }
        assert!(rms_level(&pcm) > 0.5);
    }

    #[test]
    fn railed_samples_count_as_clipped() {
        let mut pcm = Vec::new();
        for _ in 0..100 {
            pcm.extend_from_slice(&i16::MAX.to_le_bytes());
        }
        for _ in 0..100 {
            pcm.extend_from_slice(&1000i16.to_le_bytes());
        }
        let ratio = clipping_ratio(&pcm);
        assert!((ratio - 0.5).abs() < 0.01, "ratio = {ratio}");
    }

    #[test]
    fn wav_wrap_prepends_header() {
        let pcm = vec![0u8; 320];
        let wav = wrap_wav(&pcm, SAMPLE_RATE).unwrap();

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), pcm.len() + 44);
    }
}
