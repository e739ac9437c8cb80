//! Recognizer adapter — quality gate plus the speech-to-text collaborator.
//!
//! Coarse audio quality (duration, RMS energy, clipping) is computed before
//! spending a collaborator call: silence and button-fumble blips never leave
//! the server. Only a gated utterance reaches the STT port, and its result
//! is then judged against the confidence threshold.

use std::sync::Arc;
use std::time::Duration;

use lapel_core::audio;
use lapel_core::error::QualityVerdict;
use lapel_core::ports::SpeechToText;
use lapel_core::settings::Settings;

/// RMS below this is inaudible on the device microphone.
const QUIET_RMS_FLOOR: f32 = 0.01;

/// Clipped-sample fraction above which the take is unusable.
const CLIPPING_CEILING: f32 = 0.2;

/// Outcome of one recognition pass.
#[derive(Debug)]
pub enum RecognizeOutcome {
    /// Usable transcript; the pipeline proceeds to generation.
    Transcribed {
        text: String,
        interim: Option<String>,
    },

    /// The utterance failed the quality gate; recoverable via re-record.
    Rejected(QualityVerdict),

    /// The collaborator itself failed; not the user's fault.
    Failed { detail: String },
}

/// Wraps the STT port with the quality policy.
pub struct RecognizerAdapter {
    stt: Arc<dyn SpeechToText>,
    min_duration: Duration,
    confidence_threshold: f32,
    call_timeout: Duration,
}

impl RecognizerAdapter {
    #[must_use]
    pub fn new(stt: Arc<dyn SpeechToText>, settings: &Settings) -> Self {
        Self {
            stt,
            min_duration: settings.min_record_duration,
            confidence_threshold: settings.stt_confidence_threshold,
            call_timeout: settings.collaborator_timeout,
        }
    }

    /// Engine name for `/health`.
    #[must_use]
    pub fn engine_name(&self) -> &str {
        self.stt.engine_name()
    }

    /// Gate and transcribe one complete utterance.
    pub async fn recognize(&self, pcm: &[u8], sample_rate: u32) -> RecognizeOutcome {
        let duration = audio::duration_from_bytes(pcm.len() as u64, sample_rate);
        if duration < self.min_duration {
            return RecognizeOutcome::Rejected(QualityVerdict::TooShort);
        }

        let rms = audio::rms_level(pcm);
        if rms < QUIET_RMS_FLOOR {
            return RecognizeOutcome::Rejected(QualityVerdict::TooQuiet);
        }

        let clipping = audio::clipping_ratio(pcm);
        if clipping > CLIPPING_CEILING {
            return RecognizeOutcome::Rejected(QualityVerdict::TooLoud);
        }

        tracing::debug!(
            duration_ms = duration.as_millis() as u64,
            rms,
            clipping,
            "utterance passed the quality gate"
        );

        let call = self.stt.transcribe(pcm, sample_rate);
        let transcription = match tokio::time::timeout(self.call_timeout, call).await {
            Err(_) => {
                return RecognizeOutcome::Failed {
                    detail: format!("recognizer timed out after {:?}", self.call_timeout),
                };
            }
            Ok(Err(err)) => {
                return RecognizeOutcome::Failed {
                    detail: err.to_string(),
                };
            }
            Ok(Ok(transcription)) => transcription,
        };

        if transcription.text.trim().is_empty() {
            return RecognizeOutcome::Rejected(QualityVerdict::Empty);
        }
        if let Some(confidence) = transcription.confidence {
            if confidence < self.confidence_threshold {
                tracing::debug!(confidence, threshold = self.confidence_threshold, "transcript below confidence threshold");
                return RecognizeOutcome::Rejected(QualityVerdict::LowConfidence);
            }
        }

        RecognizeOutcome::Transcribed {
            text: transcription.text,
            interim: transcription.interim,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use lapel_core::ports::{PortError, Transcription};

    struct FixedStt {
        text: &'static str,
        confidence: Option<f32>,
    }

    #[async_trait]
    impl SpeechToText for FixedStt {
        async fn transcribe(
            &self,
            _pcm: &[u8],
            _sample_rate: u32,
        ) -> Result<Transcription, PortError> {
            Ok(Transcription {
                text: self.text.to_string(),
                confidence: self.confidence,
                interim: None,
            })
        }

        fn engine_name(&self) -> &str {
            "fixed"
        }
    }

    struct BrokenStt;

    #[async_trait]
    impl SpeechToText for BrokenStt {
        async fn transcribe(
            &self,
            _pcm: &[u8],
            _sample_rate: u32,
        ) -> Result<Transcription, PortError> {
            Err(PortError::Unavailable("connection refused".into()))
        }

        fn engine_name(&self) -> &str {
            "broken"
        }
    }

    fn adapter(stt: Arc<dyn SpeechToText>) -> RecognizerAdapter {
        let settings = Settings::with_defaults("t", "/tmp/lapel-test");
        RecognizerAdapter::new(stt, &settings)
    }

    /// Loud-enough PCM of the given byte length.
    fn speech(len: usize) -> Vec<u8> {
        let mut pcm = Vec::with_capacity(len);
        let mut i = 0i16;
        while pcm.len() + 2 <= len {
            let sample = if i % 2 == 0 { 8_000i16 } else { -8_000i16 };
            pcm.extend_from_slice(&sample.to_le_bytes());
            i += 1;
        }
        pcm.resize(len, 0);
        pcm
    }

    #[tokio::test]
    async fn exactly_min_duration_passes() {
        let adapter = adapter(Arc::new(FixedStt {
            text: "hello",
            confidence: Some(0.9),
        }));

        // 16 000 bytes at 16 kHz PCM16 mono is exactly 0.5 s.
        let outcome = adapter.recognize(&speech(16_000), 16_000).await;
        assert!(matches!(outcome, RecognizeOutcome::Transcribed { .. }));
    }

    #[tokio::test]
    async fn below_min_duration_is_too_short() {
        let adapter = adapter(Arc::new(FixedStt {
            text: "hello",
            confidence: Some(0.9),
        }));

        let outcome = adapter.recognize(&speech(8_000), 16_000).await;
        assert!(matches!(
            outcome,
            RecognizeOutcome::Rejected(QualityVerdict::TooShort)
        ));
    }

    #[tokio::test]
    async fn silence_is_too_quiet() {
        let adapter = adapter(Arc::new(FixedStt {
            text: "hello",
            confidence: Some(0.9),
        }));

        let outcome = adapter.recognize(&vec![0u8; 32_000], 16_000).await;
        assert!(matches!(
            outcome,
            RecognizeOutcome::Rejected(QualityVerdict::TooQuiet)
        ));
    }

    #[tokio::test]
    async fn clipped_audio_is_too_loud() {
        let adapter = adapter(Arc::new(FixedStt {
            text: "hello",
            confidence: Some(0.9),
        }));

        let mut pcm = Vec::new();
        for _ in 0..16_000 {
            pcm.extend_from_slice(&i16::MAX.to_le_bytes());
        }
        let outcome = adapter.recognize(&pcm, 16_000).await;
        assert!(matches!(
            outcome,
            RecognizeOutcome::Rejected(QualityVerdict::TooLoud)
        ));
    }

    #[tokio::test]
    async fn empty_transcript_is_rejected() {
        let adapter = adapter(Arc::new(FixedStt {
            text: "   ",
            confidence: Some(0.9),
        }));

        let outcome = adapter.recognize(&speech(32_000), 16_000).await;
        assert!(matches!(
            outcome,
            RecognizeOutcome::Rejected(QualityVerdict::Empty)
        ));
    }

    #[tokio::test]
    async fn low_confidence_is_rejected() {
        let adapter = adapter(Arc::new(FixedStt {
            text: "mumble",
            confidence: Some(0.2),
        }));

        let outcome = adapter.recognize(&speech(32_000), 16_000).await;
        assert!(matches!(
            outcome,
            RecognizeOutcome::Rejected(QualityVerdict::LowConfidence)
        ));
    }

    #[tokio::test]
    async fn collaborator_failure_is_not_a_rejection() {
        let adapter = adapter(Arc::new(BrokenStt));

        let outcome = adapter.recognize(&speech(32_000), 16_000).await;
        assert!(matches!(outcome, RecognizeOutcome::Failed { .. }));
    }
}
