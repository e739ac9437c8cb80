//! Synthesizer adapter — renders reply text into the canonical audio
//! artifact on local storage.
//!
//! The TTS collaborator returns raw PCM; the adapter wraps it per the
//! configured reply format (WAV by default), writes the artifact under the
//! session's temp directory, and reports the duration the client should
//! expect.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs;
use uuid::Uuid;

use lapel_core::audio::{self, AudioError};
use lapel_core::ports::{PortError, SpeechSynthesis};
use lapel_core::protocol::AudioFormat;
use lapel_core::settings::Settings;

/// Errors from one synthesis pass. All of them end the interaction; there
/// is no re-record path for a reply the user never heard.
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("synthesis timed out after {0:?}")]
    Timeout(Duration),

    #[error("synthesis failed: {0}")]
    Port(#[from] PortError),

    #[error("artifact I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Audio(#[from] AudioError),
}

/// A rendered reply on disk, ready for streaming or download fallback.
#[derive(Debug, Clone)]
pub struct ReplyArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub duration_ms: u64,
    pub sample_rate: u32,
    pub format: AudioFormat,
}

/// Wraps the TTS port with artifact handling.
pub struct SynthesizerAdapter {
    tts: Arc<dyn SpeechSynthesis>,
    format: AudioFormat,
    call_timeout: Duration,
}

impl SynthesizerAdapter {
    #[must_use]
    pub fn new(tts: Arc<dyn SpeechSynthesis>, settings: &Settings) -> Self {
        Self {
            tts,
            format: settings.reply_format,
            call_timeout: settings.collaborator_timeout,
        }
    }

    /// Engine name for `/health`.
    #[must_use]
    pub fn engine_name(&self) -> &str {
        self.tts.engine_name()
    }

    /// Render `text` and write the artifact under `dir`.
    pub async fn synthesize(&self, text: &str, dir: &Path) -> Result<ReplyArtifact, SynthesisError> {
        let call = self.tts.synthesize(text);
        let audio = tokio::time::timeout(self.call_timeout, call)
            .await
            .map_err(|_| SynthesisError::Timeout(self.call_timeout))??;

        let duration = audio::duration_from_bytes(audio.pcm.len() as u64, audio.sample_rate);
        let bytes = match self.format {
            AudioFormat::Wav => audio::wrap_wav(&audio.pcm, audio.sample_rate)?,
            AudioFormat::Pcm => audio.pcm,
        };

        fs::create_dir_all(dir).await?;
        let path = dir.join(format!("reply-{}.{}", Uuid::new_v4(), self.format.extension()));
        fs::write(&path, &bytes).await?;

        tracing::debug!(
            path = %path.display(),
            bytes = bytes.len(),
            duration_ms = duration.as_millis() as u64,
            "reply artifact written"
        );

        Ok(ReplyArtifact {
            path,
            size_bytes: bytes.len() as u64,
            duration_ms: duration.as_millis() as u64,
            sample_rate: audio.sample_rate,
            format: self.format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use lapel_core::ports::SynthesizedAudio;

    struct ToneTts {
        pcm_len: usize,
    }

    #[async_trait]
    impl SpeechSynthesis for ToneTts {
        async fn synthesize(&self, _text: &str) -> Result<SynthesizedAudio, PortError> {
            Ok(SynthesizedAudio {
                pcm: vec![0u8; self.pcm_len],
                sample_rate: 16_000,
            })
        }

        fn engine_name(&self) -> &str {
            "tone"
        }
    }

    struct DeadTts;

    #[async_trait]
    impl SpeechSynthesis for DeadTts {
        async fn synthesize(&self, _text: &str) -> Result<SynthesizedAudio, PortError> {
            Err(PortError::Unavailable("no route to host".into()))
        }

        fn engine_name(&self) -> &str {
            "dead"
        }
    }

    #[tokio::test]
    async fn writes_a_wav_artifact_with_duration() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::with_defaults("t", dir.path());
        let adapter = SynthesizerAdapter::new(Arc::new(ToneTts { pcm_len: 32_000 }), &settings);

        let artifact = adapter.synthesize("hello there", dir.path()).await.unwrap();

        assert_eq!(artifact.duration_ms, 1_000);
        assert_eq!(artifact.format, AudioFormat::Wav);
        assert_eq!(artifact.size_bytes, 32_000 + 44);
        let bytes = std::fs::read(&artifact.path).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
    }

    #[tokio::test]
    async fn raw_pcm_format_skips_the_container() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::with_defaults("t", dir.path());
        settings.reply_format = AudioFormat::Pcm;
        let adapter = SynthesizerAdapter::new(Arc::new(ToneTts { pcm_len: 16_000 }), &settings);

        let artifact = adapter.synthesize("hi", dir.path()).await.unwrap();

        assert_eq!(artifact.size_bytes, 16_000);
        assert_eq!(artifact.format, AudioFormat::Pcm);
    }

    #[tokio::test]
    async fn port_failure_surfaces_as_synthesis_error() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::with_defaults("t", dir.path());
        let adapter = SynthesizerAdapter::new(Arc::new(DeadTts), &settings);

        let err = adapter.synthesize("hi", dir.path()).await.unwrap_err();
        assert!(matches!(err, SynthesisError::Port(_)));
    }
}
