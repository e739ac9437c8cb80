//! Speech synthesis over HTTP.
//!
//! POSTs `{text, voice, sample_rate}` and expects canonical PCM16LE mono
//! bytes back. Services that insist on returning WAV are tolerated: the
//! container is stripped so the port contract (raw PCM) holds either way.

use async_trait::async_trait;
use serde::Serialize;

use lapel_core::ports::{PortError, SpeechSynthesis, SynthesizedAudio};

use crate::config::EngineConfig;
use crate::error::{check_status, map_transport, EngineError};

/// Canonical output rate requested from the collaborator.
const OUTPUT_SAMPLE_RATE: u32 = 16_000;

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    voice: &'a str,
    sample_rate: u32,
}

/// Drop a leading WAV container if present, returning the PCM payload.
fn strip_wav_container(bytes: Vec<u8>) -> Vec<u8> {
    const HEADER_LEN: usize = 44;
    if bytes.len() > HEADER_LEN && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WAVE" {
        return bytes[HEADER_LEN..].to_vec();
    }
    bytes
}

/// HTTP implementation of the [`SpeechSynthesis`] port.
pub struct HttpSpeechSynthesis {
    client: reqwest::Client,
    url: String,
    voice: String,
    timeout: std::time::Duration,
    name: String,
}

impl HttpSpeechSynthesis {
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        Ok(Self {
            client: config.build_client()?,
            url: config.tts_url.clone(),
            voice: config.tts_voice.clone(),
            timeout: config.timeout,
            name: format!("tts@{}", config.tts_url),
        })
    }
}

#[async_trait]
impl SpeechSynthesis for HttpSpeechSynthesis {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, PortError> {
        let body = SynthesizeRequest {
            text,
            voice: &self.voice,
            sample_rate: OUTPUT_SAMPLE_RATE,
        };

        tracing::debug!(url = %self.url, voice = %self.voice, text_len = text.len(), "synthesis request");

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|err| map_transport(&err, self.timeout))?;
        check_status(&response)?;

        let bytes = response
            .bytes()
            .await
            .map_err(|err| PortError::InvalidResponse(err.to_string()))?;
        let pcm = strip_wav_container(bytes.to_vec());
        if pcm.is_empty() {
            return Err(PortError::InvalidResponse(
                "synthesis returned no audio".to_string(),
            ));
        }

        Ok(SynthesizedAudio {
            pcm,
            sample_rate: OUTPUT_SAMPLE_RATE,
        })
    }

    fn engine_name(&self) -> &str {
        &self.name
    }
}
