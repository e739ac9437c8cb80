//! Speech-to-text over HTTP.
//!
//! Speaks to a whisper-server-style endpoint: the request body is the
//! utterance as a WAV file, the response is JSON with the transcript and,
//! when the service computes one, a confidence score.

use async_trait::async_trait;
use serde::Deserialize;

use lapel_core::audio;
use lapel_core::ports::{PortError, SpeechToText, Transcription};

use crate::config::EngineConfig;
use crate::error::{check_status, map_transport, EngineError};

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    text: String,
    #[serde(default)]
    confidence: Option<f32>,
}

/// HTTP implementation of the [`SpeechToText`] port.
pub struct HttpSpeechToText {
    client: reqwest::Client,
    url: String,
    timeout: std::time::Duration,
    name: String,
}

impl HttpSpeechToText {
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        Ok(Self {
            client: config.build_client()?,
            url: config.stt_url.clone(),
            timeout: config.timeout,
            name: format!("stt@{}", config.stt_url),
        })
    }
}

#[async_trait]
impl SpeechToText for HttpSpeechToText {
    async fn transcribe(&self, pcm: &[u8], sample_rate: u32) -> Result<Transcription, PortError> {
        let wav = audio::wrap_wav(pcm, sample_rate)
            .map_err(|err| PortError::InvalidResponse(format!("WAV encode failed: {err}")))?;

        tracing::debug!(url = %self.url, bytes = wav.len(), "transcription request");

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "audio/wav")
            .body(wav)
            .send()
            .await
            .map_err(|err| map_transport(&err, self.timeout))?;
        check_status(&response)?;

        let raw = response
            .bytes()
            .await
            .map_err(|err| PortError::InvalidResponse(err.to_string()))?;
        let body: TranscribeResponse = serde_json::from_slice(&raw)
            .map_err(|err| PortError::InvalidResponse(err.to_string()))?;

        tracing::debug!(
            text_len = body.text.len(),
            confidence = body.confidence,
            "transcription response"
        );

        Ok(Transcription {
            text: body.text,
            confidence: body.confidence,
            interim: None,
        })
    }

    fn engine_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_parses_with_and_without_confidence() {
        let with: TranscribeResponse =
            serde_json::from_str(r#"{"text":"hello","confidence":0.87}"#).unwrap();
        assert_eq!(with.text, "hello");
        assert_eq!(with.confidence, Some(0.87));

        let without: TranscribeResponse = serde_json::from_str(r#"{"text":"hi"}"#).unwrap();
        assert!(without.confidence.is_none());
    }
}
