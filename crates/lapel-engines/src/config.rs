//! Engine client configuration.

use std::time::Duration;

use lapel_core::settings::Settings;

/// Configuration shared by the three HTTP engine clients.
///
/// Use the builder methods to customise individual fields, or derive the
/// whole thing from [`Settings`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Transcription endpoint (POST, WAV body).
    pub(crate) stt_url: String,

    /// Chat completions endpoint (POST, OpenAI-compatible JSON).
    pub(crate) llm_url: String,

    /// Model name sent with generation requests.
    pub(crate) llm_model: String,

    /// Bearer token for the generation endpoint, if required.
    pub(crate) llm_api_key: Option<String>,

    /// Synthesis endpoint (POST, JSON body, audio bytes back).
    pub(crate) tts_url: String,

    /// Voice identifier sent with synthesis requests.
    pub(crate) tts_voice: String,

    /// Whole-request timeout per call.
    pub(crate) timeout: Duration,

    /// User agent string for HTTP requests.
    pub(crate) user_agent: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let endpoints = lapel_core::settings::EngineEndpoints::default();
        Self {
            stt_url: endpoints.stt_url,
            llm_url: endpoints.llm_url,
            llm_model: endpoints.llm_model,
            llm_api_key: None,
            tts_url: endpoints.tts_url,
            tts_voice: endpoints.tts_voice,
            timeout: Duration::from_secs(60),
            user_agent: concat!("lapel-engines/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the engine configuration from the server settings.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            stt_url: settings.engines.stt_url.clone(),
            llm_url: settings.engines.llm_url.clone(),
            llm_model: settings.engines.llm_model.clone(),
            llm_api_key: settings.engines.llm_api_key.clone(),
            tts_url: settings.engines.tts_url.clone(),
            tts_voice: settings.engines.tts_voice.clone(),
            timeout: settings.collaborator_timeout,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_stt_url(mut self, url: impl Into<String>) -> Self {
        self.stt_url = url.into();
        self
    }

    #[must_use]
    pub fn with_llm_url(mut self, url: impl Into<String>) -> Self {
        self.llm_url = url.into();
        self
    }

    #[must_use]
    pub fn with_llm_model(mut self, model: impl Into<String>) -> Self {
        self.llm_model = model.into();
        self
    }

    #[must_use]
    pub fn with_llm_api_key(mut self, key: Option<String>) -> Self {
        self.llm_api_key = key;
        self
    }

    #[must_use]
    pub fn with_tts_url(mut self, url: impl Into<String>) -> Self {
        self.tts_url = url.into();
        self
    }

    #[must_use]
    pub fn with_tts_voice(mut self, voice: impl Into<String>) -> Self {
        self.tts_voice = voice.into();
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the shared reqwest client for one engine.
    pub(crate) fn build_client(&self) -> Result<reqwest::Client, crate::error::EngineError> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.clone())
            .build()
            .map_err(|err| crate::error::EngineError::ClientBuild(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_local_endpoints() {
        let config = EngineConfig::new();
        assert!(config.stt_url.starts_with("http://127.0.0.1"));
        assert!(config.user_agent.contains("lapel-engines"));
        assert_eq!(config.timeout, Duration::from_secs(60));
    }

    #[test]
    fn builder_overrides_stick() {
        let config = EngineConfig::new()
            .with_llm_url("http://llm.local/v1/chat/completions")
            .with_llm_model("pixtral")
            .with_llm_api_key(Some("sk-123".into()))
            .with_timeout(Duration::from_secs(5));

        assert_eq!(config.llm_url, "http://llm.local/v1/chat/completions");
        assert_eq!(config.llm_model, "pixtral");
        assert_eq!(config.llm_api_key.as_deref(), Some("sk-123"));
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn from_settings_copies_endpoints() {
        let mut settings = Settings::with_defaults("t", "/tmp/lapel-test");
        settings.engines.stt_url = "http://stt.local/transcribe".into();
        settings.engines.tts_voice = "bf_emma".into();

        let config = EngineConfig::from_settings(&settings);
        assert_eq!(config.stt_url, "http://stt.local/transcribe");
        assert_eq!(config.tts_voice, "bf_emma");
        assert_eq!(config.timeout, settings.collaborator_timeout);
    }
}
