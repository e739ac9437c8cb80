//! Runtime configuration.
//!
//! One immutable [`Settings`] value is created at startup from the
//! environment (plus CLI overrides) and shared behind an `Arc` for the
//! lifetime of the process. Nothing reads environment variables after
//! startup, and no defaults are scattered through handler bodies — every
//! knob lives here with its default and its validation rule.

use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::AudioFormat;

/// Hard ceiling on the configurable chunk size (512 KiB).
pub const MAX_CHUNK_SIZE_BYTES: usize = 512 * 1024;

/// Smallest acceptable binary audio frame.
pub const MIN_CHUNK_BYTES: usize = 32;

/// Absolute ceiling for one utterance's spill file (~50 MB).
pub const MAX_RECORDING_BYTES: u64 = 50 * 1024 * 1024;

/// Errors raised while loading or validating settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("CHUNK_SIZE_BYTES must be a positive multiple of 2 no larger than {MAX_CHUNK_SIZE_BYTES}, got {0}")]
    BadChunkSize(usize),

    #[error("temp dir {dir} is not writable: {source}")]
    TempDirUnwritable {
        dir: String,
        source: std::io::Error,
    },
}

/// Endpoints and identities of the external collaborators.
#[derive(Debug, Clone)]
pub struct EngineEndpoints {
    /// Speech-to-text HTTP endpoint.
    pub stt_url: String,

    /// OpenAI-compatible chat completions endpoint.
    pub llm_url: String,

    /// Model name sent with generation requests.
    pub llm_model: String,

    /// Bearer token for the generation endpoint, if required.
    pub llm_api_key: Option<String>,

    /// Text-to-speech HTTP endpoint.
    pub tts_url: String,

    /// Voice identifier sent with synthesis requests.
    pub tts_voice: String,
}

impl Default for EngineEndpoints {
    fn default() -> Self {
        Self {
            stt_url: "http://127.0.0.1:8801/transcribe".to_string(),
            llm_url: "http://127.0.0.1:8802/v1/chat/completions".to_string(),
            llm_model: "default".to_string(),
            llm_api_key: None,
            tts_url: "http://127.0.0.1:8803/synthesize".to_string(),
            tts_voice: "default".to_string(),
        }
    }
}

/// Immutable runtime configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Bind address.
    pub host: String,

    /// Bind port.
    pub port: u16,

    /// Shared secret presented at channel attach and on `POST /image`.
    pub ws_token: String,

    /// Root of per-session spill/artifact directories.
    pub temp_dir: PathBuf,

    /// Reply chunk size on the wire (bytes of PCM per `tts_chunk_meta`).
    pub chunk_size_bytes: usize,

    /// Largest inbound binary frame accepted.
    pub max_chunk_bytes: usize,

    /// Utterances shorter than this are rejected `too_short`.
    pub min_record_duration: Duration,

    /// Re-record attempts allowed within one interaction.
    pub max_rerecord_attempts: u32,

    /// Window for the client's `ready_for_playback` before download fallback.
    pub playback_ready_timeout: Duration,

    /// Frame-to-frame starvation window while recording.
    pub chunk_arrival_timeout: Duration,

    /// How long a detached session waits for reattach before destruction.
    pub session_grace: Duration,

    /// Per-session disk budget.
    pub max_session_disk_bytes: u64,

    /// Absolute per-utterance byte ceiling.
    pub max_recording_bytes: u64,

    /// Transcripts below this confidence are rejected `low_confidence`.
    pub stt_confidence_threshold: f32,

    /// Canonical ingest sample rate.
    pub sample_rate: u32,

    /// Emit a cumulative chunk ack every Nth accepted frame.
    pub ack_every_n_chunks: u64,

    /// Benign forward sequence gap tolerated before aborting the utterance.
    pub seq_gap_tolerance: u64,

    /// Conversation turns retained per session.
    pub history_max_turns: usize,

    /// Character budget for the assembled generation prompt.
    pub prompt_char_budget: usize,

    /// Largest accepted image upload.
    pub max_image_bytes: usize,

    /// Lifetime of a fallback download token.
    pub download_ttl: Duration,

    /// Orphan sweeper cadence.
    pub sweep_interval: Duration,

    /// Age after which an orphaned temp entry is swept.
    pub sweep_max_age: Duration,

    /// Per-attempt budget for each collaborator call.
    pub collaborator_timeout: Duration,

    /// Container declared in `tts_ready` and used for artifacts.
    pub reply_format: AudioFormat,

    /// Collaborator endpoints.
    pub engines: EngineEndpoints,

    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Settings {
    /// Settings with stock defaults, a given token, and a given temp root.
    ///
    /// This is the constructor used by tests and by `from_env` once the
    /// required values are known.
    #[must_use]
    pub fn with_defaults(ws_token: impl Into<String>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8321,
            ws_token: ws_token.into(),
            temp_dir: temp_dir.into(),
            chunk_size_bytes: 16_000,
            max_chunk_bytes: MAX_CHUNK_SIZE_BYTES,
            min_record_duration: Duration::from_millis(500),
            max_rerecord_attempts: 2,
            playback_ready_timeout: Duration::from_secs(5),
            chunk_arrival_timeout: Duration::from_secs(5),
            session_grace: Duration::from_secs(30),
            max_session_disk_bytes: 100 * 1024 * 1024,
            max_recording_bytes: MAX_RECORDING_BYTES,
            stt_confidence_threshold: 0.5,
            sample_rate: 16_000,
            ack_every_n_chunks: 4,
            seq_gap_tolerance: 10,
            history_max_turns: 8,
            prompt_char_budget: 6_000,
            max_image_bytes: 8 * 1024 * 1024,
            download_ttl: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(60),
            sweep_max_age: Duration::from_secs(600),
            collaborator_timeout: Duration::from_secs(60),
            reply_format: AudioFormat::Wav,
            engines: EngineEndpoints::default(),
            log_level: "info".to_string(),
        }
    }

    /// Load settings from the process environment.
    ///
    /// `WS_TOKEN` is required; everything else falls back to the stock
    /// defaults. Values that fail to parse are an error, not a silent
    /// default — a typo in a quota must not widen it.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings from an arbitrary key → value lookup (testable core
    /// of [`from_env`](Self::from_env)).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let ws_token = lookup("WS_TOKEN").ok_or(SettingsError::Missing("WS_TOKEN"))?;
        let temp_dir = lookup("TEMP_DIR").unwrap_or_else(|| "/tmp/lapel".to_string());

        let mut settings = Self::with_defaults(ws_token, temp_dir);

        if let Some(host) = lookup("HOST") {
            settings.host = host;
        }
        settings.port = parse(&lookup, "PORT", settings.port)?;
        settings.chunk_size_bytes =
            parse(&lookup, "CHUNK_SIZE_BYTES", settings.chunk_size_bytes)?;
        settings.min_record_duration =
            parse_secs_f64(&lookup, "MIN_RECORD_DURATION_SEC", settings.min_record_duration)?;
        settings.max_rerecord_attempts =
            parse(&lookup, "MAX_RERECORD_ATTEMPTS", settings.max_rerecord_attempts)?;
        settings.playback_ready_timeout = parse_secs_f64(
            &lookup,
            "PLAYBACK_READY_TIMEOUT_SEC",
            settings.playback_ready_timeout,
        )?;
        settings.chunk_arrival_timeout = parse_secs_f64(
            &lookup,
            "CHUNK_ARRIVAL_TIMEOUT_SEC",
            settings.chunk_arrival_timeout,
        )?;
        settings.session_grace =
            parse_secs_f64(&lookup, "SESSION_GRACE_SEC", settings.session_grace)?;
        let disk_mb: u64 = parse(
            &lookup,
            "MAX_SESSION_DISK_MB",
            settings.max_session_disk_bytes / (1024 * 1024),
        )?;
        settings.max_session_disk_bytes = disk_mb * 1024 * 1024;
        settings.stt_confidence_threshold = parse(
            &lookup,
            "STT_CONFIDENCE_THRESHOLD",
            settings.stt_confidence_threshold,
        )?;
        settings.sample_rate = parse(&lookup, "STT_SAMPLE_RATE", settings.sample_rate)?;
        settings.ack_every_n_chunks =
            parse(&lookup, "ACK_EVERY_N_CHUNKS", settings.ack_every_n_chunks)?;
        settings.seq_gap_tolerance =
            parse(&lookup, "SEQ_GAP_TOLERANCE", settings.seq_gap_tolerance)?;
        settings.history_max_turns =
            parse(&lookup, "HISTORY_MAX_TURNS", settings.history_max_turns)?;
        settings.prompt_char_budget =
            parse(&lookup, "PROMPT_CHAR_BUDGET", settings.prompt_char_budget)?;
        settings.max_image_bytes = parse(&lookup, "MAX_IMAGE_BYTES", settings.max_image_bytes)?;
        settings.download_ttl = parse_secs_f64(&lookup, "DOWNLOAD_TTL_SEC", settings.download_ttl)?;
        settings.sweep_interval =
            parse_secs_f64(&lookup, "SWEEP_INTERVAL_SEC", settings.sweep_interval)?;
        settings.sweep_max_age =
            parse_secs_f64(&lookup, "SWEEP_MAX_AGE_SEC", settings.sweep_max_age)?;
        settings.collaborator_timeout = parse_secs_f64(
            &lookup,
            "COLLABORATOR_TIMEOUT_SEC",
            settings.collaborator_timeout,
        )?;
        if let Some(format) = lookup("REPLY_FORMAT") {
            settings.reply_format = match format.as_str() {
                "wav" => AudioFormat::Wav,
                "pcm" => AudioFormat::Pcm,
                _ => {
                    return Err(SettingsError::Invalid {
                        key: "REPLY_FORMAT",
                        value: format,
                    });
                }
            };
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            settings.log_level = level;
        }

        if let Some(url) = lookup("STT_URL") {
            settings.engines.stt_url = url;
        }
        if let Some(url) = lookup("LLM_URL") {
            settings.engines.llm_url = url;
        }
        if let Some(model) = lookup("LLM_MODEL") {
            settings.engines.llm_model = model;
        }
        settings.engines.llm_api_key = lookup("LLM_API_KEY");
        if let Some(url) = lookup("TTS_URL") {
            settings.engines.tts_url = url;
        }
        if let Some(voice) = lookup("TTS_VOICE") {
            settings.engines.tts_voice = voice;
        }

        Ok(settings)
    }

    /// Validate invariants that need checking once at startup.
    ///
    /// Creates the temp root and probes it for writability.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.chunk_size_bytes == 0
            || self.chunk_size_bytes % 2 != 0
            || self.chunk_size_bytes > MAX_CHUNK_SIZE_BYTES
        {
            return Err(SettingsError::BadChunkSize(self.chunk_size_bytes));
        }
        if self.ack_every_n_chunks == 0 {
            return Err(SettingsError::Invalid {
                key: "ACK_EVERY_N_CHUNKS",
                value: "0".to_string(),
            });
        }
        if self.sample_rate == 0 {
            return Err(SettingsError::Invalid {
                key: "STT_SAMPLE_RATE",
                value: "0".to_string(),
            });
        }

        let probe = self.temp_dir.join(".lapel-probe");
        let unwritable = |source| SettingsError::TempDirUnwritable {
            dir: self.temp_dir.display().to_string(),
            source,
        };
        std::fs::create_dir_all(&self.temp_dir).map_err(&unwritable)?;
        std::fs::write(&probe, b"probe").map_err(&unwritable)?;
        std::fs::remove_file(&probe).map_err(&unwritable)?;

        Ok(())
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, SettingsError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| SettingsError::Invalid { key, value: raw }),
    }
}

fn parse_secs_f64<F>(
    lookup: &F,
    key: &'static str,
    default: Duration,
) -> Result<Duration, SettingsError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => match raw.parse::<f64>() {
            Ok(secs) if secs >= 0.0 && secs.is_finite() => Ok(Duration::from_secs_f64(secs)),
            _ => Err(SettingsError::Invalid { key, value: raw }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        move |key| map.get(key).map(|v| (*v).to_string())
    }

    #[test]
    fn token_is_required() {
        let result = Settings::from_lookup(lookup_from(&[]));
        assert!(matches!(result, Err(SettingsError::Missing("WS_TOKEN"))));
    }

    #[test]
    fn stock_defaults_are_in_effect() {
        let settings =
            Settings::from_lookup(lookup_from(&[("WS_TOKEN", "secret")])).unwrap();

        assert_eq!(settings.chunk_size_bytes, 16_000);
        assert_eq!(settings.min_record_duration, Duration::from_millis(500));
        assert_eq!(settings.max_rerecord_attempts, 2);
        assert_eq!(settings.playback_ready_timeout, Duration::from_secs(5));
        assert_eq!(settings.chunk_arrival_timeout, Duration::from_secs(5));
        assert_eq!(settings.session_grace, Duration::from_secs(30));
        assert_eq!(settings.max_session_disk_bytes, 100 * 1024 * 1024);
        assert_eq!(settings.sample_rate, 16_000);
        assert_eq!(settings.reply_format, AudioFormat::Wav);
    }

    #[test]
    fn fractional_durations_parse() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("WS_TOKEN", "secret"),
            ("MIN_RECORD_DURATION_SEC", "0.25"),
        ]))
        .unwrap();

        assert_eq!(settings.min_record_duration, Duration::from_millis(250));
    }

    #[test]
    fn bad_numeric_is_an_error_not_a_default() {
        let result = Settings::from_lookup(lookup_from(&[
            ("WS_TOKEN", "secret"),
            ("MAX_SESSION_DISK_MB", "lots"),
        ]));
        assert!(matches!(result, Err(SettingsError::Invalid { key, .. }) if key == "MAX_SESSION_DISK_MB"));
    }

    #[test]
    fn unknown_reply_format_is_rejected() {
        let result = Settings::from_lookup(lookup_from(&[
            ("WS_TOKEN", "secret"),
            ("REPLY_FORMAT", "opus"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn odd_chunk_size_fails_validation() {
        let dir = std::env::temp_dir().join("lapel-settings-test");
        let mut settings = Settings::with_defaults("t", &dir);
        settings.chunk_size_bytes = 16_001;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::BadChunkSize(16_001))
        ));
    }

    #[test]
    fn oversized_chunk_size_fails_validation() {
        let dir = std::env::temp_dir().join("lapel-settings-test");
        let mut settings = Settings::with_defaults("t", &dir);
        settings.chunk_size_bytes = MAX_CHUNK_SIZE_BYTES + 2;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_probes_the_temp_dir() {
        let dir = std::env::temp_dir().join("lapel-settings-probe");
        let settings = Settings::with_defaults("t", &dir);
        settings.validate().unwrap();
        assert!(dir.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
