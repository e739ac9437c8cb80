//! Collaborator ports — trait abstractions for the three external services.
//!
//! The speech recognizer, reply generator, and speech synthesizer are
//! request/response collaborators with independent latencies and failure
//! modes. The orchestrator only ever talks to them through the traits here;
//! concrete engines (HTTP-backed in `lapel-engines`, mocks in tests) live
//! behind them. DTOs are transport-agnostic — no engine types leak into
//! this crate, and the dependency arrow stays one-way.

use std::time::Duration;

use async_trait::async_trait;

use crate::session::ConversationTurn;

/// Errors returned by collaborator ports.
///
/// Engines map their transport errors into these before crossing the port
/// boundary; the pipeline never sees a raw HTTP or I/O error.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    /// The collaborator did not answer within the per-attempt budget.
    #[error("collaborator timed out after {0:?}")]
    Timeout(Duration),

    /// The collaborator is unreachable or returned a server-side failure.
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    /// The collaborator rejected the request as invalid.
    #[error("collaborator rejected request: {0}")]
    Rejected(String),

    /// The collaborator answered with something unparseable.
    #[error("invalid collaborator response: {0}")]
    InvalidResponse(String),
}

/// Result of one recognition call.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    /// Final transcript text (may be empty).
    pub text: String,

    /// Recognizer confidence in 0.0–1.0, if the engine reports one.
    pub confidence: Option<f32>,

    /// Interim text produced while decoding, if the engine streams.
    pub interim: Option<String>,
}

/// Speech-to-text port.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe a complete PCM16LE mono utterance at `sample_rate` Hz.
    async fn transcribe(&self, pcm: &[u8], sample_rate: u32) -> Result<Transcription, PortError>;

    /// Engine name for diagnostics and `/health`.
    fn engine_name(&self) -> &str;
}

/// An image attached to a generation request.
#[derive(Debug, Clone, Copy)]
pub struct ImageAttachment<'a> {
    pub bytes: &'a [u8],
    pub mime: &'a str,
}

/// One generation request: system prompt, pruned history, latest user
/// transcript, and optionally the session's current visual context.
#[derive(Debug, Clone)]
pub struct ReplyRequest<'a> {
    pub system_prompt: &'a str,
    pub history: &'a [ConversationTurn],
    pub user_text: &'a str,
    pub image: Option<ImageAttachment<'a>>,
}

/// Multimodal reply generation port.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// Produce the assistant reply text for one request.
    async fn generate(&self, request: ReplyRequest<'_>) -> Result<String, PortError>;

    /// Engine name for diagnostics and `/health`.
    fn engine_name(&self) -> &str;
}

/// Rendered speech returned by the synthesis port.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    /// Raw PCM16LE mono bytes.
    pub pcm: Vec<u8>,

    /// Sample rate of `pcm`; collaborators must produce the canonical rate.
    pub sample_rate: u32,
}

/// Text-to-speech port.
#[async_trait]
pub trait SpeechSynthesis: Send + Sync {
    /// Render `text` as canonical PCM audio.
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, PortError>;

    /// Engine name for diagnostics and `/health`.
    fn engine_name(&self) -> &str;
}
