//! HTTP-backed collaborator engines.
//!
//! Default implementations of the `lapel-core` ports against plain HTTP
//! services: a whisper-style transcription endpoint, an OpenAI-compatible
//! chat completions endpoint (with the session image attached as a base64
//! data URI), and a synthesis endpoint returning canonical PCM.
//!
//! Everything here is an implementation detail behind the port traits —
//! the pipeline never sees a reqwest type. Transport errors are mapped to
//! `PortError` at this boundary; the retry policy stays in the pipeline's
//! generator adapter, so these clients make exactly one attempt per call.

#![deny(unused_crate_dependencies)]

mod config;
mod error;
mod llm;
mod stt;
mod tts;

pub use config::EngineConfig;
pub use error::EngineError;
pub use llm::HttpReplyGenerator;
pub use stt::HttpSpeechToText;
pub use tts::HttpSpeechSynthesis;
