//! Core domain for the lapel voice orchestrator.
//!
//! This crate holds everything that is independent of transports and
//! runtimes: the wire protocol frames, the session records, the canonical
//! audio math, the immutable settings value, and the port traits behind
//! which the three external collaborators (speech recognition, reply
//! generation, speech synthesis) live.
//!
//! Nothing in here performs network or disk I/O. The pipeline crate drives
//! these types; the axum crate moves them over the wire.

#![deny(unused_crate_dependencies)]

pub mod audio;
pub mod error;
pub mod image;
pub mod ports;
pub mod protocol;
pub mod session;
pub mod settings;

// Re-export commonly used types for convenience
pub use error::{IngestError, QualityVerdict};
pub use ports::{
    ImageAttachment, PortError, ReplyGenerator, ReplyRequest, SpeechSynthesis, SpeechToText,
    SynthesizedAudio, Transcription,
};
pub use protocol::{
    AckTarget, AudioFormat, ClientCapabilities, ClientEnvelope, ClientMessage, ServerFrame,
    decode_client_frame,
};
pub use session::{
    ConversationHistory, ConversationTurn, ImageContext, Role, Session, SessionEvent,
    SessionSnapshot, SessionState,
};
pub use settings::{Settings, SettingsError};
