//! Wire protocol for the duplex control/data channel.
//!
//! The channel interleaves UTF-8 JSON text frames with opaque binary
//! frames. Every client text frame carries a `type` discriminant and the
//! `session` it belongs to; the payload is a closed set of variants
//! dispatched exhaustively. Binary frames are uninterpreted at this layer
//! and are handed to the session controller in receive order — pairing a
//! binary frame with its preceding `audio_chunk_meta` is the controller's
//! contract, not the codec's.
//!
//! Malformed text (not JSON, or missing `type`) is dropped with a warning;
//! the protocol never aborts a session over a single unparseable frame.

use serde::{Deserialize, Serialize};

/// Capability flags announced by the device in `hello`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientCapabilities {
    /// Whether the device has external PSRAM (larger capture buffers).
    pub psram: bool,

    /// Largest binary frame the device will send, in bytes.
    pub max_chunk_bytes: Option<u64>,
}

/// Client → server messages.
///
/// The `session` field common to all frames lives on [`ClientEnvelope`];
/// the variants here are the `type`-tagged payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// First frame after attach: device identity and capabilities.
    Hello {
        #[serde(default)]
        device: Option<String>,
        #[serde(default)]
        capabilities: ClientCapabilities,
    },

    /// Device is powered and ready for an interaction.
    ClientOn,

    /// The user pressed the button; audio frames follow.
    RecordingStarted {
        #[serde(default)]
        ts: Option<u64>,
    },

    /// Announces the next binary frame: sequence number and exact length.
    AudioChunkMeta { seq: u64, len_bytes: u64 },

    /// The user released the button; the utterance is complete.
    RecordingStopped,

    /// Metadata for an image uploaded out-of-band via `POST /image`.
    ImageCaptured { filename: String, size: u64 },

    /// The device has allocated playback buffers and wants the reply audio.
    ReadyForPlayback,

    /// The device finished rendering the reply audio.
    PlaybackComplete,

    /// Keepalive.
    Ping,

    /// Device-side error report (diagnostic only).
    Error {
        #[serde(default)]
        state: Option<String>,
        error: String,
        #[serde(default)]
        detail: Option<String>,
    },

    /// Device refused a server instruction (diagnostic only).
    Reject {
        reason: String,
        #[serde(default)]
        current_state: Option<String>,
    },
}

/// A parsed client text frame: the session id plus the tagged payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientEnvelope {
    pub session: String,

    #[serde(flatten)]
    pub message: ClientMessage,
}

/// What a server `ack` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckTarget {
    /// Cumulative acknowledgement of accepted audio chunks.
    Chunk,
    /// Reply to a client `ping`.
    Ping,
}

/// Encoding of the reply audio artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    /// PCM16LE wrapped in a minimal WAV container.
    #[default]
    Wav,
    /// Raw PCM16LE, no container.
    Pcm,
}

impl AudioFormat {
    /// File extension for artifacts in this format.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Pcm => "pcm",
        }
    }

    /// Content type served on the download fallback path.
    #[must_use]
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Wav => "audio/wav",
            Self::Pcm => "application/octet-stream",
        }
    }
}

/// Server → client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Channel attached and authenticated.
    Ready,

    /// Acknowledgement: highest accepted chunk seq, or a ping reply.
    Ack {
        #[serde(rename = "ref")]
        target: AckTarget,
        seq: u64,
    },

    /// Interim recognition text (best effort, not guaranteed).
    Partial { text: String },

    /// Final recognition result for the utterance.
    Transcript {
        text: String,
        #[serde(rename = "final")]
        is_final: bool,
    },

    /// Assistant reply text.
    Llm { text: String },

    /// Reply audio is rendered; playback handshake begins.
    TtsReady {
        duration_ms: u64,
        #[serde(rename = "sampleRate")]
        sample_rate: u32,
        format: AudioFormat,
    },

    /// Announces the next binary frame of reply audio.
    TtsChunkMeta { seq: u64, len_bytes: u64 },

    /// All reply audio chunks have been sent.
    TtsDone,

    /// An out-of-band image upload was bound to the session.
    ImageReceived { filename: String },

    /// The utterance was unusable; the client should prompt a re-record.
    RequestRerecord { reason: String },

    /// Playback handshake timed out; fetch the reply over HTTP instead.
    OfferDownload { url: String },

    /// Server-authoritative state summary (sent on resume).
    StateSync {
        server_state: String,
        message: String,
    },

    /// Recovery is exhausted; a human needs to look at the device.
    RequestUserIntervention { message: String },
}

/// Decode one inbound text frame.
///
/// Returns `None` for malformed input (invalid JSON, missing or unknown
/// `type`, missing `session`), which the caller must treat as "drop and
/// move on".
#[must_use]
pub fn decode_client_frame(text: &str) -> Option<ClientEnvelope> {
    match serde_json::from_str::<ClientEnvelope>(text) {
        Ok(envelope) => Some(envelope),
        Err(err) => {
            tracing::warn!(error = %err, len = text.len(), "dropping malformed client frame");
            None
        }
    }
}

/// Encode one outbound text frame as JSON.
pub fn encode_server_frame(frame: &ServerFrame) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}
