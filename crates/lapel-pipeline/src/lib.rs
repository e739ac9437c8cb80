//! The lapel orchestration pipeline.
//!
//! One session is driven by three cooperating tasks: a channel reader that
//! turns wire frames into [`SessionInput`]s, a channel writer that drains
//! the [`Outbound`] queue in order, and the [`SessionController`] task that
//! owns the state machine and is the sole mutator of session state. This
//! crate holds the controller and everything it drives: the audio ingest
//! buffer, the three collaborator adapters, the playback streamer, the
//! fallback download store, the session registry, and the temp sweeper.
//!
//! The transport lives elsewhere (`lapel-axum`); everything here speaks
//! channels and filesystem paths only.

#![deny(unused_crate_dependencies)]

pub mod buffer;
pub mod controller;
pub mod downloads;
pub mod generator;
pub mod outbound;
pub mod recognizer;
pub mod registry;
pub mod streamer;
pub mod synthesizer;
pub mod sweeper;

// Re-export key types for convenience
pub use buffer::{AppendOutcome, AudioBuffer, BufferLimits, FinalizedRecording};
pub use controller::{Engines, SessionController, SessionInput};
pub use downloads::DownloadStore;
pub use generator::{GeneratedReply, GeneratorAdapter, FALLBACK_REPLY};
pub use outbound::{Outbound, OutboundSender, OUTBOUND_CHANNEL_CAPACITY};
pub use recognizer::{RecognizeOutcome, RecognizerAdapter};
pub use registry::{AttachError, Attachment, SessionRegistry};
pub use streamer::PlaybackStreamer;
pub use synthesizer::{ReplyArtifact, SynthesisError, SynthesizerAdapter};

// Silence unused dev-dependency warnings until more mock-based tests land
#[cfg(test)]
use tokio_test as _;
