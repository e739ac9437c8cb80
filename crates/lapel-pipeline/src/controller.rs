//! Session controller — the state machine and pipeline coordinator.
//!
//! One controller task owns one session. It is the sole mutator of session
//! state: the channel reader enqueues [`SessionInput`]s, the controller
//! consumes them in order, and every outbound frame leaves through the
//! bounded queue drained by the writer task. All timers (frame starvation
//! while recording, the playback ready-handshake, the reattach grace) live
//! here and each one maps to an explicit transition — no timeout leaves
//! the session in an implicit state.
//!
//! ```text
//!   connected → idle → recording → processing → playing → idle
//!                 ▲        │                        │
//!                 │        └── starvation ──▶ stalled
//!                 └─────────── re-record / fallback ┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use lapel_core::error::IngestError;
use lapel_core::ports::{ImageAttachment, ReplyGenerator, SpeechSynthesis, SpeechToText};
use lapel_core::protocol::{AckTarget, ClientMessage, ServerFrame};
use lapel_core::session::{ImageContext, Session, SessionSnapshot, SessionState};
use lapel_core::settings::{Settings, MIN_CHUNK_BYTES};

use crate::buffer::{AudioBuffer, BufferLimits, FinalizedRecording};
use crate::downloads::DownloadStore;
use crate::generator::GeneratorAdapter;
use crate::outbound::{Outbound, OutboundSender};
use crate::recognizer::{RecognizeOutcome, RecognizerAdapter};
use crate::streamer::PlaybackStreamer;
use crate::synthesizer::{ReplyArtifact, SynthesizerAdapter};

/// What the user hears when the recognizer collaborator itself fails.
const STT_APOLOGY: &str = "Sorry, I couldn't process that. Please try again in a moment.";

/// The three collaborator ports a controller is built from.
#[derive(Clone)]
pub struct Engines {
    pub stt: Arc<dyn SpeechToText>,
    pub llm: Arc<dyn ReplyGenerator>,
    pub tts: Arc<dyn SpeechSynthesis>,
}

/// Inputs consumed by the controller task, in arrival order.
#[derive(Debug)]
pub enum SessionInput {
    /// A decoded client text frame.
    Frame(ClientMessage),

    /// An opaque binary frame.
    Binary(Bytes),

    /// A channel was bound to this session.
    Attached {
        outbound: OutboundSender,
        resumed: bool,
    },

    /// The bound channel went away.
    Detached,

    /// An out-of-band image upload started.
    ImageUploadStarted,

    /// The upload failed or was rejected before completing.
    ImageUploadFailed,

    /// An upload completed; this context replaces the previous one.
    ImageStored(ImageContext),

    /// Destroy the session now (process shutdown, admin action).
    Shutdown,
}

enum NextInput {
    Input(SessionInput),
    ChunkStarved,
    GraceExpired,
    Closed,
}

enum ReadyOutcome {
    Ready,
    TimedOut,
    Lost,
}

/// The per-session state machine task.
pub struct SessionController {
    settings: Arc<Settings>,
    recognizer: RecognizerAdapter,
    generator: GeneratorAdapter,
    synthesizer: SynthesizerAdapter,
    streamer: PlaybackStreamer,
    downloads: Arc<DownloadStore>,
    session: Session,
    inbound: mpsc::Receiver<SessionInput>,
    outbound: Option<OutboundSender>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    temp_dir: PathBuf,
    recording: Option<AudioBuffer>,
    /// Set after `audio_chunk_meta`, cleared by the paired binary frame.
    awaiting_binary: Option<(u64, u64)>,
    /// Assistant turn staged until the client confirms it heard the reply.
    pending_assistant: Option<String>,
    ping_count: u64,
}

impl SessionController {
    /// Build a controller for `session_id`.
    ///
    /// Returns the controller and a watch receiver that always holds the
    /// latest [`SessionSnapshot`] for `/state` queries.
    #[must_use]
    pub fn new(
        settings: Arc<Settings>,
        engines: &Engines,
        downloads: Arc<DownloadStore>,
        session_id: &str,
        inbound: mpsc::Receiver<SessionInput>,
        temp_dir: PathBuf,
    ) -> (Self, watch::Receiver<SessionSnapshot>) {
        let session = Session::new(session_id, settings.history_max_turns);
        let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());

        let controller = Self {
            recognizer: RecognizerAdapter::new(Arc::clone(&engines.stt), &settings),
            generator: GeneratorAdapter::new(Arc::clone(&engines.llm), &settings),
            synthesizer: SynthesizerAdapter::new(Arc::clone(&engines.tts), &settings),
            streamer: PlaybackStreamer::new(settings.chunk_size_bytes),
            settings,
            downloads,
            session,
            inbound,
            outbound: None,
            snapshot_tx,
            temp_dir,
            recording: None,
            awaiting_binary: None,
            pending_assistant: None,
            ping_count: 0,
        };
        (controller, snapshot_rx)
    }

    /// Run the session to completion.
    pub async fn run(mut self) {
        tracing::info!(session = %self.session.id, "session controller started");

        loop {
            let input = match self.next_input().await {
                NextInput::Input(input) => input,
                NextInput::ChunkStarved => {
                    self.on_chunk_starvation().await;
                    continue;
                }
                NextInput::GraceExpired => {
                    self.begin_shutdown("idle_shutdown").await;
                    break;
                }
                NextInput::Closed => {
                    self.begin_shutdown("input channel closed").await;
                    break;
                }
            };

            self.handle_input(input).await;
            if self.session.state == SessionState::Shutdown {
                break;
            }
        }

        self.cleanup().await;
    }

    async fn next_input(&mut self) -> NextInput {
        if self.session.state == SessionState::Recording {
            return match timeout(self.settings.chunk_arrival_timeout, self.inbound.recv()).await {
                Ok(Some(input)) => NextInput::Input(input),
                Ok(None) => NextInput::Closed,
                Err(_) => NextInput::ChunkStarved,
            };
        }

        if self.outbound.is_none() {
            return match timeout(self.settings.session_grace, self.inbound.recv()).await {
                Ok(Some(input)) => NextInput::Input(input),
                Ok(None) => NextInput::Closed,
                Err(_) => NextInput::GraceExpired,
            };
        }

        match self.inbound.recv().await {
            Some(input) => NextInput::Input(input),
            None => NextInput::Closed,
        }
    }

    async fn handle_input(&mut self, input: SessionInput) {
        match input {
            SessionInput::Attached { outbound, resumed } => {
                self.on_attached(outbound, resumed).await;
            }
            SessionInput::Detached => self.on_detached().await,
            SessionInput::ImageUploadStarted => {
                self.session.image_uploading = true;
                self.publish();
            }
            SessionInput::ImageUploadFailed => {
                self.session.image_uploading = false;
                self.session.record_event("image_upload_failed", None);
                self.publish();
            }
            SessionInput::ImageStored(context) => self.on_image_stored(context).await,
            SessionInput::Shutdown => self.begin_shutdown("shutdown requested").await,
            SessionInput::Binary(bytes) => self.on_binary(bytes).await,
            SessionInput::Frame(message) => self.on_frame(message).await,
        }
    }

    // ── Channel lifecycle ──────────────────────────────────────────

    async fn on_attached(&mut self, outbound: OutboundSender, resumed: bool) {
        self.outbound = Some(outbound);
        self.session.record_event("channel_attached", None);

        if self.session.state == SessionState::Disconnected {
            self.transition(SessionState::Connected);
        }

        self.emit(ServerFrame::Ready).await;
        if resumed {
            let state = self.session.state.label().to_string();
            self.emit(ServerFrame::StateSync {
                server_state: state,
                message: "session resumed; server state is authoritative".to_string(),
            })
            .await;
        }
        self.publish();
    }

    async fn on_detached(&mut self) {
        self.outbound = None;
        self.session.record_event("channel_detached", None);

        match self.session.state {
            SessionState::Recording => {
                self.abort_recording("channel_lost").await;
                self.transition(SessionState::Stalled);
            }
            SessionState::Connected => self.transition(SessionState::Disconnected),
            _ => {}
        }
        self.publish();
    }

    // ── Frame dispatch ─────────────────────────────────────────────

    async fn on_frame(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::Ping => {
                self.ping_count += 1;
                let seq = self.ping_count;
                self.emit(ServerFrame::Ack {
                    target: AckTarget::Ping,
                    seq,
                })
                .await;
            }
            ClientMessage::Hello {
                device,
                capabilities,
            } => {
                self.session.record_event(
                    "hello",
                    Some(format!(
                        "device={} psram={}",
                        device.as_deref().unwrap_or("unknown"),
                        capabilities.psram
                    )),
                );
                self.on_client_ready().await;
            }
            ClientMessage::ClientOn => self.on_client_ready().await,
            ClientMessage::RecordingStarted { ts } => self.on_recording_started(ts).await,
            ClientMessage::AudioChunkMeta { seq, len_bytes } => {
                self.on_chunk_meta(seq, len_bytes).await;
            }
            ClientMessage::RecordingStopped => self.on_recording_stopped().await,
            ClientMessage::ImageCaptured { filename, size } => {
                self.session
                    .record_event("image_captured", Some(format!("{filename} ({size} bytes)")));
                self.publish();
            }
            ClientMessage::ReadyForPlayback => {
                // Only meaningful inside the playback handshake; a late one
                // after fallback or completion is ignored.
                tracing::debug!(
                    session = %self.session.id,
                    state = self.session.state.label(),
                    "ready_for_playback outside handshake ignored"
                );
            }
            ClientMessage::PlaybackComplete => self.on_playback_complete().await,
            ClientMessage::Error {
                state,
                error,
                detail,
            } => {
                tracing::warn!(
                    session = %self.session.id,
                    client_state = state.as_deref().unwrap_or("?"),
                    error = %error,
                    detail = detail.as_deref().unwrap_or(""),
                    "client reported an error"
                );
                self.session.record_event("client_error", Some(error));
                self.publish();
            }
            ClientMessage::Reject {
                reason,
                current_state,
            } => {
                tracing::warn!(
                    session = %self.session.id,
                    reason = %reason,
                    client_state = current_state.as_deref().unwrap_or("?"),
                    "client rejected a server instruction"
                );
                self.session.record_event("client_reject", Some(reason));
                self.publish();
            }
        }
    }

    async fn on_client_ready(&mut self) {
        match self.session.state {
            SessionState::Connected => self.transition(SessionState::Idle),
            SessionState::Stalled => {
                self.transition(SessionState::Idle);
                self.emit(ServerFrame::RequestRerecord {
                    reason: "stalled".to_string(),
                })
                .await;
            }
            SessionState::Idle => {}
            other => {
                tracing::debug!(state = other.label(), "client_on ignored in this state");
            }
        }
    }

    // ── Recording ingest ───────────────────────────────────────────

    async fn on_recording_started(&mut self, ts: Option<u64>) {
        if self.session.state != SessionState::Idle {
            tracing::debug!(
                state = self.session.state.label(),
                "recording_started ignored in this state"
            );
            return;
        }

        let budget = self
            .settings
            .max_session_disk_bytes
            .saturating_sub(self.session.disk_bytes);
        if budget == 0 {
            self.session.record_event("disk_quota_exceeded", None);
            self.emit(ServerFrame::RequestUserIntervention {
                message: "The session storage quota is exhausted. Please restart the device."
                    .to_string(),
            })
            .await;
            self.publish();
            return;
        }

        let limits = BufferLimits {
            min_chunk_bytes: MIN_CHUNK_BYTES,
            max_chunk_bytes: self.settings.max_chunk_bytes,
            seq_gap_tolerance: self.settings.seq_gap_tolerance,
            max_recording_bytes: self.settings.max_recording_bytes,
            disk_budget_bytes: budget,
            ack_every_n_chunks: self.settings.ack_every_n_chunks,
        };

        match AudioBuffer::open(&self.temp_dir, limits).await {
            Ok(buffer) => {
                self.recording = Some(buffer);
                self.awaiting_binary = None;
                self.session
                    .record_event("recording_started", ts.map(|t| t.to_string()));
                self.transition(SessionState::Recording);
            }
            Err(err) => {
                tracing::error!(session = %self.session.id, error = %err, "could not open audio buffer");
                self.session.record_event(err.code(), Some(err.to_string()));
                self.emit(ServerFrame::RequestUserIntervention {
                    message: "The recorder is unavailable right now. Please try again later."
                        .to_string(),
                })
                .await;
                self.publish();
            }
        }
    }

    async fn on_chunk_meta(&mut self, seq: u64, len_bytes: u64) {
        if self.session.state != SessionState::Recording {
            tracing::debug!("audio_chunk_meta outside recording ignored");
            return;
        }
        if self.awaiting_binary.is_some() {
            self.fail_utterance(IngestError::FrameProtocolViolation {
                detail: "audio_chunk_meta while a binary frame was pending".to_string(),
            })
            .await;
            return;
        }
        self.awaiting_binary = Some((seq, len_bytes));
    }

    async fn on_binary(&mut self, bytes: Bytes) {
        if self.session.state != SessionState::Recording {
            tracing::debug!(len = bytes.len(), "binary frame outside recording ignored");
            return;
        }

        let Some((seq, declared_len)) = self.awaiting_binary.take() else {
            self.fail_utterance(IngestError::FrameProtocolViolation {
                detail: "binary frame without a preceding audio_chunk_meta".to_string(),
            })
            .await;
            return;
        };

        if bytes.len() as u64 != declared_len {
            self.fail_utterance(IngestError::FrameProtocolViolation {
                detail: format!("declared {declared_len} bytes, received {}", bytes.len()),
            })
            .await;
            return;
        }

        let Some(buffer) = self.recording.as_mut() else {
            return;
        };
        match buffer.append(seq, bytes).await {
            Ok(outcome) => {
                if let Some(ack_seq) = outcome.ack {
                    self.emit(ServerFrame::Ack {
                        target: AckTarget::Chunk,
                        seq: ack_seq,
                    })
                    .await;
                }
            }
            Err(err) => self.fail_utterance(err).await,
        }
    }

    async fn on_recording_stopped(&mut self) {
        if self.session.state != SessionState::Recording {
            tracing::debug!("recording_stopped outside recording ignored");
            return;
        }
        if self.awaiting_binary.take().is_some() {
            self.fail_utterance(IngestError::FrameProtocolViolation {
                detail: "recording_stopped while a binary frame was pending".to_string(),
            })
            .await;
            return;
        }

        let Some(buffer) = self.recording.take() else {
            self.transition(SessionState::Idle);
            return;
        };

        match buffer.finalize(self.settings.sample_rate).await {
            Ok(recording) => {
                // Final cumulative ack so the client knows the highest
                // accepted seq even off the ack cadence.
                if let Some(last) = recording.last_seq {
                    self.emit(ServerFrame::Ack {
                        target: AckTarget::Chunk,
                        seq: last,
                    })
                    .await;
                }
                self.session.disk_bytes += recording.total_bytes;
                self.session.record_event(
                    "recording_stopped",
                    Some(format!("{} bytes", recording.total_bytes)),
                );
                self.transition(SessionState::Processing);
                self.run_pipeline(recording).await;
            }
            Err(err) => self.route_ingest_failure(err).await,
        }
    }

    async fn on_chunk_starvation(&mut self) {
        self.session.record_event("chunk_arrival_timeout", None);
        self.abort_recording("chunk_arrival_timeout").await;
        self.transition(SessionState::Stalled);
        let state = self.session.state.label().to_string();
        self.emit(ServerFrame::StateSync {
            server_state: state,
            message: "audio frames stopped arriving; recording was discarded".to_string(),
        })
        .await;
    }

    // ── The recognition → generation → synthesis pipeline ──────────

    async fn run_pipeline(&mut self, recording: FinalizedRecording) {
        let pcm = match tokio::fs::read(&recording.spill_path).await {
            Ok(pcm) => pcm,
            Err(err) => {
                tracing::error!(session = %self.session.id, error = %err, "spill read failed");
                self.discard_spill(&recording).await;
                self.session.record_event("ingest_io_failed", Some(err.to_string()));
                self.transition(SessionState::Idle);
                self.emit(ServerFrame::RequestUserIntervention {
                    message: "The recording could not be read back. Please try again.".to_string(),
                })
                .await;
                return;
            }
        };
        self.discard_spill(&recording).await;

        match self
            .recognizer
            .recognize(&pcm, self.settings.sample_rate)
            .await
        {
            RecognizeOutcome::Rejected(verdict) => {
                let reason = verdict.reason().unwrap_or("unusable_utterance");
                self.transition(SessionState::Idle);
                self.reject_utterance(reason).await;
            }
            RecognizeOutcome::Failed { detail } => {
                tracing::warn!(session = %self.session.id, detail = %detail, "recognizer collaborator failed");
                self.session.record_event("stt_failed", Some(detail));
                self.emit(ServerFrame::Llm {
                    text: STT_APOLOGY.to_string(),
                })
                .await;
                self.transition(SessionState::Idle);
            }
            RecognizeOutcome::Transcribed { text, interim } => {
                // A usable transcript ends the re-record cycle for this
                // interaction regardless of what happens downstream.
                self.session.retry_counter = 0;
                if let Some(partial) = interim {
                    self.emit(ServerFrame::Partial { text: partial }).await;
                }
                self.emit(ServerFrame::Transcript {
                    text: text.clone(),
                    is_final: true,
                })
                .await;
                self.publish();

                self.respond(text).await;
            }
        }
    }

    /// Generation and synthesis for one accepted transcript.
    async fn respond(&mut self, transcript: String) {
        let image_bytes = match &self.session.image {
            Some(context) => match tokio::fs::read(&context.path).await {
                Ok(bytes) => Some((bytes, context.mime.clone())),
                Err(err) => {
                    tracing::warn!(error = %err, "image context unreadable, generating without it");
                    None
                }
            },
            None => None,
        };
        let image = image_bytes
            .as_ref()
            .map(|(bytes, mime)| ImageAttachment { bytes, mime });

        let reply = self
            .generator
            .generate(&self.session.history, image, &transcript)
            .await;
        self.session.history.push_user(transcript);
        if reply.fallback {
            self.session.record_event("llm_failed", None);
        }
        self.emit(ServerFrame::Llm {
            text: reply.text.clone(),
        })
        .await;
        self.pending_assistant = (!reply.fallback).then(|| reply.text.clone());

        match self.synthesizer.synthesize(&reply.text, &self.temp_dir).await {
            Ok(artifact) => {
                self.session.disk_bytes += artifact.size_bytes;
                self.transition(SessionState::Playing);
                self.deliver_reply(artifact).await;
            }
            Err(err) => {
                tracing::error!(session = %self.session.id, error = %err, "synthesis failed");
                self.session.record_event("tts_failed", Some(err.to_string()));
                self.pending_assistant = None;
                self.transition(SessionState::Idle);
                self.emit(ServerFrame::RequestUserIntervention {
                    message: "I could not produce the spoken reply. Please try again.".to_string(),
                })
                .await;
            }
        }
    }

    // ── Playback ───────────────────────────────────────────────────

    async fn deliver_reply(&mut self, artifact: ReplyArtifact) {
        self.emit(ServerFrame::TtsReady {
            duration_ms: artifact.duration_ms,
            sample_rate: artifact.sample_rate,
            format: artifact.format,
        })
        .await;

        match self.wait_for_ready().await {
            ReadyOutcome::Ready => {
                let Some(outbound) = self.outbound.clone() else {
                    self.drop_artifact(&artifact).await;
                    self.pending_assistant = None;
                    self.transition(SessionState::Idle);
                    return;
                };
                match self.streamer.stream(&artifact, &outbound).await {
                    Ok(_) => {
                        // Streaming is done; the artifact has served its
                        // purpose. The session stays in playing until
                        // playback_complete arrives.
                        self.drop_artifact(&artifact).await;
                    }
                    Err(err) => {
                        tracing::warn!(session = %self.session.id, error = %err, "reply streaming aborted");
                        self.session.record_event("write_failed", Some(err.to_string()));
                        if matches!(err, crate::streamer::StreamError::ChannelClosed) {
                            self.outbound = None;
                        }
                        self.drop_artifact(&artifact).await;
                        self.pending_assistant = None;
                        self.transition(SessionState::Idle);
                    }
                }
            }
            ReadyOutcome::TimedOut => {
                self.session.disk_bytes = self
                    .session
                    .disk_bytes
                    .saturating_sub(artifact.size_bytes);
                match self
                    .downloads
                    .publish(&artifact.path, artifact.format.content_type())
                    .await
                {
                    Ok(token) => {
                        self.session.record_event("offer_download", Some(token.clone()));
                        self.emit(ServerFrame::OfferDownload {
                            url: format!("/download/{token}"),
                        })
                        .await;
                        self.commit_assistant_turn();
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "failed to publish download fallback");
                        let _ = tokio::fs::remove_file(&artifact.path).await;
                        self.pending_assistant = None;
                    }
                }
                self.transition(SessionState::Idle);
            }
            ReadyOutcome::Lost => {
                self.session.record_event("channel_lost", None);
                self.drop_artifact(&artifact).await;
                self.pending_assistant = None;
                self.transition(SessionState::Idle);
            }
        }
    }

    /// Wait for `ready_for_playback`, servicing ambient inputs inline.
    ///
    /// Deliberately does not route through `handle_input`: the recording
    /// handlers are meaningless mid-handshake, and keeping this loop flat
    /// keeps the controller future finite.
    async fn wait_for_ready(&mut self) -> ReadyOutcome {
        let deadline = tokio::time::Instant::now() + self.settings.playback_ready_timeout;

        loop {
            let input = match tokio::time::timeout_at(deadline, self.inbound.recv()).await {
                Err(_) => return ReadyOutcome::TimedOut,
                Ok(None) => return ReadyOutcome::Lost,
                Ok(Some(input)) => input,
            };

            match input {
                SessionInput::Frame(ClientMessage::ReadyForPlayback) => {
                    return ReadyOutcome::Ready;
                }
                SessionInput::Frame(ClientMessage::Ping) => {
                    self.ping_count += 1;
                    let seq = self.ping_count;
                    self.emit(ServerFrame::Ack {
                        target: AckTarget::Ping,
                        seq,
                    })
                    .await;
                }
                SessionInput::Frame(ClientMessage::ImageCaptured { filename, size }) => {
                    self.session
                        .record_event("image_captured", Some(format!("{filename} ({size} bytes)")));
                }
                SessionInput::Frame(other) => {
                    tracing::debug!(frame = ?other, "frame ignored during playback handshake");
                }
                SessionInput::Binary(bytes) => {
                    tracing::debug!(len = bytes.len(), "binary ignored during playback handshake");
                }
                SessionInput::Attached { outbound, resumed } => {
                    self.on_attached(outbound, resumed).await;
                }
                SessionInput::Detached => {
                    self.outbound = None;
                    return ReadyOutcome::Lost;
                }
                SessionInput::ImageUploadStarted => {
                    self.session.image_uploading = true;
                    self.publish();
                }
                SessionInput::ImageUploadFailed => {
                    self.session.image_uploading = false;
                    self.publish();
                }
                SessionInput::ImageStored(context) => self.on_image_stored(context).await,
                SessionInput::Shutdown => {
                    self.begin_shutdown("shutdown requested").await;
                    return ReadyOutcome::Lost;
                }
            }
        }
    }

    async fn on_playback_complete(&mut self) {
        if self.session.state != SessionState::Playing {
            // Late or duplicate playback_complete is idempotent.
            tracing::debug!(
                state = self.session.state.label(),
                "playback_complete ignored in this state"
            );
            return;
        }

        self.session.retry_counter = 0;
        self.commit_assistant_turn();
        self.session.record_event("playback_complete", None);
        self.transition(SessionState::Idle);
    }

    fn commit_assistant_turn(&mut self) {
        if let Some(text) = self.pending_assistant.take() {
            self.session.history.push_assistant(text);
        }
    }

    // ── Image context ──────────────────────────────────────────────

    async fn on_image_stored(&mut self, context: ImageContext) {
        self.session.image_uploading = false;

        if let Some(old) = self.session.image.take() {
            self.session.disk_bytes = self.session.disk_bytes.saturating_sub(old.size_bytes);
            if old.path != context.path {
                let _ = tokio::fs::remove_file(&old.path).await;
            }
        }

        self.session.disk_bytes += context.size_bytes;
        self.session
            .record_event("image_received", Some(context.filename.clone()));
        self.emit(ServerFrame::ImageReceived {
            filename: context.filename.clone(),
        })
        .await;
        self.session.image = Some(context);
        self.publish();
    }

    // ── Recovery policy ────────────────────────────────────────────

    /// Abort the current recording (if any) and route the failure.
    async fn fail_utterance(&mut self, err: IngestError) {
        self.abort_recording(err.code()).await;
        self.route_ingest_failure(err).await;
    }

    async fn route_ingest_failure(&mut self, err: IngestError) {
        self.session.record_event(err.code(), Some(err.to_string()));
        self.transition(SessionState::Idle);

        match err {
            IngestError::DiskQuotaExceeded { .. }
            | IngestError::MaxRecordingExceeded { .. }
            | IngestError::Io(_) => {
                self.emit(ServerFrame::RequestUserIntervention {
                    message: "The recording could not be stored. Please check the device."
                        .to_string(),
                })
                .await;
                self.publish();
            }
            _ => self.reject_utterance(err.code()).await,
        }
    }

    /// Ask for a re-record, or escalate once the interaction is out of
    /// attempts. The counter is interaction-scoped: it resets on a usable
    /// transcript, not on playback completion.
    async fn reject_utterance(&mut self, reason: &str) {
        if self.session.retry_counter < self.settings.max_rerecord_attempts {
            self.session.retry_counter += 1;
            self.session
                .record_event("request_rerecord", Some(reason.to_string()));
            self.emit(ServerFrame::RequestRerecord {
                reason: reason.to_string(),
            })
            .await;
        } else {
            self.session.retry_counter = 0;
            self.session
                .record_event("request_user_intervention", Some(reason.to_string()));
            self.emit(ServerFrame::RequestUserIntervention {
                message: format!(
                    "I couldn't make out the last few attempts ({reason}). Please check the device and try again."
                ),
            })
            .await;
        }
        self.publish();
    }

    async fn abort_recording(&mut self, reason: &str) -> u64 {
        self.awaiting_binary = None;
        match self.recording.take() {
            Some(buffer) => {
                let freed = buffer.abort().await;
                self.session
                    .record_event("recording_aborted", Some(reason.to_string()));
                freed
            }
            None => 0,
        }
    }

    // ── Cleanup ────────────────────────────────────────────────────

    async fn discard_spill(&mut self, recording: &FinalizedRecording) {
        let _ = tokio::fs::remove_file(&recording.spill_path).await;
        self.session.disk_bytes = self
            .session
            .disk_bytes
            .saturating_sub(recording.total_bytes);
    }

    async fn drop_artifact(&mut self, artifact: &ReplyArtifact) {
        let _ = tokio::fs::remove_file(&artifact.path).await;
        self.session.disk_bytes = self
            .session
            .disk_bytes
            .saturating_sub(artifact.size_bytes);
    }

    async fn begin_shutdown(&mut self, reason: &str) {
        self.session
            .record_event("shutdown", Some(reason.to_string()));
        self.abort_recording("shutdown").await;
        self.transition(SessionState::Shutdown);
    }

    async fn cleanup(&mut self) {
        if let Err(err) = tokio::fs::remove_dir_all(&self.temp_dir).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    session = %self.session.id,
                    dir = %self.temp_dir.display(),
                    error = %err,
                    "failed to remove session temp dir"
                );
            }
        }
        tracing::info!(session = %self.session.id, "session destroyed");
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn transition(&mut self, next: SessionState) {
        if self.session.state == next {
            return;
        }
        tracing::debug!(
            session = %self.session.id,
            from = self.session.state.label(),
            to = next.label(),
            "state transition"
        );
        self.session.state = next;
        self.session.record_event("state", Some(next.label().to_string()));
        self.publish();
    }

    /// Send one frame on the bound channel, if any.
    ///
    /// A send failure means the writer task is gone; the channel is
    /// forgotten so no further frames are attempted on it.
    async fn emit(&mut self, frame: ServerFrame) {
        if let Some(tx) = &self.outbound {
            if tx.send(Outbound::Frame(frame)).await.is_err() {
                self.outbound = None;
                self.session.record_event("write_failed", None);
            }
        }
    }

    fn publish(&self) {
        let _ = self.snapshot_tx.send(self.session.snapshot());
    }
}
