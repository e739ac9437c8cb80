//! Session registry — the session table and admission policy.
//!
//! The registry owns the map from session id to the channels of its
//! controller task. Admission is deliberately conservative: one actively
//! bound session at a time. A second channel is rejected with a conflict
//! unless it presents the id of a session that is detached and waiting out
//! its grace period, in which case it resumes that session.
//!
//! Controllers remove their own rows when they terminate; the registry
//! never reaches into a live session's state.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};

use lapel_core::session::SessionSnapshot;
use lapel_core::settings::Settings;

use crate::controller::{Engines, SessionController, SessionInput};
use crate::downloads::DownloadStore;

/// Capacity of the per-session input queue.
const INPUT_CHANNEL_CAPACITY: usize = 64;

/// Why an attach was refused.
#[derive(Debug, thiserror::Error)]
pub enum AttachError {
    /// Another session is actively bound, or this one already has a channel.
    #[error("session conflict: an active session is already bound")]
    Conflict,

    /// The presented session id is unusable.
    #[error("invalid session id")]
    InvalidSessionId,
}

/// A successful attach: where to send inputs, and whether this resumed an
/// existing session.
#[derive(Debug)]
pub struct Attachment {
    pub input_tx: mpsc::Sender<SessionInput>,
    pub resumed: bool,
}

struct SessionHandle {
    input_tx: mpsc::Sender<SessionInput>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    attached: bool,
    instance: u64,
}

type SessionTable = Arc<Mutex<HashMap<String, SessionHandle>>>;

/// The session table plus everything needed to spawn controllers.
pub struct SessionRegistry {
    settings: Arc<Settings>,
    engines: Engines,
    downloads: Arc<DownloadStore>,
    table: SessionTable,
    instance_counter: AtomicU64,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(settings: Arc<Settings>, engines: Engines, downloads: Arc<DownloadStore>) -> Self {
        Self {
            settings,
            engines,
            downloads,
            table: Arc::new(Mutex::new(HashMap::new())),
            instance_counter: AtomicU64::new(0),
        }
    }

    /// Bind a channel to `session_id`, creating or resuming the session.
    pub async fn attach(&self, session_id: &str) -> Result<Attachment, AttachError> {
        if !valid_session_id(session_id) {
            return Err(AttachError::InvalidSessionId);
        }

        let mut table = self.table.lock().await;

        if let Some(handle) = table.get_mut(session_id) {
            if handle.attached {
                tracing::warn!(session = %session_id, "attach refused: already bound");
                return Err(AttachError::Conflict);
            }
            handle.attached = true;
            tracing::info!(session = %session_id, "resuming session within grace");
            return Ok(Attachment {
                input_tx: handle.input_tx.clone(),
                resumed: true,
            });
        }

        // Single-active-session policy: a new id is refused while any
        // session still has a channel bound.
        if table.values().any(|handle| handle.attached) {
            tracing::warn!(session = %session_id, "attach refused: another session is active");
            return Err(AttachError::Conflict);
        }

        let instance = self.instance_counter.fetch_add(1, Ordering::Relaxed);
        let (input_tx, input_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
        let temp_dir = self.session_dir(session_id);
        let (controller, snapshot_rx) = SessionController::new(
            Arc::clone(&self.settings),
            &self.engines,
            Arc::clone(&self.downloads),
            session_id,
            input_rx,
            temp_dir,
        );

        let table_ref = Arc::clone(&self.table);
        let id = session_id.to_string();
        tokio::spawn(async move {
            controller.run().await;
            let mut table = table_ref.lock().await;
            if table
                .get(&id)
                .is_some_and(|handle| handle.instance == instance)
            {
                table.remove(&id);
            }
        });

        table.insert(
            session_id.to_string(),
            SessionHandle {
                input_tx: input_tx.clone(),
                snapshot_rx,
                attached: true,
                instance,
            },
        );

        tracing::info!(session = %session_id, "session created");
        Ok(Attachment {
            input_tx,
            resumed: false,
        })
    }

    /// Record that the session's channel went away and tell the controller.
    pub async fn mark_detached(&self, session_id: &str) {
        let input_tx = {
            let mut table = self.table.lock().await;
            match table.get_mut(session_id) {
                Some(handle) => {
                    handle.attached = false;
                    Some(handle.input_tx.clone())
                }
                None => None,
            }
        };
        if let Some(tx) = input_tx {
            let _ = tx.send(SessionInput::Detached).await;
        }
    }

    /// Latest published snapshot for `GET /state`.
    pub async fn snapshot(&self, session_id: &str) -> Option<SessionSnapshot> {
        let table = self.table.lock().await;
        table
            .get(session_id)
            .map(|handle| handle.snapshot_rx.borrow().clone())
    }

    /// Input sender for out-of-band producers (image intake).
    pub async fn input_sender(&self, session_id: &str) -> Option<mpsc::Sender<SessionInput>> {
        let table = self.table.lock().await;
        table.get(session_id).map(|handle| handle.input_tx.clone())
    }

    /// Per-session directory under the temp root.
    #[must_use]
    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.settings.temp_dir.join(session_id)
    }

    /// Whether `name` is the directory of a live session (sweeper guard).
    pub async fn is_live(&self, name: &str) -> bool {
        let table = self.table.lock().await;
        table.contains_key(name)
    }

    /// Ask every session to shut down (process termination).
    pub async fn shutdown_all(&self) {
        let senders: Vec<mpsc::Sender<SessionInput>> = {
            let table = self.table.lock().await;
            table.values().map(|handle| handle.input_tx.clone()).collect()
        };
        for tx in senders {
            let _ = tx.send(SessionInput::Shutdown).await;
        }
    }
}

/// Session ids become directory names; keep them boring.
fn valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !id.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use lapel_core::ports::{
        PortError, ReplyGenerator, ReplyRequest, SpeechSynthesis, SpeechToText, SynthesizedAudio,
        Transcription,
    };

    struct StubStt;

    #[async_trait]
    impl SpeechToText for StubStt {
        async fn transcribe(
            &self,
            _pcm: &[u8],
            _sample_rate: u32,
        ) -> Result<Transcription, PortError> {
            Ok(Transcription {
                text: "hi".into(),
                confidence: Some(1.0),
                interim: None,
            })
        }
        fn engine_name(&self) -> &str {
            "stub-stt"
        }
    }

    struct StubLlm;

    #[async_trait]
    impl ReplyGenerator for StubLlm {
        async fn generate(&self, _request: ReplyRequest<'_>) -> Result<String, PortError> {
            Ok("hello".into())
        }
        fn engine_name(&self) -> &str {
            "stub-llm"
        }
    }

    struct StubTts;

    #[async_trait]
    impl SpeechSynthesis for StubTts {
        async fn synthesize(&self, _text: &str) -> Result<SynthesizedAudio, PortError> {
            Ok(SynthesizedAudio {
                pcm: vec![0u8; 320],
                sample_rate: 16_000,
            })
        }
        fn engine_name(&self) -> &str {
            "stub-tts"
        }
    }

    fn registry(dir: &std::path::Path) -> SessionRegistry {
        let settings = Arc::new(Settings::with_defaults("t", dir));
        let downloads = Arc::new(DownloadStore::new(
            dir.join("downloads"),
            std::time::Duration::from_secs(60),
        ));
        let engines = Engines {
            stt: Arc::new(StubStt),
            llm: Arc::new(StubLlm),
            tts: Arc::new(StubTts),
        };
        SessionRegistry::new(settings, engines, downloads)
    }

    #[tokio::test]
    async fn second_channel_for_same_session_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        let first = registry.attach("sess-A").await.unwrap();
        assert!(!first.resumed);

        let err = registry.attach("sess-A").await.unwrap_err();
        assert!(matches!(err, AttachError::Conflict));
    }

    #[tokio::test]
    async fn different_session_while_one_is_active_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        registry.attach("sess-A").await.unwrap();
        let err = registry.attach("sess-B").await.unwrap_err();
        assert!(matches!(err, AttachError::Conflict));
    }

    #[tokio::test]
    async fn detached_session_resumes_with_same_id() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        registry.attach("sess-A").await.unwrap();
        registry.mark_detached("sess-A").await;

        let resumed = registry.attach("sess-A").await.unwrap();
        assert!(resumed.resumed);
    }

    #[tokio::test]
    async fn weird_session_ids_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        for id in ["", "../etc", "a b", ".hidden", &"x".repeat(65)] {
            assert!(
                matches!(
                    registry.attach(id).await,
                    Err(AttachError::InvalidSessionId)
                ),
                "id {id:?} should be refused"
            );
        }
    }

    #[tokio::test]
    async fn snapshot_is_available_after_attach() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        registry.attach("sess-A").await.unwrap();
        let snapshot = registry.snapshot("sess-A").await.unwrap();
        assert_eq!(snapshot.session, "sess-A");
        assert!(registry.snapshot("sess-B").await.is_none());
    }
}
