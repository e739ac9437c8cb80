//! Session records.
//!
//! A session is the server-authoritative view of one device binding: its
//! state machine position, a capped diagnostic event log, the current
//! visual context, the bounded conversation history, and the recovery
//! counters. All fields are named and fixed; the session controller in the
//! pipeline crate is the sole mutator.

use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Diagnostic event log capacity; the oldest entry is dropped first.
pub const EVENT_LOG_CAPACITY: usize = 64;

/// How many recent events a `/state` snapshot carries.
pub const SNAPSHOT_EVENT_COUNT: usize = 16;

/// Primary state of a session.
///
/// `image_uploading` is deliberately not a state: an out-of-band upload can
/// be in flight during any primary state and is tracked as an attribute on
/// [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No channel bound (initial, or awaiting reattach within grace).
    Disconnected,

    /// Channel bound and authenticated; waiting for `client_on`/`hello`.
    Connected,

    /// Ready for an interaction.
    Idle,

    /// Audio frames are arriving.
    Recording,

    /// The recognition → generation → synthesis pipeline is running.
    Processing,

    /// Reply audio is being handed to the client.
    Playing,

    /// Recording was cut off (frame starvation or channel loss).
    Stalled,

    /// Terminal; the session is being destroyed.
    Shutdown,
}

impl SessionState {
    /// Stable lowercase label used in frames and `/state`.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Processing => "processing",
            Self::Playing => "playing",
            Self::Stalled => "stalled",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One text turn of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
}

/// Bounded conversation history, pruned to the most recent turns.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
    max_turns: usize,
}

impl ConversationHistory {
    #[must_use]
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: Vec::new(),
            max_turns: max_turns.max(1),
        }
    }

    /// Append a user turn and prune.
    pub fn push_user(&mut self, text: impl Into<String>) {
        self.push(Role::User, text.into());
    }

    /// Append an assistant turn and prune.
    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.push(Role::Assistant, text.into());
    }

    fn push(&mut self, role: Role, text: String) {
        self.turns.push(ConversationTurn { role, text });
        if self.turns.len() > self.max_turns {
            let excess = self.turns.len() - self.max_turns;
            self.turns.drain(0..excess);
        }
    }

    /// The retained turns, oldest first.
    #[must_use]
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// One entry in the diagnostic event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    pub at: DateTime<Utc>,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Current visual context for the session.
///
/// Bytes live on disk under the session's temp directory; a new upload
/// atomically replaces the previous value (the controller deletes the old
/// file when it installs the new context).
#[derive(Debug, Clone, PartialEq)]
pub struct ImageContext {
    pub filename: String,
    pub path: PathBuf,
    pub mime: String,
    pub size_bytes: u64,
    pub captured_at: DateTime<Utc>,
}

impl ImageContext {
    /// Describe freshly stored image bytes, stamped with the current time.
    #[must_use]
    pub fn new(
        filename: impl Into<String>,
        path: impl Into<PathBuf>,
        mime: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        Self {
            filename: filename.into(),
            path: path.into(),
            mime: mime.into(),
            size_bytes,
            captured_at: Utc::now(),
        }
    }
}

/// The server-authoritative session record.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub state: SessionState,
    pub history: ConversationHistory,
    pub image: Option<ImageContext>,
    pub image_uploading: bool,
    pub retry_counter: u32,
    pub disk_bytes: u64,
    pub created_at: DateTime<Utc>,
    events: VecDeque<SessionEvent>,
}

impl Session {
    #[must_use]
    pub fn new(id: impl Into<String>, history_max_turns: usize) -> Self {
        Self {
            id: id.into(),
            state: SessionState::Disconnected,
            history: ConversationHistory::new(history_max_turns),
            image: None,
            image_uploading: false,
            retry_counter: 0,
            disk_bytes: 0,
            created_at: Utc::now(),
            events: VecDeque::with_capacity(EVENT_LOG_CAPACITY),
        }
    }

    /// Append to the event log, dropping the oldest entry at capacity.
    pub fn record_event(&mut self, kind: impl Into<String>, detail: Option<String>) {
        if self.events.len() == EVENT_LOG_CAPACITY {
            self.events.pop_front();
        }
        self.events.push_back(SessionEvent {
            at: Utc::now(),
            kind: kind.into(),
            detail,
        });
    }

    /// Read-only snapshot for `/state` queries.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let skip = self.events.len().saturating_sub(SNAPSHOT_EVENT_COUNT);
        SessionSnapshot {
            session: self.id.clone(),
            state: self.state.label().to_string(),
            image_uploading: self.image_uploading,
            retry_counter: self.retry_counter,
            disk_bytes: self.disk_bytes,
            has_image: self.image.is_some(),
            events: self.events.iter().skip(skip).cloned().collect(),
        }
    }
}

/// Serializable point-in-time view of a session, served by `GET /state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session: String,
    pub state: String,
    pub image_uploading: bool,
    pub retry_counter: u32,
    pub disk_bytes: u64,
    pub has_image: bool,
    pub events: Vec<SessionEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_prunes_oldest_turns() {
        let mut history = ConversationHistory::new(3);
        history.push_user("one");
        history.push_assistant("two");
        history.push_user("three");
        history.push_assistant("four");

        assert_eq!(history.len(), 3);
        assert_eq!(history.turns()[0].text, "two");
        assert_eq!(history.turns()[2].text, "four");
    }

    #[test]
    fn event_log_is_a_fixed_ring() {
        let mut session = Session::new("s", 8);
        for i in 0..(EVENT_LOG_CAPACITY + 10) {
            session.record_event(format!("e{i}"), None);
        }

        let snapshot = session.snapshot();
        assert_eq!(snapshot.events.len(), SNAPSHOT_EVENT_COUNT);
        // The newest event survived; the oldest were dropped.
        assert_eq!(
            snapshot.events.last().unwrap().kind,
            format!("e{}", EVENT_LOG_CAPACITY + 9)
        );
    }

    #[test]
    fn snapshot_reflects_state_label() {
        let mut session = Session::new("sess-A", 8);
        session.state = SessionState::Recording;
        session.retry_counter = 1;

        let snapshot = session.snapshot();
        assert_eq!(snapshot.state, "recording");
        assert_eq!(snapshot.retry_counter, 1);
        assert!(!snapshot.has_image);
    }
}
