//! Generator adapter — prompt assembly and retry policy for the reply LLM.
//!
//! The collaborator gets the system prompt, the pruned conversation
//! history, the latest transcript, and (when present) the session's image
//! context. Transient failures are retried with exponential backoff; when
//! every attempt fails the adapter returns a fixed fallback line instead of
//! an error, so the user always hears something.

use std::sync::Arc;
use std::time::Duration;

use lapel_core::ports::{ImageAttachment, ReplyGenerator, ReplyRequest};
use lapel_core::session::{ConversationHistory, ConversationTurn};
use lapel_core::settings::Settings;

/// What the user hears when the generator is exhausted.
pub const FALLBACK_REPLY: &str = "I'm having trouble — please try again.";

const SYSTEM_PROMPT: &str = "You are a concise voice assistant speaking through a small \
wearable device. Answer in one or two short spoken sentences. When an image is attached, \
ground your answer in what it shows.";

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(500);

/// A reply, flagged when it is the canned fallback rather than model output.
#[derive(Debug, Clone)]
pub struct GeneratedReply {
    pub text: String,
    pub fallback: bool,
}

/// Wraps the generation port with pruning, retry, and the fallback line.
pub struct GeneratorAdapter {
    llm: Arc<dyn ReplyGenerator>,
    attempt_timeout: Duration,
    char_budget: usize,
}

impl GeneratorAdapter {
    #[must_use]
    pub fn new(llm: Arc<dyn ReplyGenerator>, settings: &Settings) -> Self {
        Self {
            llm,
            attempt_timeout: settings.collaborator_timeout,
            char_budget: settings.prompt_char_budget,
        }
    }

    /// Engine name for `/health`.
    #[must_use]
    pub fn engine_name(&self) -> &str {
        self.llm.engine_name()
    }

    /// Produce the assistant reply for one transcript.
    ///
    /// Never returns an error: exhaustion yields [`FALLBACK_REPLY`] with
    /// `fallback = true` so the controller can decide what to commit to
    /// history.
    pub async fn generate(
        &self,
        history: &ConversationHistory,
        image: Option<ImageAttachment<'_>>,
        transcript: &str,
    ) -> GeneratedReply {
        let fixed_chars = SYSTEM_PROMPT.len() + transcript.len();
        let pruned = prune_to_budget(history.turns(), fixed_chars, self.char_budget);

        for attempt in 1..=MAX_ATTEMPTS {
            let request = ReplyRequest {
                system_prompt: SYSTEM_PROMPT,
                history: pruned,
                user_text: transcript,
                image,
            };

            match tokio::time::timeout(self.attempt_timeout, self.llm.generate(request)).await {
                Ok(Ok(text)) if !text.trim().is_empty() => {
                    return GeneratedReply {
                        text,
                        fallback: false,
                    };
                }
                Ok(Ok(_)) => {
                    tracing::warn!(attempt, "generator returned an empty reply");
                }
                Ok(Err(err)) => {
                    tracing::warn!(attempt, error = %err, "generator attempt failed");
                }
                Err(_) => {
                    tracing::warn!(
                        attempt,
                        timeout = ?self.attempt_timeout,
                        "generator attempt timed out"
                    );
                }
            }

            if attempt < MAX_ATTEMPTS {
                let delay = BASE_BACKOFF * 2u32.pow(attempt - 1);
                tokio::time::sleep(delay).await;
            }
        }

        tracing::error!("generator exhausted all attempts, using fallback reply");
        GeneratedReply {
            text: FALLBACK_REPLY.to_string(),
            fallback: true,
        }
    }
}

/// Keep the most recent turns that fit the character budget.
fn prune_to_budget(
    turns: &[ConversationTurn],
    fixed_chars: usize,
    budget: usize,
) -> &[ConversationTurn] {
    let available = budget.saturating_sub(fixed_chars);
    let mut used = 0usize;
    let mut start = turns.len();

    for (index, turn) in turns.iter().enumerate().rev() {
        let cost = turn.text.len();
        if used + cost > available {
            break;
        }
        used += cost;
        start = index;
    }

    &turns[start..]
}
