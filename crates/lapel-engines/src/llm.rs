//! Multimodal reply generation over an OpenAI-compatible endpoint.
//!
//! The request carries the system prompt, the pruned history, and the
//! latest transcript; when the session has an image context it rides along
//! as a base64 data URI in the final user message, the shape multimodal
//! chat-completions servers expect.

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use lapel_core::ports::{PortError, ReplyGenerator, ReplyRequest};
use lapel_core::session::Role;

use crate::config::EngineConfig;
use crate::error::{check_status, map_transport, EngineError};

/// Token ceiling for one spoken reply; a couple of sentences.
const MAX_REPLY_TOKENS: u32 = 256;

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

/// Build the chat-completions message list for one request.
fn build_messages(request: &ReplyRequest<'_>) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(request.history.len() + 2);

    messages.push(ChatMessage {
        role: "system",
        content: MessageContent::Text(request.system_prompt.to_string()),
    });

    for turn in request.history {
        messages.push(ChatMessage {
            role: match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: MessageContent::Text(turn.text.clone()),
        });
    }

    let content = match request.image {
        None => MessageContent::Text(request.user_text.to_string()),
        Some(image) => {
            let encoded = base64::engine::general_purpose::STANDARD.encode(image.bytes);
            MessageContent::Parts(vec![
                ContentPart::Text {
                    text: request.user_text.to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: format!("data:{};base64,{encoded}", image.mime),
                    },
                },
            ])
        }
    };
    messages.push(ChatMessage {
        role: "user",
        content,
    });

    messages
}

/// HTTP implementation of the [`ReplyGenerator`] port.
pub struct HttpReplyGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    timeout: std::time::Duration,
    name: String,
}

impl HttpReplyGenerator {
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        Ok(Self {
            client: config.build_client()?,
            url: config.llm_url.clone(),
            model: config.llm_model.clone(),
            api_key: config.llm_api_key.clone(),
            timeout: config.timeout,
            name: config.llm_model.clone(),
        })
    }
}

#[async_trait]
impl ReplyGenerator for HttpReplyGenerator {
    async fn generate(&self, request: ReplyRequest<'_>) -> Result<String, PortError> {
        let body = ChatRequest {
            model: self.model.clone(),
            messages: build_messages(&request),
            max_tokens: MAX_REPLY_TOKENS,
            temperature: 0.7,
        };

        tracing::debug!(
            url = %self.url,
            model = %self.model,
            messages = body.messages.len(),
            with_image = request.image.is_some(),
            "generation request"
        );

        let mut http = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http
            .send()
            .await
            .map_err(|err| map_transport(&err, self.timeout))?;
        check_status(&response)?;

        let raw = response
            .bytes()
            .await
            .map_err(|err| PortError::InvalidResponse(err.to_string()))?;
        let parsed: ChatResponse = serde_json::from_slice(&raw)
            .map_err(|err| PortError::InvalidResponse(err.to_string()))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(PortError::InvalidResponse(
                "completion had no content".to_string(),
            ));
        }
        Ok(text)
    }

    fn engine_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use lapel_core::ports::ImageAttachment;
    use lapel_core::session::ConversationTurn;

    #[test]
    fn text_only_request_uses_plain_content() {
        let history = vec![
            ConversationTurn {
                role: Role::User,
                text: "hi".into(),
            },
            ConversationTurn {
                role: Role::Assistant,
                text: "hello".into(),
            },
        ];
        let request = ReplyRequest {
            system_prompt: "be brief",
            history: &history,
            user_text: "what now",
            image: None,
        };

        let json = serde_json::to_value(build_messages(&request)).unwrap();
        assert_eq!(json[0]["role"], "system");
        assert_eq!(json[1]["content"], "hi");
        assert_eq!(json[2]["role"], "assistant");
        assert_eq!(json[3]["content"], "what now");
    }

    #[test]
    fn image_request_attaches_a_data_uri_part() {
        let request = ReplyRequest {
            system_prompt: "be brief",
            history: &[],
            user_text: "what do you see",
            image: Some(ImageAttachment {
                bytes: &[0xFF, 0xD8, 0xFF],
                mime: "image/jpeg",
            }),
        };

        let json = serde_json::to_value(build_messages(&request)).unwrap();
        let parts = &json[1]["content"];
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["type"], "image_url");
        let url = parts[1]["image_url"]["url"].as_str().unwrap();
        assert!(url.starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn completion_content_is_extracted() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"It is sunny."}}]}"#,
        )
        .unwrap();
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("It is sunny.")
        );
    }
}
