//! Wire types for the chat-completion relay.
//!
//! The relay speaks the widely-adopted chat-completion JSON shape so that
//! off-the-shelf converter tooling can point an "OpenAI-compatible base
//! URL" at it without modification. Only the fields such clients actually
//! read are produced; unknown request fields are ignored rather than
//! rejected.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// One conversation turn, both in requests and in response choices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// An incoming `POST /v1/chat/completions` body.
///
/// Everything except `messages` is optional; omitted sampling parameters
/// fall back to the relay's configured defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatTurn>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
}

/// Token accounting reported with a completion. All three fields are zero
/// when the upstream provider does not report usage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: usize,
    pub message: ChatTurn,
    pub finish_reason: String,
}

/// A successful completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

impl ChatCompletionResponse {
    /// Wrap upstream `content` as a single-choice assistant completion.
    pub fn assistant(model: impl Into<String>, content: impl Into<String>, usage: Usage) -> Self {
        let created = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            id: format!("chatcmpl-{created:x}"),
            object: "chat.completion".to_string(),
            created,
            model: model.into(),
            choices: vec![Choice {
                index: 0,
                message: ChatTurn::assistant(content),
                finish_reason: "stop".to_string(),
            }],
            usage,
        }
    }
}

/// The `{"error": "..."}` body returned with HTTP 500.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
