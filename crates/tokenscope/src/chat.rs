//! Chat message types and the provider seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Role of a chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Token usage reported by a provider for one invocation.
///
/// The aliases accept the field names used by the common provider JSON
/// dialects, so the struct can be deserialized straight out of a provider
/// response body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(
        alias = "prompt_tokens",     // OpenAI-compatible APIs
        alias = "input_tokens",      // Anthropic
        alias = "prompt_eval_count"  // Ollama
    )]
    pub input_tokens: u32,
    #[serde(
        alias = "completion_tokens", // OpenAI-compatible APIs
        alias = "output_tokens",     // Anthropic
        alias = "eval_count"         // Ollama
    )]
    pub output_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// A completed chat turn as returned by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    /// The assistant's text answer.
    pub text: String,
    /// Token accounting for the call.
    pub usage: Usage,
    /// The model that actually served the request, as reported by the provider.
    pub model: String,
}

/// The seam between the tracking service and an upstream model API.
///
/// Implementations own their HTTP client and credentials; callers measure
/// latency around `chat` themselves.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Stable provider identifier, e.g. `"anthropic"`.
    fn name(&self) -> &str;

    /// The model this provider handle is configured to call.
    fn model(&self) -> &str;

    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatReply, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_accepts_anthropic_field_names() {
        let json = r#"{
            "input_tokens": 12,
            "cache_creation_input_tokens": 100,
            "output_tokens": 1024
        }"#;
        let usage: Usage = serde_json::from_str(json).unwrap();
        assert_eq!(usage.input_tokens, 12);
        assert_eq!(usage.output_tokens, 1024);
        assert_eq!(usage.total(), 1036);
    }

    #[test]
    fn usage_accepts_openai_field_names() {
        let json = r#"{"prompt_tokens": 7, "completion_tokens": 3}"#;
        let usage: Usage = serde_json::from_str(json).unwrap();
        assert_eq!(usage.input_tokens, 7);
        assert_eq!(usage.output_tokens, 3);
    }

    #[test]
    fn message_constructors_set_roles() {
        assert_eq!(ChatMessage::user("hi").role, ChatRole::User);
        assert_eq!(ChatMessage::assistant("hello").role, ChatRole::Assistant);
    }
}
