//! Anthropic messages API client.
//!
//! Calls `POST /v1/messages` with `x-api-key` authentication. The HTTP
//! client carries the configured timeout, so a hung upstream surfaces as
//! [`ProviderError::Timeout`] rather than stalling the caller forever.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::chat::{ChatMessage, ChatProvider, ChatReply, ChatRole, Usage};
use crate::error::ProviderError;

const DEFAULT_API_BASE: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Configuration for the Anthropic client, supplied once at construction.
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
    /// Override for the API base URL, mainly for tests.
    pub base_url: Option<String>,
}

/// Client for Anthropic's messages endpoint.
#[derive(Debug, Clone)]
pub struct Anthropic {
    client: Client,
    config: AnthropicConfig,
}

impl Anthropic {
    pub fn new(config: AnthropicConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { client, config })
    }

    fn messages_url(&self) -> String {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/');
        format!("{}/v1/messages", base)
    }
}

#[derive(Serialize, Debug)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Serialize, Debug)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
    model: String,
}

#[derive(Deserialize, Debug)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

fn wire_role(role: ChatRole) -> &'static str {
    match role {
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    }
}

#[async_trait]
impl ChatProvider for Anthropic {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatReply, ProviderError> {
        let body = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: wire_role(m.role),
                    content: &m.content,
                })
                .collect(),
        };

        let response = self
            .client
            .post(self.messages_url())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Auth(text),
                StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(text),
                _ => ProviderError::Http(format!("{}: {}", status, text)),
            });
        }

        let raw = response.text().await?;
        let parsed: MessagesResponse =
            serde_json::from_str(&raw).map_err(|e| ProviderError::ResponseFormat {
                message: e.to_string(),
                raw_response: raw.clone(),
            })?;

        let text = parsed
            .content
            .iter()
            .find(|block| block.kind == "text")
            .map(|block| block.text.clone())
            .ok_or(ProviderError::ResponseFormat {
                message: "no text content block in response".to_string(),
                raw_response: raw,
            })?;

        Ok(ChatReply {
            text,
            usage: parsed.usage,
            model: parsed.model,
        })
    }
}
