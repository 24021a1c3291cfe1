mod client;
pub(crate) mod types;

use std::time::Duration;

use crate::error::{AiError, Result};
use crate::traits::{Completion, Message, MessageRole, Usage};

use client::ClaudeClient;
use types::*;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

// =============================================================================
// Claude
// =============================================================================

#[derive(Clone)]
pub struct Claude {
    api_key: String,
    pub(crate) model: String,
    base_url: Option<String>,
    timeout: Duration,
    max_tokens: u32,
}

impl Claude {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
            max_tokens: 1024,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Per-request timeout. A timed-out request surfaces as [`AiError::Timeout`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn client(&self) -> Result<ClaudeClient> {
        let client = ClaudeClient::new(&self.api_key, self.timeout)?;
        Ok(match self.base_url {
            Some(ref url) => client.with_base_url(url),
            None => client,
        })
    }

    /// Single-turn completion: one system instruction, one user message.
    pub async fn chat_completion(
        &self,
        system: impl Into<String>,
        user: impl Into<String>,
    ) -> Result<Completion> {
        self.complete(&[Message::system(system), Message::user(user)])
            .await
    }

    /// Completion over an explicit message list. System messages are merged
    /// into Claude's top-level `system` field.
    pub async fn complete(&self, messages: &[Message]) -> Result<Completion> {
        let mut request = ChatRequest::new(&self.model)
            .max_tokens(self.max_tokens)
            .temperature(0.0);

        let mut system_parts: Vec<&str> = Vec::new();
        for msg in messages {
            match msg.role {
                MessageRole::System => system_parts.push(&msg.content),
                MessageRole::User => request = request.message(WireMessage::user(&msg.content)),
            }
        }
        if !system_parts.is_empty() {
            request = request.system(system_parts.join("\n\n"));
        }

        let response = self.client()?.chat(&request).await?;

        let text = response
            .text()
            .ok_or_else(|| AiError::Parse("No text in Claude response".into()))?;
        let usage = response
            .usage
            .map(|u| Usage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            })
            .unwrap_or_default();

        Ok(Completion {
            model: response.model,
            text,
            usage,
        })
    }
}
