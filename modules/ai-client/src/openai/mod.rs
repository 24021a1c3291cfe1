mod client;
pub(crate) mod types;

use std::time::Duration;

use crate::error::{AiError, Result};
use crate::traits::{Completion, Message, MessageRole, Usage};

use client::OpenAiClient;
use types::*;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

// =============================================================================
// OpenAi
// =============================================================================

#[derive(Clone)]
pub struct OpenAi {
    api_key: String,
    pub(crate) model: String,
    base_url: Option<String>,
    timeout: Duration,
    json_mode: bool,
}

impl OpenAi {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
            json_mode: false,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Constrain every response to a single JSON object.
    pub fn json_mode(mut self) -> Self {
        self.json_mode = true;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn client(&self) -> Result<OpenAiClient> {
        let client = OpenAiClient::new(&self.api_key, self.timeout)?;
        Ok(match self.base_url {
            Some(ref url) => client.with_base_url(url),
            None => client,
        })
    }

    pub async fn chat_completion(
        &self,
        system: impl Into<String>,
        user: impl Into<String>,
    ) -> Result<Completion> {
        self.complete(&[Message::system(system), Message::user(user)])
            .await
    }

    pub async fn complete(&self, messages: &[Message]) -> Result<Completion> {
        let mut request = ChatRequest::new(&self.model)
            .temperature(0.0)
            .max_tokens(1024);
        if self.json_mode {
            request = request.json_object();
        }
        for msg in messages {
            let role = match msg.role {
                MessageRole::System => Role::System,
                MessageRole::User => Role::User,
            };
            request = request.message(WireMessage::new(role, &msg.content));
        }

        let response = self.client()?.chat(&request).await?;

        let usage = response
            .usage
            .map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();
        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AiError::Parse("No response from OpenAI".into()))?;

        Ok(Completion {
            model: response.model,
            text,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_new() {
        let ai = OpenAi::new("sk-test", "gpt-4o-mini");
        assert_eq!(ai.model(), "gpt-4o-mini");
        assert!(!ai.json_mode);
    }

    #[test]
    fn test_openai_json_mode() {
        let ai = OpenAi::new("sk-test", "gpt-4o-mini")
            .json_mode()
            .with_base_url("http://localhost:8080/v1");
        assert!(ai.json_mode);
        assert_eq!(ai.base_url.as_deref(), Some("http://localhost:8080/v1"));
    }
}
