//! External LLM client (spec.md §1, "out of scope" collaborator):
//! `generate_patch(prompt) -> unified_diff_string`.

use async_trait::async_trait;
use serde::Serialize;

use crate::outcome::HandlerError;

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate_patch(&self, prompt: &str) -> Result<String, HandlerError>;
}

/// Configuration for the HTTP-based implementation.
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    /// Chat-completions-shaped endpoint, e.g. `https://api.example.com/v1/chat/completions`.
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(serde::Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(serde::Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(serde::Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// Calls a chat-completions-shaped HTTP endpoint and extracts the first
/// choice's message content as the unified diff.
pub struct HttpLlmClient {
    client: reqwest::Client,
    config: LlmClientConfig,
}

impl HttpLlmClient {
    pub fn new(config: LlmClientConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn generate_patch(&self, prompt: &str) -> Result<String, HandlerError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| HandlerError::collaborator(format!("LLM request failed: {e}"), true))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(HandlerError::collaborator(
                format!("LLM service returned {status}"),
                true,
            ));
        }
        if status.is_client_error() {
            return Err(HandlerError::collaborator(
                format!("LLM service rejected request: {status}"),
                false,
            ));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| HandlerError::collaborator(format!("malformed LLM response: {e}"), false))?;

        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| HandlerError::collaborator("LLM response had no choices", false))
    }
}
