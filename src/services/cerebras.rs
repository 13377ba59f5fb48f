//! Cerebras chat completions (OpenAI-compatible)

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{http_client, ChatMessage, ChatProvider, Role, ServiceError};

const COMPLETIONS_URL: &str = "https://api.cerebras.ai/v1/chat/completions";
const MODEL: &str = "llama-3.3-70b";

/// Primary conversational provider
pub struct CerebrasClient {
    client: reqwest::Client,
    api_key: String,
    max_tokens: u32,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<&'a ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl CerebrasClient {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Result<Self, ServiceError> {
        let api_key = api_key
            .filter(|k| !k.is_empty())
            .ok_or(ServiceError::NotConfigured("Cerebras API key"))?;

        Ok(Self {
            client: http_client(timeout)?,
            api_key,
            max_tokens: 512,
        })
    }
}

#[async_trait]
impl ChatProvider for CerebrasClient {
    fn name(&self) -> &'static str {
        "cerebras"
    }

    async fn complete(&self, system: &str, history: &[ChatMessage]) -> Result<String, ServiceError> {
        let system = ChatMessage {
            role: Role::System,
            content: system.to_string(),
        };
        let messages = std::iter::once(&system).chain(history.iter()).collect();

        let request = CompletionRequest {
            model: MODEL,
            messages,
            max_tokens: self.max_tokens,
            temperature: 0.7,
            top_p: 0.95,
        };

        let response = self
            .client
            .post(COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::from_status(status.as_u16(), &body));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Malformed(e.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ServiceError::Malformed("completion has no content".to_string()))
    }
}
