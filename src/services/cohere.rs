//! Cohere chat client
//!
//! Backs both the decision model used for classification and the fallback
//! conversational provider.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{http_client, ChatMessage, ChatProvider, DecisionModel, Role, ServiceError};

const CHAT_URL: &str = "https://api.cohere.com/v1/chat";
const DECISION_MODEL: &str = "command-r-08-2024";
const CHAT_MODEL: &str = "command-r-plus-08-2024";

pub struct CohereClient {
    client: reqwest::Client,
    api_key: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    message: &'a str,
    chat_history: Vec<HistoryEntry<'a>>,
    preamble: &'a str,
    temperature: f32,
    prompt_truncation: &'a str,
}

#[derive(Serialize)]
struct HistoryEntry<'a> {
    role: &'static str,
    message: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    text: String,
}

impl CohereClient {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Result<Self, ServiceError> {
        let api_key = api_key
            .filter(|k| !k.is_empty())
            .ok_or(ServiceError::NotConfigured("Cohere API key"))?;

        Ok(Self {
            client: http_client(timeout)?,
            api_key,
        })
    }

    async fn chat(
        &self,
        model: &str,
        preamble: &str,
        history: &[ChatMessage],
        message: &str,
    ) -> Result<String, ServiceError> {
        let chat_history = history
            .iter()
            .filter_map(|m| {
                let role = match m.role {
                    Role::User => "USER",
                    Role::Assistant => "CHATBOT",
                    Role::System => return None,
                };
                Some(HistoryEntry {
                    role,
                    message: &m.content,
                })
            })
            .collect();

        let request = ChatRequest {
            model,
            message,
            chat_history,
            preamble,
            temperature: 0.7,
            prompt_truncation: "OFF",
        };

        let response = self
            .client
            .post(CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::from_status(status.as_u16(), &body));
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Malformed(e.to_string()))?;

        debug!(model, chars = reply.text.len(), "cohere reply");
        Ok(reply.text)
    }
}

#[async_trait]
impl DecisionModel for CohereClient {
    async fn decide(
        &self,
        preamble: &str,
        examples: &[ChatMessage],
        text: &str,
    ) -> Result<String, ServiceError> {
        self.chat(DECISION_MODEL, preamble, examples, text).await
    }
}

#[async_trait]
impl ChatProvider for CohereClient {
    fn name(&self) -> &'static str {
        "cohere"
    }

    async fn complete(&self, system: &str, history: &[ChatMessage]) -> Result<String, ServiceError> {
        let (query, earlier) = history
            .split_last()
            .ok_or_else(|| ServiceError::Malformed("empty conversation".to_string()))?;

        self.chat(CHAT_MODEL, system, earlier, &query.content).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_is_not_configured() {
        let result = CohereClient::new(None, Duration::from_secs(5));
        assert!(matches!(result, Err(ServiceError::NotConfigured(_))));

        let result = CohereClient::new(Some(String::new()), Duration::from_secs(5));
        assert!(matches!(result, Err(ServiceError::NotConfigured(_))));
    }

    #[test]
    fn test_empty_conversation_rejected() {
        let client = CohereClient::new(Some("key".into()), Duration::from_secs(5)).unwrap();
        let result = tokio_test::block_on(client.complete("system", &[]));
        assert!(matches!(result, Err(ServiceError::Malformed(_))));
    }
}
