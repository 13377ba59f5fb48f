//! External collaborators consumed by the classifier and handlers
//!
//! Each capability is an async trait so the orchestrator can hold it as an
//! injected `Arc<dyn ...>`. The concrete implementations talk to hosted model,
//! search and image APIs over HTTP, or shell out to the desktop.

mod chat;
mod cerebras;
mod cohere;
mod desktop;
mod image;
mod search;
mod speech;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::classifier::{SearchEngine, SystemOp};

pub use chat::Conversation;
pub use cerebras::CerebrasClient;
pub use cohere::CohereClient;
pub use desktop::DesktopControl;
pub use image::HuggingFaceImages;
pub use search::{format_results, SerperSearch};
pub use speech::CommandSpeaker;

/// Errors raised by collaborators. Never propagated past a handler.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Rate limits and "model is loading" replies
    #[error("upstream temporarily unavailable: {0}")]
    Transient(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ServiceError {
    /// Whether a retry after a backoff may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Transient(_) => true,
            ServiceError::Upstream { status, .. } => *status == 429 || *status == 503,
            _ => false,
        }
    }

    /// Map a non-success HTTP reply to an error, pulling the message out of a
    /// JSON body when there is one
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| {
                v.get("error")
                    .or_else(|| v.get("message"))
                    .map(|m| match m {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
            })
            .unwrap_or_else(|| body.trim().to_string());

        match status {
            503 => ServiceError::Transient(format!("model is loading ({message})")),
            429 => ServiceError::Transient(format!("rate limited ({message})")),
            _ => ServiceError::Upstream { status, message },
        }
    }
}

/// Role of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of a conversation or of a few-shot exemplar set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A single search result
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchHit {
    #[serde(default = "untitled")]
    pub title: String,
    #[serde(default = "undescribed")]
    pub snippet: String,
}

fn untitled() -> String {
    "No Title".to_string()
}

fn undescribed() -> String {
    "No Description".to_string()
}

/// Labels an utterance with comma-separated task fragments
#[async_trait]
pub trait DecisionModel: Send + Sync {
    async fn decide(
        &self,
        preamble: &str,
        examples: &[ChatMessage],
        text: &str,
    ) -> Result<String, ServiceError>;
}

/// A hosted chat model. `history` ends with the user's query.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn complete(&self, system: &str, history: &[ChatMessage]) -> Result<String, ServiceError>;
}

/// Web search returning ranked results
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, ServiceError>;
}

/// Text-to-image generation. Returns the saved file.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<PathBuf, ServiceError>;
}

/// Application and OS control. Every call reports its outcome as text.
#[async_trait]
pub trait AppControl: Send + Sync {
    async fn open_target(&self, name: &str) -> String;

    async fn close_target(&self, name: &str) -> String;

    async fn play_media(&self, query: &str) -> String;

    async fn web_search(&self, engine: SearchEngine, query: &str) -> String;

    async fn system(&self, op: SystemOp) -> String;
}

/// Blocking speech output: resolves once playback has finished
#[async_trait]
pub trait Speaker: Send + Sync {
    async fn speak(&self, text: &str) -> Result<(), ServiceError>;
}

/// Shared HTTP client with a per-request timeout
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, ServiceError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loading_reply_is_transient() {
        let err = ServiceError::from_status(503, r#"{"error":"Model is currently loading"}"#);
        assert!(err.is_transient());
        assert!(err.to_string().contains("currently loading"));
    }

    #[test]
    fn test_auth_reply_is_terminal() {
        let err = ServiceError::from_status(401, r#"{"error":"Invalid token"}"#);
        assert!(!err.is_transient());
        assert!(matches!(err, ServiceError::Upstream { status: 401, .. }));
    }

    #[test]
    fn test_plain_body_kept_as_message() {
        let err = ServiceError::from_status(500, "internal failure\n");
        assert_eq!(err.to_string(), "upstream returned 500: internal failure");
    }

    #[test]
    fn test_search_hit_defaults() {
        let hit: SearchHit = serde_json::from_str(r#"{"title":"Rust"}"#).unwrap();
        assert_eq!(hit.snippet, "No Description");
    }

    #[test]
    fn test_chat_message_roles_serialize_lowercase() {
        let json = serde_json::to_string(&ChatMessage::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }
}
