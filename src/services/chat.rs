//! Conversational replies with a persisted rolling history
//!
//! Providers are tried in order; the first successful reply wins. The
//! history file is shared by general and realtime answers so follow-up
//! questions keep their context across restarts.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{ChatMessage, ChatProvider, ServiceError};

pub struct Conversation {
    providers: Vec<Arc<dyn ChatProvider>>,
    history_path: PathBuf,
    history_limit: usize,
    system_prompt: String,
    assistant_name: String,
}

impl Conversation {
    pub fn new(
        providers: Vec<Arc<dyn ChatProvider>>,
        history_path: PathBuf,
        history_limit: usize,
        username: &str,
        assistant_name: &str,
    ) -> Self {
        let system_prompt = format!(
            "You are {assistant_name}, an advanced AI assistant for {username}.\n\
             - Provide concise, accurate responses\n\
             - Use natural, conversational language\n\
             - Don't mention your training data or limitations\n\
             - Reply in English only\n\
             - Be helpful and direct"
        );

        Self {
            providers,
            history_path,
            history_limit,
            system_prompt,
            assistant_name: assistant_name.to_string(),
        }
    }

    /// Answer a conversational query
    pub async fn respond(&self, query: &str) -> Result<String, ServiceError> {
        self.respond_with_context(query, None).await
    }

    /// Answer a query, optionally grounded in retrieved context
    pub async fn respond_with_context(
        &self,
        query: &str,
        context: Option<&str>,
    ) -> Result<String, ServiceError> {
        let mut history = self.load_history().await;
        history.push(ChatMessage::user(query));
        trim_to(&mut history, self.history_limit);

        let mut system = self.system_prompt.clone();
        if let Some(context) = context {
            system.push_str("\n\n");
            system.push_str(context);
        }
        system.push('\n');
        system.push_str(&realtime_information());

        let mut last_error = ServiceError::NotConfigured("conversation provider");
        let mut answer = None;

        for provider in &self.providers {
            match provider.complete(&system, &history).await {
                Ok(text) => {
                    info!(provider = provider.name(), "conversation reply received");
                    answer = Some(text);
                    break;
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "provider failed, trying next");
                    last_error = e;
                }
            }
        }

        let answer = match answer {
            Some(text) => clean_answer(&text, &self.assistant_name),
            None => return Err(last_error),
        };

        history.push(ChatMessage::assistant(answer.clone()));
        trim_to(&mut history, self.history_limit);
        self.save_history(&history).await;

        Ok(answer)
    }

    async fn load_history(&self) -> Vec<ChatMessage> {
        match tokio::fs::read(&self.history_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(error = %e, path = ?self.history_path, "chat log unreadable, starting fresh");
                Vec::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!(error = %e, path = ?self.history_path, "failed to read chat log");
                Vec::new()
            }
        }
    }

    async fn save_history(&self, history: &[ChatMessage]) {
        let bytes = match serde_json::to_vec_pretty(history) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to encode chat log");
                return;
            }
        };

        if let Err(e) = tokio::fs::write(&self.history_path, bytes).await {
            warn!(error = %e, path = ?self.history_path, "failed to write chat log");
        } else {
            debug!(messages = history.len(), "chat log saved");
        }
    }
}

fn trim_to(history: &mut Vec<ChatMessage>, limit: usize) {
    if history.len() > limit {
        let excess = history.len() - limit;
        history.drain(..excess);
    }
}

/// Current local time and date, appended to every system prompt
fn realtime_information() -> String {
    let now = chrono::Local::now();
    format!(
        "Current time: {}, Date: {}",
        now.format("%I:%M %p"),
        now.format("%A, %B %d, %Y")
    )
}

fn clean_answer(text: &str, assistant_name: &str) -> String {
    text.replace("</s>", "")
        .replace("P.R.I.S.M", assistant_name)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
