//! Handler registry: maps each task kind to its action
//!
//! Every action calls out to a collaborator under a timeout. Collaborator
//! failures come back as spoken text, so `dispatch` itself never fails.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::classifier::{Task, TaskKind};
use crate::services::{
    format_results, AppControl, Conversation, ImageGenerator, ServiceError, WebSearch,
};

const EXIT_TEXT: &str = "Goodbye sir. Shutting down.";
const APOLOGY_TEXT: &str = "I apologize, but I'm having trouble connecting to the servers right now. Please check your internet or API keys.";

/// What a handler produced
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionResult {
    /// Text to speak; empty means stay silent
    pub spoken_text: String,
    /// Set only by the exit handler
    pub terminates: bool,
}

impl ExecutionResult {
    pub fn speak(text: impl Into<String>) -> Self {
        Self {
            spoken_text: text.into(),
            terminates: false,
        }
    }

    pub fn silent() -> Self {
        Self::default()
    }

    fn exit() -> Self {
        Self {
            spoken_text: EXIT_TEXT.to_string(),
            terminates: true,
        }
    }
}

/// Fixed-backoff retry for transient upstream failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay between attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(10),
        }
    }
}

/// Per-call bounds
#[derive(Debug, Clone)]
pub struct HandlerLimits {
    /// Whole conversational reply, across the provider fallback chain
    pub conversation_timeout: Duration,
    /// Search and desktop calls
    pub request_timeout: Duration,
    /// One image generation attempt
    pub image_timeout: Duration,
    pub image_retry: RetryPolicy,
}

impl Default for HandlerLimits {
    fn default() -> Self {
        Self {
            conversation_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
            image_timeout: Duration::from_secs(60),
            image_retry: RetryPolicy::default(),
        }
    }
}

/// The collaborators handlers call. Search and images are optional because
/// they need API keys.
pub struct Collaborators {
    pub conversation: Arc<Conversation>,
    pub search: Option<Arc<dyn WebSearch>>,
    pub images: Option<Arc<dyn ImageGenerator>>,
    pub desktop: Arc<dyn AppControl>,
}

pub struct HandlerRegistry {
    collaborators: Collaborators,
    limits: HandlerLimits,
}

impl HandlerRegistry {
    pub fn new(collaborators: Collaborators, limits: HandlerLimits) -> Self {
        Self {
            collaborators,
            limits,
        }
    }

    /// Run the action bound to `task.kind`
    pub async fn dispatch(&self, task: &Task) -> ExecutionResult {
        debug!(kind = %task.kind, argument = %task.argument, "dispatching task");
        let argument = task.argument.as_str();

        match task.kind {
            TaskKind::Exit => ExecutionResult::exit(),
            TaskKind::General => self.general(argument).await,
            TaskKind::Realtime => self.realtime(argument).await,
            TaskKind::OpenTarget => {
                self.desktop("open", self.collaborators.desktop.open_target(argument))
                    .await
            }
            TaskKind::CloseTarget => {
                self.desktop("close", self.collaborators.desktop.close_target(argument))
                    .await
            }
            TaskKind::PlayMedia => {
                self.desktop("play", self.collaborators.desktop.play_media(argument))
                    .await
            }
            TaskKind::SearchWeb(engine) => {
                self.desktop(
                    "search",
                    self.collaborators.desktop.web_search(engine, argument),
                )
                .await
            }
            TaskKind::SystemControl(op) => {
                self.desktop("system", self.collaborators.desktop.system(op))
                    .await
            }
            TaskKind::GenerateImage => self.generate_image(argument).await,
            TaskKind::Unrecognized => {
                debug!(argument, "no handler for task, skipping");
                ExecutionResult::silent()
            }
        }
    }

    async fn general(&self, query: &str) -> ExecutionResult {
        let reply = tokio::time::timeout(
            self.limits.conversation_timeout,
            self.collaborators.conversation.respond(query),
        )
        .await;

        self.conversation_result(reply)
    }

    async fn realtime(&self, query: &str) -> ExecutionResult {
        let context = match &self.collaborators.search {
            Some(search) => {
                match tokio::time::timeout(self.limits.request_timeout, search.search(query)).await
                {
                    Ok(Ok(hits)) => {
                        info!(query, hits = hits.len(), "search finished");
                        format_results(query, &hits)
                    }
                    Ok(Err(e)) => {
                        warn!(query, error = %e, "search failed");
                        format!("Search failed: {e}")
                    }
                    Err(_) => {
                        warn!(query, "search timed out");
                        format!("Search failed: {}", ServiceError::Timeout(self.limits.request_timeout))
                    }
                }
            }
            None => format!("Search failed: {}", ServiceError::NotConfigured("web search")),
        };

        let reply = tokio::time::timeout(
            self.limits.conversation_timeout,
            self.collaborators
                .conversation
                .respond_with_context(query, Some(&context)),
        )
        .await;

        self.conversation_result(reply)
    }

    fn conversation_result(
        &self,
        reply: Result<Result<String, ServiceError>, tokio::time::error::Elapsed>,
    ) -> ExecutionResult {
        match reply {
            Ok(Ok(answer)) => ExecutionResult::speak(answer),
            Ok(Err(e)) => {
                warn!(error = %e, "conversation failed");
                ExecutionResult::speak(APOLOGY_TEXT)
            }
            Err(_) => {
                warn!(timeout = ?self.limits.conversation_timeout, "conversation timed out");
                ExecutionResult::speak(APOLOGY_TEXT)
            }
        }
    }

    async fn desktop(
        &self,
        action: &'static str,
        call: impl std::future::Future<Output = String>,
    ) -> ExecutionResult {
        match tokio::time::timeout(self.limits.request_timeout, call).await {
            Ok(outcome) => {
                info!(action, outcome = %outcome, "desktop action finished");
                ExecutionResult::speak(outcome)
            }
            Err(_) => {
                warn!(action, "desktop action timed out");
                ExecutionResult::speak(format!("The {action} command timed out"))
            }
        }
    }

    async fn generate_image(&self, prompt: &str) -> ExecutionResult {
        let Some(images) = &self.collaborators.images else {
            return ExecutionResult::speak(format!(
                "Error generating image: {}",
                ServiceError::NotConfigured("image generation")
            ));
        };

        let policy = &self.limits.image_retry;
        let max_attempts = policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let result = tokio::time::timeout(self.limits.image_timeout, images.generate(prompt))
                .await
                .unwrap_or_else(|_| Err(ServiceError::Timeout(self.limits.image_timeout)));

            match result {
                Ok(path) => {
                    info!(prompt, path = %path.display(), attempt, "image generated");
                    return ExecutionResult::speak(format!(
                        "Image generated and saved to {}",
                        path.display()
                    ));
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    warn!(
                        attempt,
                        max_attempts,
                        backoff = ?policy.backoff,
                        error = %e,
                        "image model unavailable, retrying"
                    );
                    tokio::time::sleep(policy.backoff).await;
                }
                Err(e) => {
                    warn!(prompt, attempt, error = %e, "image generation failed");
                    return ExecutionResult::speak(format!("Error generating image: {e}"));
                }
            }
        }

        ExecutionResult::speak("Error generating image: retries exhausted")
    }
}
