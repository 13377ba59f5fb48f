//! Classifier: maps free text to an ordered list of typed tasks
//!
//! A decision model labels the utterance with comma-separated fragments
//! (`open chrome, general tell me about gandhi`). Unknown fragments are
//! dropped. If the model is unavailable, errors, times out or answers with
//! nothing usable, the whole utterance becomes a single `General` task.

mod task;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::services::{ChatMessage, DecisionModel};

pub use task::{SearchEngine, SystemOp, Task, TaskKind};
use task::{has_placeholder, retained_fragments};

const PREAMBLE: &str = "\
You are a very accurate Decision-Making Model, which decides what kind of a query is given to you.
You will decide whether a query is a 'general' query, a 'realtime' query, or is asking to perform any task or automation.
*** Do not answer any query, just decide what kind of query is given to you. ***
-> Respond with 'general ( query )' for conversational queries or simple math/history.
-> Respond with 'realtime ( query )' for queries requiring current events or news.
-> Respond with 'open (app/site)' for opening applications.
-> Respond with 'close (app)' for closing applications.
-> Respond with 'play (song)' for music.
-> Respond with 'generate image (prompt)' for image generation.
-> Respond with 'reminder (datetime message)' for setting reminders.
-> Respond with 'system (task)' for volume/mute controls.
-> Respond with 'content (topic)' for writing emails/code/blogs.
-> Respond with 'google search (topic)' for web searches.
-> Respond with 'youtube search (topic)' for video searches.
*** If the query involves multiple tasks, separate them with commas. ***
*** If the user says goodbye, respond with 'exit'. ***";

const EXAMPLES: &[(&str, &str)] = &[
    ("how are you?", "general how are you?"),
    ("do you like pizza?", "general do you like pizza?"),
    (
        "open chrome and tell me about mahatma gandhi.",
        "open chrome, general tell me about mahatma gandhi.",
    ),
    ("open chrome and firefox", "open chrome, open firefox"),
    (
        "what is today's date and remind me about my dance.",
        "general what is today's date, reminder 11:00pm 5th aug dancing performance",
    ),
    ("chat with me.", "general chat with me."),
];

pub struct Classifier {
    model: Option<Arc<dyn DecisionModel>>,
    max_attempts: u32,
    timeout: Duration,
    examples: Vec<ChatMessage>,
}

impl Classifier {
    /// `model` is `None` when no decision model could be constructed; every
    /// utterance then classifies as `General`.
    pub fn new(model: Option<Arc<dyn DecisionModel>>, max_attempts: u32, timeout: Duration) -> Self {
        let examples = EXAMPLES
            .iter()
            .flat_map(|(user, reply)| [ChatMessage::user(*user), ChatMessage::assistant(*reply)])
            .collect();

        Self {
            model,
            max_attempts: max_attempts.max(1),
            timeout,
            examples,
        }
    }

    /// Classify `text` into tasks in execution order. Never fails.
    pub async fn classify(&self, text: &str) -> Vec<Task> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }

        let Some(model) = &self.model else {
            warn!("no decision model available, treating as general");
            return vec![Task::general(text)];
        };

        for attempt in 1..=self.max_attempts {
            let decided = tokio::time::timeout(
                self.timeout,
                model.decide(PREAMBLE, &self.examples, text),
            )
            .await;

            let response = match decided {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    warn!(error = %e, "decision model failed, treating as general");
                    return vec![Task::general(text)];
                }
                Err(_) => {
                    warn!(timeout = ?self.timeout, "decision model timed out, treating as general");
                    return vec![Task::general(text)];
                }
            };

            debug!(attempt, response = %response, "decision model replied");

            let fragments = retained_fragments(&response);
            if fragments.is_empty() {
                info!("no recognizable fragments, treating as general");
                return vec![Task::general(text)];
            }

            if fragments.iter().any(|f| has_placeholder(f)) {
                warn!(attempt, "decision model echoed a placeholder, retrying");
                continue;
            }

            let tasks: Vec<Task> = fragments
                .iter()
                .filter_map(|f| Task::from_fragment(f, text))
                .collect();

            if tasks.iter().all(|t| t.kind == TaskKind::Unrecognized) {
                info!(response = %response, "no actionable fragments, treating as general");
                return vec![Task::general(text)];
            }

            info!(count = tasks.len(), "utterance classified");
            return tasks;
        }

        warn!(
            attempts = self.max_attempts,
            "placeholder persisted, treating as general"
        );
        vec![Task::general(text)]
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::services::ServiceError;

    /// Replays canned decisions, repeating the last one when exhausted
    struct Scripted {
        replies: Mutex<VecDeque<Result<String, String>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(replies: &[Result<&str, &str>]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(
                    replies
                        .iter()
                        .map(|r| r.map(str::to_string).map_err(str::to_string))
                        .collect(),
                ),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl DecisionModel for Scripted {
        async fn decide(
            &self,
            preamble: &str,
            examples: &[ChatMessage],
            _text: &str,
        ) -> Result<String, ServiceError> {
            assert!(preamble.contains("Decision-Making Model"));
            assert_eq!(examples.len(), EXAMPLES.len() * 2);
            *self.calls.lock().unwrap() += 1;

            let mut replies = self.replies.lock().unwrap();
            let reply = if replies.len() > 1 {
                replies.pop_front()
            } else {
                replies.front().cloned()
            };
            match reply {
                Some(Ok(text)) => Ok(text),
                Some(Err(message)) => Err(ServiceError::Malformed(message)),
                None => Err(ServiceError::NotConfigured("script")),
            }
        }
    }

    fn classifier(model: &Arc<Scripted>) -> Classifier {
        Classifier::new(
            Some(Arc::clone(model) as Arc<dyn DecisionModel>),
            2,
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_multi_fragment_order() {
        let model = Scripted::new(&[Ok("open chrome, play jazz")]);
        let tasks = tokio_test::block_on(classifier(&model).classify("open chrome and play jazz"));

        assert_eq!(
            tasks,
            vec![
                Task::new(TaskKind::OpenTarget, "chrome"),
                Task::new(TaskKind::PlayMedia, "jazz"),
            ]
        );
    }

    #[test]
    fn test_general_then_open() {
        let model = Scripted::new(&[Ok("general what time is it, open notepad")]);
        let tasks = tokio_test::block_on(classifier(&model).classify("what time is it, open notepad"));

        assert_eq!(
            tasks,
            vec![
                Task::new(TaskKind::General, "what time is it"),
                Task::new(TaskKind::OpenTarget, "notepad"),
            ]
        );
    }

    #[test]
    fn test_unrecognized_prefixes_fall_back_to_general() {
        let model = Scripted::new(&[Ok("sure, let me think, dance wildly")]);
        let tasks = tokio_test::block_on(classifier(&model).classify("do a little dance"));

        assert_eq!(tasks, vec![Task::general("do a little dance")]);
    }

    #[test]
    fn test_model_error_falls_back_to_general() {
        let model = Scripted::new(&[Err("connection refused")]);
        let tasks = tokio_test::block_on(classifier(&model).classify("tell me a joke"));

        assert_eq!(tasks, vec![Task::general("tell me a joke")]);
    }

    #[test]
    fn test_missing_model_falls_back_to_general() {
        let classifier = Classifier::new(None, 2, Duration::from_secs(5));
        let tasks = tokio_test::block_on(classifier.classify("hello there"));

        assert_eq!(tasks, vec![Task::general("hello there")]);
    }

    #[test]
    fn test_placeholder_retried_once() {
        let model = Scripted::new(&[Ok("general (query)"), Ok("general hello")]);
        let tasks = tokio_test::block_on(classifier(&model).classify("hello"));

        assert_eq!(tasks, vec![Task::new(TaskKind::General, "hello")]);
        assert_eq!(model.calls(), 2);
    }

    #[test]
    fn test_placeholder_retry_is_bounded() {
        let model = Scripted::new(&[Ok("open (app/site)")]);
        let tasks = tokio_test::block_on(classifier(&model).classify("open something"));

        assert_eq!(tasks, vec![Task::general("open something")]);
        assert_eq!(model.calls(), 2);
    }

    #[test]
    fn test_exit() {
        let model = Scripted::new(&[Ok("exit")]);
        let tasks = tokio_test::block_on(classifier(&model).classify("goodbye"));

        assert_eq!(tasks, vec![Task::new(TaskKind::Exit, "")]);
    }

    #[test]
    fn test_exit_with_trailing_period() {
        let model = Scripted::new(&[Ok("exit.")]);
        let tasks = tokio_test::block_on(classifier(&model).classify("goodbye"));

        assert_eq!(tasks, vec![Task::new(TaskKind::Exit, "")]);
    }

    #[test]
    fn test_only_unhandled_fragments_fall_back_to_general() {
        let model = Scripted::new(&[Ok("reminder 11:00pm dance")]);
        let tasks = tokio_test::block_on(classifier(&model).classify("remind me about my dance"));
        assert_eq!(tasks, vec![Task::general("remind me about my dance")]);

        let model = Scripted::new(&[Ok("system reboot, open")]);
        let tasks = tokio_test::block_on(classifier(&model).classify("restart the computer"));
        assert_eq!(tasks, vec![Task::general("restart the computer")]);
    }

    #[test]
    fn test_unhandled_fragment_kept_beside_actionable_one() {
        let model = Scripted::new(&[Ok("open chrome, content email to boss")]);
        let tasks = tokio_test::block_on(classifier(&model).classify("open chrome and write an email"));

        assert_eq!(
            tasks,
            vec![
                Task::new(TaskKind::OpenTarget, "chrome"),
                Task::new(TaskKind::Unrecognized, "email to boss"),
            ]
        );
    }

    struct Stalled;

    #[async_trait]
    impl DecisionModel for Stalled {
        async fn decide(&self, _: &str, _: &[ChatMessage], _: &str) -> Result<String, ServiceError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("open chrome".to_string())
        }
    }

    #[tokio::test]
    async fn test_timeout_falls_back_to_general() {
        let classifier = Classifier::new(
            Some(Arc::new(Stalled) as Arc<dyn DecisionModel>),
            2,
            Duration::from_millis(20),
        );
        let tasks = classifier.classify("open chrome").await;

        assert_eq!(tasks, vec![Task::general("open chrome")]);
    }
}
