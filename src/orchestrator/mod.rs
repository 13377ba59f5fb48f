//! Orchestrator: the single worker that turns utterances into spoken results
//!
//! One utterance is in flight at a time. Its tasks run strictly in the order
//! the classifier emitted them, and every spoken result is bracketed by a
//! closed microphone gate plus a settle delay so the assistant never hears
//! itself. Panics inside an utterance are caught here; the status goes to
//! `Error` and then back to `Listening`.

mod queue;

use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::classifier::Classifier;
use crate::events::StateEvent;
use crate::handlers::HandlerRegistry;
use crate::services::Speaker;
use crate::state::{AssistantState, StateMachine, StateStore};
use crate::utterance::Utterance;

pub use queue::{Control, OrchestratorHandle, SubmitError};
use queue::Shared;
#[cfg(test)]
pub(crate) use queue::TestWorker;

const FAREWELL: &str = "Goodbye sir.";

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Pause after speech before the microphone reopens
    pub settle_delay: Duration,
    /// Spoken once at startup with the microphone closed
    pub greeting: Option<String>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(300),
            greeting: None,
        }
    }
}

/// How the worker continues after an utterance or control request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    /// Stop; `farewell` says whether to speak the goodbye on the way out
    Stop { farewell: bool },
}

pub struct Orchestrator {
    classifier: Classifier,
    handlers: HandlerRegistry,
    speaker: Arc<dyn Speaker>,
    machine: StateMachine,
    shared: Arc<Shared>,
    queue_rx: mpsc::Receiver<Utterance>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    event_tx: broadcast::Sender<StateEvent>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    /// Build the worker and the handle producers submit through
    pub fn new(
        classifier: Classifier,
        handlers: HandlerRegistry,
        speaker: Arc<dyn Speaker>,
        store: StateStore,
        event_tx: broadcast::Sender<StateEvent>,
        settings: OrchestratorSettings,
    ) -> (Self, OrchestratorHandle) {
        let (queue_tx, queue_rx) = mpsc::channel(1);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new());
        let machine = StateMachine::new(store, event_tx.clone());

        let handle = OrchestratorHandle::new(
            queue_tx,
            control_tx,
            Arc::clone(&shared),
            event_tx.clone(),
            machine.subscribe(),
        );

        let orchestrator = Self {
            classifier,
            handlers,
            speaker,
            machine,
            shared,
            queue_rx,
            control_rx,
            event_tx,
            settings,
        };

        (orchestrator, handle)
    }

    /// Run until an exit task, a shutdown request, or every handle is gone
    pub async fn run(mut self) {
        self.start().await;

        let farewell = loop {
            let flow = tokio::select! {
                biased;

                Some(control) = self.control_rx.recv() => self.handle_control(control).await,

                next = self.queue_rx.recv() => match next {
                    Some(utterance) => self.process(utterance).await,
                    None => {
                        debug!("all producers gone");
                        Flow::Stop { farewell: false }
                    }
                },
            };

            if let Flow::Stop { farewell } = flow {
                break farewell;
            }
        };

        self.finish(farewell).await;
    }

    async fn start(&mut self) {
        self.machine.set_microphone(false);

        if let Some(greeting) = self.settings.greeting.clone() {
            info!(text = %greeting, "speaking greeting");
            if let Err(e) = self.speaker.speak(&greeting).await {
                warn!(error = %e, "greeting failed");
            }
            tokio::time::sleep(self.settings.settle_delay).await;
        }

        self.machine.set_microphone(self.user_listening());
        self.machine.transition_to(AssistantState::Listening);
        info!("orchestrator ready");
    }

    async fn handle_control(&mut self, control: Control) -> Flow {
        match control {
            Control::SyncMicrophone => {
                let open = self.user_listening();
                info!(open, "listening toggled");
                self.machine.set_microphone(open);
                Flow::Continue
            }
            Control::Shutdown { immediate: false } => self.drain().await,
            Control::Shutdown { immediate: true } => Flow::Stop { farewell: false },
        }
    }

    /// Run whatever was admitted before a graceful shutdown, then stop
    async fn drain(&mut self) -> Flow {
        while let Ok(utterance) = self.queue_rx.try_recv() {
            info!(text = %utterance.text(), "draining admitted utterance");
            if let Flow::Stop { .. } = self.process(utterance).await {
                return Flow::Stop { farewell: false };
            }
        }
        Flow::Stop { farewell: true }
    }

    /// Process one dequeued utterance under the in-flight lock
    async fn process(&mut self, utterance: Utterance) -> Flow {
        let shared = Arc::clone(&self.shared);
        let _in_flight = shared.in_flight.lock().await;

        if self.aborted() {
            info!(text = %utterance.text(), "dropping queued utterance after abort");
            shared.busy.store(false, Ordering::Release);
            return Flow::Stop { farewell: false };
        }

        self.machine.transition_to(AssistantState::Processing);

        let outcome = AssertUnwindSafe(self.execute(&utterance))
            .catch_unwind()
            .await;

        let flow = match outcome {
            Ok(flow) => flow,
            Err(panic) => {
                error!(
                    text = %utterance.text(),
                    state = %self.machine.state(),
                    panic = panic_message(&*panic),
                    "utterance processing panicked"
                );
                self.machine.transition_to(AssistantState::Error);
                self.machine.set_microphone(self.user_listening());
                Flow::Continue
            }
        };

        if flow == Flow::Continue {
            self.machine.transition_to(AssistantState::Listening);
        }

        shared.busy.store(false, Ordering::Release);
        flow
    }

    /// Classify and run every task in order
    async fn execute(&mut self, utterance: &Utterance) -> Flow {
        let tasks = self.classifier.classify(utterance.text()).await;
        info!(
            text = %utterance.text(),
            tasks = ?tasks.iter().map(|t| t.kind.to_string()).collect::<Vec<_>>(),
            "utterance classified"
        );
        let _ = self.event_tx.send(StateEvent::TasksClassified {
            tasks: tasks.clone(),
        });

        let mut terminates = false;

        for task in &tasks {
            if self.aborted() {
                warn!("abort requested, skipping remaining tasks");
                return Flow::Stop { farewell: false };
            }

            let result = self.handlers.dispatch(task).await;

            if result.terminates {
                terminates = true;
                self.shared.accepting.store(false, Ordering::Release);
            }

            let spoke = !result.spoken_text.trim().is_empty();
            if spoke {
                self.speak(&result.spoken_text).await;
            }

            let _ = self.event_tx.send(StateEvent::TaskCompleted {
                kind: task.kind,
                spoke,
            });
        }

        if terminates || self.aborted() {
            Flow::Stop { farewell: false }
        } else {
            Flow::Continue
        }
    }

    /// Speak with the microphone closed, then wait out the settle delay
    async fn speak(&mut self, text: &str) {
        self.machine.set_microphone(false);
        self.machine.transition_to(AssistantState::Speaking);

        info!(text, "speaking");
        if let Err(e) = self.speaker.speak(text).await {
            warn!(error = %e, "speech output failed");
        }
        tokio::time::sleep(self.settings.settle_delay).await;

        self.machine.set_microphone(self.user_listening());
        self.machine.transition_to(AssistantState::Processing);
    }

    async fn finish(&mut self, farewell: bool) {
        self.shared.accepting.store(false, Ordering::Release);
        self.queue_rx.close();
        while let Ok(utterance) = self.queue_rx.try_recv() {
            warn!(text = %utterance.text(), "discarding utterance admitted during abort");
        }
        self.shared.busy.store(false, Ordering::Release);

        self.machine.set_microphone(false);
        self.machine.transition_to(AssistantState::ShuttingDown);

        if farewell {
            info!(text = FAREWELL, "speaking farewell");
            if let Err(e) = self.speaker.speak(FAREWELL).await {
                warn!(error = %e, "farewell failed");
            }
        }

        info!("orchestrator stopped");
    }

    fn user_listening(&self) -> bool {
        self.shared.listening.load(Ordering::Acquire)
    }

    fn aborted(&self) -> bool {
        self.shared.abort.load(Ordering::Acquire)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::classifier::{SearchEngine, SystemOp};
    use crate::events::RejectReason;
    use crate::handlers::{Collaborators, HandlerLimits};
    use crate::services::{
        AppControl, ChatMessage, ChatProvider, Conversation, DecisionModel, ServiceError,
    };
    use crate::utterance::Origin;

    struct FixedDecision(Result<&'static str, &'static str>);

    #[async_trait]
    impl DecisionModel for FixedDecision {
        async fn decide(&self, _: &str, _: &[ChatMessage], _: &str) -> Result<String, ServiceError> {
            self.0
                .map(str::to_string)
                .map_err(|e| ServiceError::Malformed(e.to_string()))
        }
    }

    struct FixedChat(&'static str);

    #[async_trait]
    impl ChatProvider for FixedChat {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn complete(&self, _: &str, _: &[ChatMessage]) -> Result<String, ServiceError> {
            Ok(self.0.to_string())
        }
    }

    #[derive(Default)]
    struct RecordingDesktop {
        opened: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AppControl for RecordingDesktop {
        async fn open_target(&self, name: &str) -> String {
            self.opened.lock().unwrap().push(name.to_string());
            format!("Opening {name}...")
        }

        async fn close_target(&self, name: &str) -> String {
            format!("Closed {name}")
        }

        async fn play_media(&self, query: &str) -> String {
            format!("Playing: {query}")
        }

        async fn web_search(&self, engine: SearchEngine, query: &str) -> String {
            format!("Searching {engine} for: {query}")
        }

        async fn system(&self, _op: SystemOp) -> String {
            "done".to_string()
        }
    }

    /// Records what was spoken together with the shared cells at that moment.
    /// With `sample_after` set, the mic cell is also read once that long after
    /// speech ends, while the settle delay is still running.
    struct RecordingSpeaker {
        store: StateStore,
        spoken: Mutex<Vec<(String, Option<bool>, Option<AssistantState>)>>,
        sample_after: Option<Duration>,
        settle_samples: Arc<Mutex<Vec<Option<bool>>>>,
    }

    #[async_trait]
    impl Speaker for RecordingSpeaker {
        async fn speak(&self, text: &str) -> Result<(), ServiceError> {
            if text.contains("explode") {
                panic!("speech engine crashed");
            }
            let mic = self.store.read_microphone().unwrap();
            let status = self.store.read_status().unwrap();
            self.spoken.lock().unwrap().push((text.to_string(), mic, status));

            if let Some(after) = self.sample_after {
                let store = self.store.clone();
                let samples = Arc::clone(&self.settle_samples);
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    samples.lock().unwrap().push(store.read_microphone().unwrap());
                });
            }
            Ok(())
        }
    }

    impl RecordingSpeaker {
        fn texts(&self) -> Vec<String> {
            self.spoken.lock().unwrap().iter().map(|(t, _, _)| t.clone()).collect()
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        store: StateStore,
        handle: OrchestratorHandle,
        speaker: Arc<RecordingSpeaker>,
        desktop: Arc<RecordingDesktop>,
        events: broadcast::Receiver<StateEvent>,
        worker: JoinHandle<()>,
    }

    async fn harness(decision: Result<&'static str, &'static str>, chat_reply: &'static str) -> Harness {
        harness_with(decision, chat_reply, Duration::from_millis(10), None).await
    }

    async fn harness_with(
        decision: Result<&'static str, &'static str>,
        chat_reply: &'static str,
        settle_delay: Duration,
        sample_after: Option<Duration>,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("status.data"), dir.path().join("mic.data"));

        let classifier = Classifier::new(
            Some(Arc::new(FixedDecision(decision)) as Arc<dyn DecisionModel>),
            2,
            Duration::from_secs(5),
        );
        let conversation = Conversation::new(
            vec![Arc::new(FixedChat(chat_reply)) as Arc<dyn ChatProvider>],
            dir.path().join("chat_log.json"),
            10,
            "Sam",
            "Prism",
        );
        let desktop = Arc::new(RecordingDesktop::default());
        let handlers = HandlerRegistry::new(
            Collaborators {
                conversation: Arc::new(conversation),
                search: None,
                images: None,
                desktop: desktop.clone() as Arc<dyn AppControl>,
            },
            HandlerLimits::default(),
        );
        let speaker = Arc::new(RecordingSpeaker {
            store: store.clone(),
            spoken: Mutex::new(Vec::new()),
            sample_after,
            settle_samples: Arc::new(Mutex::new(Vec::new())),
        });

        let (event_tx, events) = broadcast::channel(64);
        let (orchestrator, handle) = Orchestrator::new(
            classifier,
            handlers,
            speaker.clone() as Arc<dyn Speaker>,
            store.clone(),
            event_tx,
            OrchestratorSettings {
                settle_delay,
                greeting: None,
            },
        );
        let worker = tokio::spawn(orchestrator.run());

        wait_until(|| handle.status() == AssistantState::Listening).await;

        Harness {
            _dir: dir,
            store,
            handle,
            speaker,
            desktop,
            events,
            worker,
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn manual(text: &str) -> Utterance {
        Utterance::new(text, Origin::Manual).unwrap()
    }

    #[tokio::test]
    async fn test_startup_opens_microphone() {
        let h = harness(Ok("general hi"), "hello").await;

        assert_eq!(h.store.read_status().unwrap(), Some(AssistantState::Listening));
        assert_eq!(h.store.read_microphone().unwrap(), Some(true));
    }

    #[tokio::test]
    async fn test_general_then_open_end_to_end() {
        let h = harness(Ok("general what time is it, open notepad"), "It is noon.").await;

        h.handle.submit(manual("what time is it, open notepad")).unwrap();
        wait_until(|| !h.handle.is_busy()).await;

        let spoken = h.speaker.spoken.lock().unwrap().clone();
        assert_eq!(
            spoken,
            vec![
                ("It is noon.".to_string(), Some(false), Some(AssistantState::Speaking)),
                ("Opening notepad...".to_string(), Some(false), Some(AssistantState::Speaking)),
            ]
        );
        assert_eq!(*h.desktop.opened.lock().unwrap(), vec!["notepad"]);
        assert_eq!(h.handle.status(), AssistantState::Listening);
        assert_eq!(h.store.read_microphone().unwrap(), Some(true));
    }

    #[tokio::test]
    async fn test_gate_stays_closed_through_settle_delay() {
        let h = harness_with(
            Ok("general hi"),
            "hello",
            Duration::from_millis(300),
            Some(Duration::from_millis(150)),
        )
        .await;

        h.handle.submit(manual("hi")).unwrap();
        wait_until(|| !h.handle.is_busy()).await;

        assert_eq!(*h.speaker.settle_samples.lock().unwrap(), vec![Some(false)]);
        assert_eq!(h.store.read_microphone().unwrap(), Some(true));
    }

    #[tokio::test]
    async fn test_exit_shuts_down_and_refuses_input() {
        let h = harness(Ok("exit"), "unused").await;

        h.handle.submit(manual("goodbye")).unwrap();
        tokio::time::timeout(Duration::from_secs(5), h.worker)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(h.speaker.texts(), vec!["Goodbye sir. Shutting down."]);
        assert_eq!(h.store.read_status().unwrap(), Some(AssistantState::ShuttingDown));
        assert_eq!(h.store.read_microphone().unwrap(), Some(false));
        assert_eq!(h.handle.submit(manual("hello")), Err(SubmitError::ShuttingDown));
    }

    #[tokio::test]
    async fn test_decision_failure_answers_as_general() {
        let h = harness(Err("service unavailable"), "Here is an answer.").await;

        h.handle.submit(manual("tell me something")).unwrap();
        wait_until(|| !h.handle.is_busy()).await;

        assert_eq!(h.speaker.texts(), vec!["Here is an answer."]);
        assert_eq!(h.handle.status(), AssistantState::Listening);
    }

    #[tokio::test]
    async fn test_concurrent_utterance_rejected() {
        let mut h = harness(Ok("general hi"), "hello").await;

        h.handle.submit(manual("hi there")).unwrap();
        assert_eq!(h.handle.submit(manual("and another")), Err(SubmitError::Busy));
        wait_until(|| !h.handle.is_busy()).await;

        assert_eq!(h.speaker.texts(), vec!["hello"]);

        let mut rejected = Vec::new();
        while let Ok(event) = h.events.try_recv() {
            if let StateEvent::UtteranceRejected { text, reason } = event {
                rejected.push((text, reason));
            }
        }
        assert_eq!(rejected, vec![("and another".to_string(), RejectReason::Busy)]);
    }

    #[tokio::test]
    async fn test_panic_recovers_to_listening() {
        let mut h = harness(Ok("general boom"), "I will explode").await;

        h.handle.submit(manual("boom")).unwrap();
        wait_until(|| !h.handle.is_busy()).await;

        assert_eq!(h.handle.status(), AssistantState::Listening);
        assert_eq!(h.store.read_microphone().unwrap(), Some(true));

        let mut saw_error = false;
        while let Ok(event) = h.events.try_recv() {
            if let StateEvent::StatusChanged {
                to: AssistantState::Error,
                ..
            } = event
            {
                saw_error = true;
            }
        }
        assert!(saw_error);

        // still serving
        assert_eq!(h.handle.submit(manual("again")), Ok(()));
    }

    #[tokio::test]
    async fn test_graceful_shutdown_says_goodbye() {
        let h = harness(Ok("general hi"), "hello").await;

        h.handle.request_shutdown(false);
        tokio::time::timeout(Duration::from_secs(5), h.worker)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(h.speaker.texts(), vec!["Goodbye sir."]);
        assert_eq!(h.store.read_status().unwrap(), Some(AssistantState::ShuttingDown));
    }

    #[tokio::test]
    async fn test_graceful_shutdown_drains_admitted_utterance() {
        let h = harness(Ok("general hi"), "hello").await;

        h.handle.submit(manual("hi there")).unwrap();
        h.handle.request_shutdown(false);
        tokio::time::timeout(Duration::from_secs(5), h.worker)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(h.speaker.texts(), vec!["hello", "Goodbye sir."]);
        assert!(!h.handle.is_busy());
        assert_eq!(h.store.read_status().unwrap(), Some(AssistantState::ShuttingDown));
    }

    #[tokio::test]
    async fn test_immediate_shutdown_is_silent() {
        let h = harness(Ok("general hi"), "hello").await;

        h.handle.request_shutdown(true);
        tokio::time::timeout(Duration::from_secs(5), h.worker)
            .await
            .unwrap()
            .unwrap();

        assert!(h.speaker.texts().is_empty());
    }

    #[tokio::test]
    async fn test_listening_toggle_keeps_gate_closed() {
        let h = harness(Ok("general hi"), "hello").await;

        h.handle.set_listening(false);
        wait_until(|| h.store.read_microphone().unwrap() == Some(false)).await;

        h.handle.submit(manual("hi")).unwrap();
        wait_until(|| !h.handle.is_busy()).await;

        assert_eq!(h.speaker.texts(), vec!["hello"]);
        assert_eq!(h.store.read_microphone().unwrap(), Some(false));

        h.handle.set_listening(true);
        wait_until(|| h.store.read_microphone().unwrap() == Some(true)).await;
    }
}
