//! Command queue and the handle producers use to reach the orchestrator
//!
//! The queue holds at most one pending utterance. Admission is decided in
//! `submit` against a busy flag that stays set from acceptance until the
//! worker has finished the utterance, so a second utterance arriving in that
//! window is rejected rather than buffered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tracing::{debug, info};

use crate::events::{RejectReason, StateEvent};
use crate::state::AssistantState;
use crate::utterance::Utterance;

/// Requests handled by the worker between utterances
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Rewrite the microphone cell after a listening toggle
    SyncMicrophone,
    /// Stop the worker
    Shutdown { immediate: bool },
}

/// Why `submit` refused an utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("another utterance is in flight")]
    Busy,

    #[error("the assistant is shutting down")]
    ShuttingDown,

    #[error("the queue slot is taken")]
    Full,
}

impl SubmitError {
    pub fn reason(self) -> RejectReason {
        match self {
            SubmitError::Busy => RejectReason::Busy,
            SubmitError::ShuttingDown => RejectReason::ShuttingDown,
            SubmitError::Full => RejectReason::QueueFull,
        }
    }
}

/// Flags shared between the handle and the worker
pub(super) struct Shared {
    /// Set on admission, cleared when the worker finishes the utterance
    pub(super) busy: AtomicBool,
    /// Cleared once shutdown starts; never set again
    pub(super) accepting: AtomicBool,
    /// Stop between tasks instead of draining the current utterance
    pub(super) abort: AtomicBool,
    /// The user's listening toggle; the effective gate also needs "not speaking"
    pub(super) listening: AtomicBool,
    /// Held by the worker for the whole utterance span
    pub(super) in_flight: Mutex<()>,
}

impl Shared {
    pub(super) fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
            accepting: AtomicBool::new(true),
            abort: AtomicBool::new(false),
            listening: AtomicBool::new(true),
            in_flight: Mutex::new(()),
        }
    }
}

/// Cloneable producer side of the orchestrator
#[derive(Clone)]
pub struct OrchestratorHandle {
    queue_tx: mpsc::Sender<Utterance>,
    control_tx: mpsc::UnboundedSender<Control>,
    shared: Arc<Shared>,
    event_tx: broadcast::Sender<StateEvent>,
    state_rx: watch::Receiver<AssistantState>,
}

impl OrchestratorHandle {
    pub(super) fn new(
        queue_tx: mpsc::Sender<Utterance>,
        control_tx: mpsc::UnboundedSender<Control>,
        shared: Arc<Shared>,
        event_tx: broadcast::Sender<StateEvent>,
        state_rx: watch::Receiver<AssistantState>,
    ) -> Self {
        Self {
            queue_tx,
            control_tx,
            shared,
            event_tx,
            state_rx,
        }
    }

    /// Offer an utterance. Accepted only when nothing is in flight and the
    /// orchestrator is still running.
    pub fn submit(&self, utterance: Utterance) -> Result<(), SubmitError> {
        let text = utterance.text().to_string();
        let origin = utterance.origin();

        match self.admit().and_then(|()| self.enqueue(utterance)) {
            Ok(()) => {
                info!(%origin, text = %text, "utterance accepted");
                let _ = self
                    .event_tx
                    .send(StateEvent::UtteranceAccepted { text, origin });
                Ok(())
            }
            Err(e) => {
                self.report_rejection(&text, e.reason());
                Err(e)
            }
        }
    }

    fn admit(&self) -> Result<(), SubmitError> {
        if !self.shared.accepting.load(Ordering::Acquire) {
            return Err(SubmitError::ShuttingDown);
        }

        self.shared
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| SubmitError::Busy)
    }

    /// Hand an admitted utterance to the worker, releasing the busy flag if
    /// the slot cannot take it
    fn enqueue(&self, utterance: Utterance) -> Result<(), SubmitError> {
        let error = match self.queue_tx.try_send(utterance) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(_)) => SubmitError::Full,
            Err(TrySendError::Closed(_)) => SubmitError::ShuttingDown,
        };

        self.shared.busy.store(false, Ordering::Release);
        Err(error)
    }

    /// Log and publish an utterance dropped before reaching the queue
    pub fn report_rejection(&self, text: &str, reason: RejectReason) {
        info!(%reason, text, "utterance rejected");
        let _ = self.event_tx.send(StateEvent::UtteranceRejected {
            text: text.to_string(),
            reason,
        });
    }

    /// Whether an utterance is admitted or being processed
    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::Acquire) || self.shared.in_flight.try_lock().is_err()
    }

    pub fn is_accepting(&self) -> bool {
        self.shared.accepting.load(Ordering::Acquire)
    }

    pub fn status(&self) -> AssistantState {
        *self.state_rx.borrow()
    }

    pub fn listening(&self) -> bool {
        self.shared.listening.load(Ordering::Acquire)
    }

    /// Turn listening on or off. The worker applies it to the microphone
    /// cell once it is idle.
    pub fn set_listening(&self, enabled: bool) {
        debug!(enabled, "listening toggle requested");
        self.shared.listening.store(enabled, Ordering::Release);
        let _ = self.control_tx.send(Control::SyncMicrophone);
    }

    /// Stop accepting input and stop the worker. A graceful request lets the
    /// current utterance finish; an immediate one stops after the current
    /// blocking call.
    pub fn request_shutdown(&self, immediate: bool) {
        info!(immediate, "shutdown requested");
        self.shared.accepting.store(false, Ordering::Release);
        if immediate {
            self.shared.abort.store(true, Ordering::Release);
        }
        let _ = self.event_tx.send(StateEvent::ShutdownRequested { immediate });
        let _ = self.control_tx.send(Control::Shutdown { immediate });
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<StateEvent> {
        self.event_tx.subscribe()
    }
}

/// A handle with no worker behind it. The returned `TestWorker` plays the
/// worker's part.
#[cfg(test)]
impl OrchestratorHandle {
    pub(crate) fn detached() -> (Self, TestWorker) {
        let (queue_tx, queue_rx) = mpsc::channel(1);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(64);
        let (state_tx, state_rx) = watch::channel(AssistantState::Listening);
        let shared = Arc::new(Shared::new());

        let handle = Self::new(
            queue_tx,
            control_tx,
            Arc::clone(&shared),
            event_tx,
            state_rx,
        );
        let worker = TestWorker {
            queue_rx,
            control_rx,
            state_tx,
            shared,
        };
        (handle, worker)
    }
}

#[cfg(test)]
pub(crate) struct TestWorker {
    pub(crate) queue_rx: mpsc::Receiver<Utterance>,
    pub(crate) control_rx: mpsc::UnboundedReceiver<Control>,
    pub(crate) state_tx: watch::Sender<AssistantState>,
    shared: Arc<Shared>,
}

#[cfg(test)]
impl TestWorker {
    /// Take the pending utterance and mark it finished
    pub(crate) fn complete(&mut self) -> Option<Utterance> {
        let utterance = self.queue_rx.try_recv().ok();
        self.shared.busy.store(false, Ordering::Release);
        utterance
    }
}
