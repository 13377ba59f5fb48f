//! Assistant status and its transition rules
//!
//! Initializing -> Listening <-> Processing <-> Speaking, with
//! Processing/Speaking -> Error -> Listening and any state -> ShuttingDown.
//! The machine is owned by the orchestrator, which makes it the only writer
//! of the status and microphone cells.

use std::str::FromStr;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::events::StateEvent;

use super::StateStore;

/// The possible states of the assistant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistantState {
    /// Starting up, microphone not yet open
    Initializing,
    /// Idle, waiting for an utterance
    Listening,
    /// Classifying an utterance or running one of its tasks
    Processing,
    /// Speech output in progress, microphone closed
    Speaking,
    /// An utterance failed; always followed by Listening
    Error,
    /// Terminal
    ShuttingDown,
}

impl Default for AssistantState {
    fn default() -> Self {
        Self::Initializing
    }
}

impl AssistantState {
    /// Whether the machine may move from `self` to `next`
    pub fn can_transition_to(self, next: AssistantState) -> bool {
        use AssistantState::*;

        match (self, next) {
            (ShuttingDown, _) => false,
            (_, ShuttingDown) => true,
            (Initializing, Listening)
            | (Listening, Processing)
            | (Processing, Listening)
            | (Processing, Speaking)
            | (Speaking, Processing)
            | (Processing, Error)
            | (Speaking, Error)
            | (Error, Listening) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for AssistantState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssistantState::Initializing => write!(f, "Initializing"),
            AssistantState::Listening => write!(f, "Listening"),
            AssistantState::Processing => write!(f, "Processing"),
            AssistantState::Speaking => write!(f, "Speaking"),
            AssistantState::Error => write!(f, "Error"),
            AssistantState::ShuttingDown => write!(f, "ShuttingDown"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown assistant state: {0:?}")]
pub struct ParseStateError(String);

impl FromStr for AssistantState {
    type Err = ParseStateError;

    /// Accepts the display names case-insensitively, ignoring trailing dots
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().trim_end_matches('.').to_ascii_lowercase();
        match name.as_str() {
            "initializing" => Ok(Self::Initializing),
            "listening" => Ok(Self::Listening),
            "processing" => Ok(Self::Processing),
            "speaking" => Ok(Self::Speaking),
            "error" => Ok(Self::Error),
            "shuttingdown" | "shutting down" => Ok(Self::ShuttingDown),
            _ => Err(ParseStateError(s.to_string())),
        }
    }
}

/// Drives status transitions and the microphone gate, mirroring both into
/// the shared cells and onto the event bus
pub struct StateMachine {
    /// Current state
    state: AssistantState,
    /// When the current state was entered
    state_entered_at: Instant,
    /// Last value written to the microphone cell
    microphone_open: bool,
    store: StateStore,
    event_tx: broadcast::Sender<StateEvent>,
    state_tx: watch::Sender<AssistantState>,
}

impl StateMachine {
    /// Create a machine in `Initializing` and publish that state
    pub fn new(store: StateStore, event_tx: broadcast::Sender<StateEvent>) -> Self {
        let (state_tx, _) = watch::channel(AssistantState::Initializing);
        let machine = Self {
            state: AssistantState::Initializing,
            state_entered_at: Instant::now(),
            microphone_open: false,
            store,
            event_tx,
            state_tx,
        };

        if let Err(e) = machine.store.write_status(AssistantState::Initializing) {
            warn!(error = %e, "failed to write status cell");
        }

        machine
    }

    /// Get the current state
    pub fn state(&self) -> AssistantState {
        self.state
    }

    /// Watch the current state from another task
    pub fn subscribe(&self) -> watch::Receiver<AssistantState> {
        self.state_tx.subscribe()
    }

    /// Perform a state transition. Illegal transitions are refused and
    /// logged; returns whether the machine is now in `next`.
    pub fn transition_to(&mut self, next: AssistantState) -> bool {
        let old_state = self.state;
        if old_state == next {
            return true;
        }

        if !old_state.can_transition_to(next) {
            warn!(from = %old_state, to = %next, "illegal status transition refused");
            return false;
        }

        let duration_ms = self.state_entered_at.elapsed().as_millis() as u64;

        info!(
            from = %old_state,
            to = %next,
            duration_ms = duration_ms,
            "status transition"
        );

        self.state = next;
        self.state_entered_at = Instant::now();

        if let Err(e) = self.store.write_status(next) {
            warn!(error = %e, "failed to write status cell");
        }
        self.state_tx.send_replace(next);

        let event = StateEvent::StatusChanged {
            from: old_state,
            to: next,
            duration_ms,
        };
        debug!(?event, "emitting status event");
        let _ = self.event_tx.send(event);

        true
    }

    /// Open or close the microphone gate
    pub fn set_microphone(&mut self, open: bool) {
        if let Err(e) = self.store.write_microphone(open) {
            warn!(error = %e, open, "failed to write microphone cell");
        }

        if self.microphone_open != open {
            debug!(open, "microphone gate changed");
            self.microphone_open = open;
            let _ = self.event_tx.send(StateEvent::MicrophoneChanged { open });
        }
    }
}
