//! Events published on the daemon's broadcast bus
//!
//! Status transitions, microphone gate changes, utterance admission and task
//! progress. IPC subscribers receive these as push notifications.

use serde::{Deserialize, Serialize};

use crate::classifier::{Task, TaskKind};
use crate::state::AssistantState;
use crate::utterance::Origin;

/// Why an utterance was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Another utterance is being processed
    Busy,
    /// The orchestrator is shutting down
    ShuttingDown,
    /// The microphone gate was closed when the text arrived
    MicrophoneClosed,
    /// Same text as the last accepted utterance, inside the cooldown
    Duplicate,
    /// Below the minimum utterance length
    TooShort,
    /// The queue slot was taken
    QueueFull,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::Busy => write!(f, "busy"),
            RejectReason::ShuttingDown => write!(f, "shutting down"),
            RejectReason::MicrophoneClosed => write!(f, "microphone closed"),
            RejectReason::Duplicate => write!(f, "duplicate"),
            RejectReason::TooShort => write!(f, "too short"),
            RejectReason::QueueFull => write!(f, "queue full"),
        }
    }
}

/// Events emitted by the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    /// Status cell changed
    StatusChanged {
        from: AssistantState,
        to: AssistantState,
        /// Time spent in `from`
        duration_ms: u64,
    },

    /// Microphone gate opened or closed
    MicrophoneChanged { open: bool },

    /// An utterance was admitted to the queue
    UtteranceAccepted { text: String, origin: Origin },

    /// An utterance was dropped before reaching the queue
    UtteranceRejected { text: String, reason: RejectReason },

    /// Classification finished
    TasksClassified { tasks: Vec<Task> },

    /// A task's handler returned
    TaskCompleted { kind: TaskKind, spoke: bool },

    /// Shutdown was requested
    ShutdownRequested { immediate: bool },
}

impl std::fmt::Display for StateEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateEvent::StatusChanged {
                from,
                to,
                duration_ms,
            } => write!(f, "STATUS {from} -> {to} ({duration_ms}ms)"),
            StateEvent::MicrophoneChanged { open: true } => write!(f, "MIC_OPEN"),
            StateEvent::MicrophoneChanged { open: false } => write!(f, "MIC_CLOSED"),
            StateEvent::UtteranceAccepted { text, origin } => {
                write!(f, "ACCEPTED [{origin}] {text:?}")
            }
            StateEvent::UtteranceRejected { text, reason } => {
                write!(f, "REJECTED ({reason}) {text:?}")
            }
            StateEvent::TasksClassified { tasks } => write!(f, "CLASSIFIED {} task(s)", tasks.len()),
            StateEvent::TaskCompleted { kind, spoke } => {
                write!(f, "TASK_COMPLETE {kind}{}", if *spoke { " (spoke)" } else { "" })
            }
            StateEvent::ShutdownRequested { immediate: true } => write!(f, "SHUTDOWN (immediate)"),
            StateEvent::ShutdownRequested { immediate: false } => write!(f, "SHUTDOWN"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = StateEvent::StatusChanged {
            from: AssistantState::Listening,
            to: AssistantState::Processing,
            duration_ms: 1500,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"status_changed""#));
        assert!(json.contains(r#""to":"processing""#));
        assert!(json.contains("1500"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"utterance_rejected","text":"hello","reason":"duplicate"}"#;
        let event: StateEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(
            event,
            StateEvent::UtteranceRejected {
                reason: RejectReason::Duplicate,
                ..
            }
        ));
    }

    #[test]
    fn test_display() {
        let event = StateEvent::UtteranceAccepted {
            text: "open chrome".into(),
            origin: Origin::Manual,
        };
        assert_eq!(event.to_string(), r#"ACCEPTED [manual] "open chrome""#);
        assert_eq!(
            StateEvent::MicrophoneChanged { open: false }.to_string(),
            "MIC_CLOSED"
        );
    }
}
