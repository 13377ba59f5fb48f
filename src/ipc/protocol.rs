//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::events::{RejectReason, StateEvent};
use crate::state::AssistantState;

/// Largest frame either side will accept
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Requests from observers and control clients to the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon status
    GetStatus,

    /// Subscribe to state event notifications
    Subscribe,

    /// Submit typed text as a manual utterance
    Submit { text: String },

    /// Turn listening on or off
    SetListening { enabled: bool },

    /// Stop the daemon. `immediate` skips the drain and the farewell.
    Shutdown {
        #[serde(default)]
        immediate: bool,
    },
}

/// Responses from daemon to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Pong response to ping
    Pong,

    /// Current daemon status
    Status(DaemonStatus),

    /// Subscription confirmed
    Subscribed,

    /// The utterance was queued
    Accepted,

    /// The utterance was not queued
    Rejected { reason: RejectReason },

    /// Listening toggle applied
    Listening { enabled: bool },

    /// Shutdown has started
    ShuttingDown,

    /// Error response
    Error { code: String, message: String },
}

/// Push notification to subscribed clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// State event occurred
    Event { event: StateEvent },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Current assistant status
    pub status: AssistantState,

    /// Effective microphone gate, as written to the mic cell
    pub microphone_open: bool,

    /// The user's listening toggle
    pub listening: bool,

    /// Whether an utterance is in flight
    pub busy: bool,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            status: AssistantState::default(),
            microphone_open: false,
            listening: true,
            busy: false,
            uptime_secs: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = Request::Submit {
            text: "open chrome".into(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"type":"submit","text":"open chrome"}"#);
    }

    #[test]
    fn test_shutdown_defaults_to_graceful() {
        let req: Request = serde_json::from_str(r#"{"type":"shutdown"}"#).unwrap();
        assert_eq!(req, Request::Shutdown { immediate: false });
    }

    #[test]
    fn test_response_serialization() {
        let resp = Response::Status(DaemonStatus::default());
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""type":"status""#));
        assert!(json.contains(r#""status":"initializing""#));

        let resp = Response::Rejected {
            reason: RejectReason::Busy,
        };
        assert_eq!(
            serde_json::to_string(&resp).unwrap(),
            r#"{"type":"rejected","reason":"busy"}"#
        );
    }

    #[test]
    fn test_notification_nests_event() {
        let note = Notification::Event {
            event: StateEvent::MicrophoneChanged { open: false },
        };
        let json = serde_json::to_string(&note).unwrap();
        assert_eq!(
            json,
            r#"{"type":"event","event":{"type":"microphone_changed","open":false}}"#
        );
    }
}
