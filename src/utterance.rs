//! Raw user text awaiting classification

use serde::{Deserialize, Serialize};

/// Where an utterance came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Read from the inbound channel written by the capture process
    Capture,
    /// Typed on the console or submitted over IPC
    Manual,
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Origin::Capture => write!(f, "capture"),
            Origin::Manual => write!(f, "manual"),
        }
    }
}

/// One unit of user text. Never empty after trimming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    text: String,
    origin: Origin,
}

impl Utterance {
    /// Build an utterance, returning `None` for blank text
    pub fn new(text: &str, origin: Origin) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        Some(Self {
            text: text.to_string(),
            origin,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_text_rejected() {
        assert!(Utterance::new("   \n", Origin::Capture).is_none());
    }

    #[test]
    fn test_text_is_trimmed() {
        let utterance = Utterance::new("  open chrome \n", Origin::Manual).unwrap();
        assert_eq!(utterance.text(), "open chrome");
        assert_eq!(utterance.origin(), Origin::Manual);
    }
}
