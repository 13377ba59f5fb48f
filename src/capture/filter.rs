//! Noise and echo filtering for captured text

use std::time::{Duration, Instant};

use crate::events::RejectReason;

/// Rejects fragments below a minimum length and repeats of the last accepted
/// text inside the cooldown window. A repeat after the window is allowed.
#[derive(Debug)]
pub struct EchoFilter {
    cooldown: Duration,
    min_chars: usize,
    last_accepted: Option<(String, Instant)>,
}

impl EchoFilter {
    pub fn new(cooldown: Duration, min_chars: usize) -> Self {
        Self {
            cooldown,
            min_chars,
            last_accepted: None,
        }
    }

    pub fn check(&self, text: &str, now: Instant) -> Result<(), RejectReason> {
        let key = normalize(text);
        if key.chars().count() < self.min_chars {
            return Err(RejectReason::TooShort);
        }

        if let Some((last, at)) = &self.last_accepted {
            if *last == key && now.saturating_duration_since(*at) < self.cooldown {
                return Err(RejectReason::Duplicate);
            }
        }

        Ok(())
    }

    /// Remember an accepted text; starts a new cooldown window
    pub fn record(&mut self, text: &str, now: Instant) {
        self.last_accepted = Some((normalize(text), now));
    }
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}
