//! Presentation observers
//!
//! An observer only reads the status and microphone cells, the same way an
//! out-of-process indicator would. The mode picks how much it shows; it never
//! changes how the assistant behaves.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::state::{AssistantState, StateStore};

/// How status is presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PresentationMode {
    /// Compact indicator line
    #[default]
    Tray,
    /// Verbose status line with the time of each change
    Full,
    /// No output
    None,
}

/// One reading of the shared cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub status: AssistantState,
    pub microphone_open: bool,
}

impl Snapshot {
    /// Read both cells. Unreadable or unset status reads as `Listening`.
    pub fn read(store: &StateStore) -> Self {
        let status = match store.read_status() {
            Ok(status) => status.unwrap_or(AssistantState::Listening),
            Err(e) => {
                warn!(error = %e, "status cell unreadable, assuming listening");
                AssistantState::Listening
            }
        };

        Self {
            status,
            microphone_open: store.microphone_open(),
        }
    }
}

pub struct StatusObserver {
    store: StateStore,
    mode: PresentationMode,
    interval: Duration,
}

impl StatusObserver {
    pub fn new(store: StateStore, mode: PresentationMode, interval: Duration) -> Self {
        Self {
            store,
            mode,
            interval,
        }
    }

    /// Poll the cells and print each change until the status reaches
    /// `ShuttingDown`
    pub async fn run(self) {
        if self.mode == PresentationMode::None {
            debug!("presentation disabled");
            return;
        }

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last = None;

        loop {
            interval.tick().await;

            let snapshot = Snapshot::read(&self.store);
            if last == Some(snapshot) {
                continue;
            }
            last = Some(snapshot);

            if let Some(line) = render(self.mode, &snapshot, chrono::Local::now()) {
                println!("{line}");
            }

            if snapshot.status == AssistantState::ShuttingDown {
                break;
            }
        }
    }
}

/// Format a snapshot for the given mode
pub fn render(
    mode: PresentationMode,
    snapshot: &Snapshot,
    now: chrono::DateTime<chrono::Local>,
) -> Option<String> {
    let mic = if snapshot.microphone_open { "on" } else { "off" };

    match mode {
        PresentationMode::None => None,
        PresentationMode::Tray => Some(format!(
            "{} {} [mic {mic}]",
            glyph(snapshot.status),
            snapshot.status
        )),
        PresentationMode::Full => Some(format!(
            "[{}] Status: {:<12} Microphone: {}",
            now.format("%H:%M:%S"),
            snapshot.status.to_string(),
            if snapshot.microphone_open { "open" } else { "closed" }
        )),
    }
}

fn glyph(status: AssistantState) -> &'static str {
    match status {
        AssistantState::Initializing => "○",
        AssistantState::Listening => "●",
        AssistantState::Processing => "◐",
        AssistantState::Speaking => "◆",
        AssistantState::Error => "✖",
        AssistantState::ShuttingDown => "■",
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at_noon() -> chrono::DateTime<chrono::Local> {
        chrono::Local.with_ymd_and_hms(2024, 8, 5, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_tray_line() {
        let snapshot = Snapshot {
            status: AssistantState::Speaking,
            microphone_open: false,
        };
        assert_eq!(
            render(PresentationMode::Tray, &snapshot, at_noon()).unwrap(),
            "◆ Speaking [mic off]"
        );
    }

    #[test]
    fn test_full_line() {
        let snapshot = Snapshot {
            status: AssistantState::Listening,
            microphone_open: true,
        };
        assert_eq!(
            render(PresentationMode::Full, &snapshot, at_noon()).unwrap(),
            "[12:00:00] Status: Listening    Microphone: open"
        );
    }

    #[test]
    fn test_none_is_silent() {
        let snapshot = Snapshot {
            status: AssistantState::Error,
            microphone_open: true,
        };
        assert!(render(PresentationMode::None, &snapshot, at_noon()).is_none());
    }

    #[test]
    fn test_snapshot_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("status.data"), dir.path().join("mic.data"));
        std::fs::write(dir.path().join("status.data"), "Dancing").unwrap();

        let snapshot = Snapshot::read(&store);
        assert_eq!(snapshot.status, AssistantState::Listening);
        assert!(snapshot.microphone_open);
    }

    #[test]
    fn test_snapshot_reads_cells() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("status.data"), dir.path().join("mic.data"));
        store.write_status(AssistantState::Processing).unwrap();
        store.write_microphone(false).unwrap();

        assert_eq!(
            Snapshot::read(&store),
            Snapshot {
                status: AssistantState::Processing,
                microphone_open: false,
            }
        );
    }
}
