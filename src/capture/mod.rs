//! Capture bridge: feeds text from the external capture process into the
//! orchestrator
//!
//! Each poll claims whatever is pending in the inbound slot. Text arriving
//! while the microphone gate is closed or an utterance is in flight is
//! discarded, never deferred, so the assistant's own speech cannot come back
//! as input later. Accepted text has already left the slot before it is
//! submitted.

mod filter;
mod inbound;

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::events::RejectReason;
use crate::orchestrator::OrchestratorHandle;
use crate::state::StateStore;
use crate::utterance::{Origin, Utterance};

pub use filter::EchoFilter;
pub use inbound::InboundChannel;

/// Result of one poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing pending
    Idle,
    Accepted(String),
    Rejected(RejectReason),
}

pub struct CaptureBridge {
    inbound: InboundChannel,
    store: StateStore,
    handle: OrchestratorHandle,
    filter: EchoFilter,
    poll_interval: Duration,
}

impl CaptureBridge {
    pub fn new(
        inbound: InboundChannel,
        store: StateStore,
        handle: OrchestratorHandle,
        filter: EchoFilter,
        poll_interval: Duration,
    ) -> Self {
        Self {
            inbound,
            store,
            handle,
            filter,
            poll_interval,
        }
    }

    /// Poll until the orchestrator stops accepting input
    pub async fn run(mut self) {
        if let Err(e) = self.inbound.clear() {
            warn!(error = %e, "failed to clear stale inbound text");
        }

        info!(
            path = ?self.inbound.path(),
            interval_ms = self.poll_interval.as_millis() as u64,
            "capture bridge started"
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while self.handle.is_accepting() {
            interval.tick().await;
            self.poll_once(Instant::now());
        }

        info!("capture bridge stopped");
    }

    /// Claim and judge whatever is pending
    pub fn poll_once(&mut self, now: Instant) -> PollOutcome {
        let gate_open = self.store.microphone_open();
        let busy = self.handle.is_busy();

        let text = match self.inbound.take() {
            Ok(Some(text)) => text,
            Ok(None) => return PollOutcome::Idle,
            Err(e) => {
                warn!(error = %e, "failed to read inbound text");
                return PollOutcome::Idle;
            }
        };

        if !gate_open {
            return self.reject(&text, RejectReason::MicrophoneClosed);
        }
        if busy {
            return self.reject(&text, RejectReason::Busy);
        }
        if let Err(reason) = self.filter.check(&text, now) {
            return self.reject(&text, reason);
        }

        let Some(utterance) = Utterance::new(&text, Origin::Capture) else {
            return PollOutcome::Idle;
        };

        match self.handle.submit(utterance) {
            Ok(()) => {
                self.filter.record(&text, now);
                debug!(text = %text, "captured text submitted");
                PollOutcome::Accepted(text)
            }
            // submit has already reported the rejection
            Err(e) => PollOutcome::Rejected(e.reason()),
        }
    }

    fn reject(&self, text: &str, reason: RejectReason) -> PollOutcome {
        self.handle.report_rejection(text, reason);
        PollOutcome::Rejected(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::TestWorker;

    struct Fixture {
        dir: tempfile::TempDir,
        store: StateStore,
        worker: TestWorker,
        bridge: CaptureBridge,
    }

    impl Fixture {
        fn say(&self, text: &str) {
            std::fs::write(self.dir.path().join("voice_input.txt"), text).unwrap();
        }

        fn pending(&self) -> bool {
            self.dir.path().join("voice_input.txt").exists()
        }
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("status.data"), dir.path().join("mic.data"));
        store.write_microphone(true).unwrap();
        let (handle, worker) = OrchestratorHandle::detached();

        let bridge = CaptureBridge::new(
            InboundChannel::new(dir.path().join("voice_input.txt")),
            store.clone(),
            handle,
            EchoFilter::new(Duration::from_secs(2), 2),
            Duration::from_millis(500),
        );

        Fixture {
            dir,
            store,
            worker,
            bridge,
        }
    }

    #[test]
    fn test_accepts_and_clears() {
        let mut f = fixture();
        let now = Instant::now();

        f.say("open chrome");
        assert_eq!(f.bridge.poll_once(now), PollOutcome::Accepted("open chrome".into()));
        assert!(!f.pending());

        // same instant, nothing left to read
        assert_eq!(f.bridge.poll_once(now), PollOutcome::Idle);

        let queued = f.worker.complete().unwrap();
        assert_eq!(queued.text(), "open chrome");
        assert_eq!(queued.origin(), Origin::Capture);
        assert!(f.worker.complete().is_none());
    }

    #[test]
    fn test_closed_gate_discards_echo() {
        let mut f = fixture();
        f.store.write_microphone(false).unwrap();

        f.say("Opening notepad...");
        assert_eq!(
            f.bridge.poll_once(Instant::now()),
            PollOutcome::Rejected(RejectReason::MicrophoneClosed)
        );
        assert!(!f.pending());

        // reopening does not resurrect the echo
        f.store.write_microphone(true).unwrap();
        assert_eq!(f.bridge.poll_once(Instant::now()), PollOutcome::Idle);
        assert!(f.worker.complete().is_none());
    }

    #[test]
    fn test_busy_discards_input() {
        let mut f = fixture();
        let now = Instant::now();

        f.say("open chrome");
        f.bridge.poll_once(now);

        f.say("play jazz");
        assert_eq!(
            f.bridge.poll_once(now + Duration::from_millis(100)),
            PollOutcome::Rejected(RejectReason::Busy)
        );
        assert_eq!(f.worker.complete().unwrap().text(), "open chrome");
        assert!(f.worker.complete().is_none());
    }

    #[test]
    fn test_cooldown_suppresses_repeat() {
        let mut f = fixture();
        let start = Instant::now();

        f.say("what time is it");
        assert!(matches!(f.bridge.poll_once(start), PollOutcome::Accepted(_)));
        f.worker.complete();

        f.say("what time is it");
        assert_eq!(
            f.bridge.poll_once(start + Duration::from_secs(1)),
            PollOutcome::Rejected(RejectReason::Duplicate)
        );

        f.say("what time is it");
        assert!(matches!(
            f.bridge.poll_once(start + Duration::from_secs(3)),
            PollOutcome::Accepted(_)
        ));
    }

    #[test]
    fn test_noise_rejected() {
        let mut f = fixture();

        f.say("a");
        assert_eq!(
            f.bridge.poll_once(Instant::now()),
            PollOutcome::Rejected(RejectReason::TooShort)
        );
        assert!(!f.pending());
    }

    #[test]
    fn test_shutdown_rejects() {
        let mut f = fixture();
        f.bridge.handle.request_shutdown(false);

        f.say("hello there");
        assert_eq!(
            f.bridge.poll_once(Instant::now()),
            PollOutcome::Rejected(RejectReason::ShuttingDown)
        );
    }
}
