use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError, sync_channel};

/// Events the dispatcher and reconciler publish for a presentation layer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    RunStarted {
        total: usize,
    },
    Waiting {
        wait_ms: u64,
    },
    Sent {
        index: usize,
        fingerprint: String,
        remote_id: u64,
    },
    SkippedDuplicate {
        index: usize,
        fingerprint: String,
    },
    SkippedRejected {
        index: usize,
        code: i64,
    },
    Failed {
        index: usize,
        attempts: u32,
    },
    Transition {
        fingerprint: String,
        from: String,
        to: String,
    },
    RunFinished {
        sent: usize,
        skipped_dup: usize,
        skipped_failed: usize,
        failed: usize,
        unprocessed: usize,
    },
}

/// Bounded, never-blocking fan-out to a slow consumer. When the buffer is
/// full the event is dropped and counted; the dispatcher's pace is never
/// tied to the UI's.
#[derive(Debug)]
pub struct ProgressFeed {
    tx: Option<SyncSender<ProgressEvent>>,
    dropped: AtomicU64,
}

impl ProgressFeed {
    /// A feed with no consumer; every publish is a cheap no-op.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn bounded(capacity: usize) -> (Self, Receiver<ProgressEvent>) {
        let (tx, rx) = sync_channel(capacity);
        (
            Self {
                tx: Some(tx),
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    pub fn publish(&self, event: ProgressEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            // Consumer went away; stop counting, just discard.
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::{ProgressEvent, ProgressFeed};

    #[test]
    fn full_buffer_drops_instead_of_blocking() {
        let (feed, rx) = ProgressFeed::bounded(2);
        for total in 0..5 {
            feed.publish(ProgressEvent::RunStarted { total });
        }
        assert_eq!(feed.dropped(), 3);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn disabled_feed_swallows_events() {
        let feed = ProgressFeed::disabled();
        feed.publish(ProgressEvent::Waiting { wait_ms: 10 });
        assert_eq!(feed.dropped(), 0);
    }

    #[test]
    fn disconnected_consumer_is_tolerated() {
        let (feed, rx) = ProgressFeed::bounded(1);
        drop(rx);
        feed.publish(ProgressEvent::Waiting { wait_ms: 10 });
        assert_eq!(feed.dropped(), 0);
    }
}
