//! Bounded, non-blocking mutation feed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::config::FeedConfig;
use crate::error::StrataResult;

use super::{MutationEvent, MutationObserver};

/// Fans committed mutations out to a bounded channel.
///
/// Publishing never blocks the writer: when the channel is full the event is
/// dropped and counted. Consumers that see a non-zero drop count must resync
/// from storage.
#[derive(Debug)]
pub struct MutationFeed {
    tx: Sender<MutationEvent>,
    rx: Receiver<MutationEvent>,
    dropped: AtomicU64,
}

impl MutationFeed {
    #[must_use]
    pub fn new(cfg: &FeedConfig) -> Self {
        let (tx, rx) = bounded(cfg.capacity.max(1));
        Self {
            tx,
            rx,
            dropped: AtomicU64::new(0),
        }
    }

    /// A receiving handle. Handles share one queue; each event goes to one of them.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<MutationEvent> {
        self.rx.clone()
    }

    /// Non-blocking enqueue.
    pub fn publish(&self, event: MutationEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(ev) | TrySendError::Disconnected(ev)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(layer = %ev.layer, kind = %ev.kind, "mutation feed full, event dropped");
            }
        }
    }

    /// Receive the next event, waiting at most `timeout`.
    #[must_use]
    pub fn recv_timeout(&self, timeout: Duration) -> Option<MutationEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(ev) => Some(ev),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl MutationObserver for MutationFeed {
    fn on_mutation(&self, event: &MutationEvent) -> StrataResult<()> {
        self.publish(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::ChangesetId;
    use crate::ci::CiId;
    use crate::feed::MutationKind;
    use crate::layer::LayerId;
    use chrono::Utc;

    fn event() -> MutationEvent {
        MutationEvent {
            kind: MutationKind::Attributes,
            layer: LayerId::new("base").unwrap(),
            ci_ids: vec![CiId::new()],
            changeset_id: ChangesetId::new(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_publish_and_receive() {
        let feed = MutationFeed::new(&FeedConfig::default());
        let ev = event();
        feed.on_mutation(&ev).unwrap();
        assert_eq!(feed.pending(), 1);
        let got = feed.subscribe().try_recv().unwrap();
        assert_eq!(got, ev);
        assert!(feed.recv_timeout(Duration::from_millis(1)).is_none());
    }

    #[test]
    fn test_full_feed_drops_without_blocking() {
        let feed = MutationFeed::new(&FeedConfig { capacity: 2 });
        for _ in 0..5 {
            feed.publish(event());
        }
        assert_eq!(feed.pending(), 2);
        assert_eq!(feed.dropped(), 3);
    }
}
