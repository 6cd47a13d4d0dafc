// =============================================================================
// Subscriber Hub — registry and fan-out for live batches
// =============================================================================
//
// Every connected viewer owns a bounded queue. Registration queues the
// snapshot as the first frame before the subscriber becomes visible to
// `publish`, so a subscriber can never see a live batch ahead of its own
// snapshot.
//
// `publish` never awaits. A subscriber whose queue is full or closed is
// dropped from the registry; its connection task drains what is queued and
// then ends.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::market_data::LiveStateStore;
use crate::types::WireTicker;

/// Serialised JSON frame shared by every subscriber of one publish.
pub type Frame = Arc<str>;

/// Identity of one subscriber connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receiving half handed to a connection task.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    /// Number of records in the snapshot queued as the first frame.
    pub snapshot_len: usize,
    pub frames: mpsc::Receiver<Frame>,
}

/// Outcome of one `publish` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: usize,
}

pub struct SubscriberHub {
    store: Arc<LiveStateStore>,
    subscribers: RwLock<HashMap<SubscriberId, mpsc::Sender<Frame>>>,
    queue_capacity: usize,
}

impl SubscriberHub {
    pub fn new(store: Arc<LiveStateStore>, queue_capacity: usize) -> Self {
        Self {
            store,
            subscribers: RwLock::new(HashMap::new()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register a new subscriber. The snapshot is already queued when this
    /// returns.
    pub fn register(&self) -> Subscription {
        let id = SubscriberId::new();
        let (tx, rx) = mpsc::channel(self.queue_capacity);

        // Holding the write lock orders this registration against concurrent
        // publishes: either the publish sees the new sender (after the
        // snapshot is queued) or the snapshot already reflects its ticks.
        let mut subscribers = self.subscribers.write();
        let snapshot = self.store.snapshot();
        let snapshot_len = snapshot.len();
        match encode(&snapshot) {
            Some(frame) => {
                // A fresh channel with capacity >= 1 always accepts one frame.
                let _ = tx.try_send(frame);
            }
            None => warn!(subscriber = %id, "snapshot could not be encoded"),
        }
        subscribers.insert(id, tx);
        let total = subscribers.len();
        drop(subscribers);

        info!(subscriber = %id, snapshot_len, total, "subscriber registered");
        Subscription {
            id,
            snapshot_len,
            frames: rx,
        }
    }

    /// Remove a subscriber. Idempotent; returns whether it was registered.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.write().remove(&id).is_some();
        if removed {
            info!(subscriber = %id, "subscriber unregistered");
        }
        removed
    }

    /// Fan a batch out to every registered subscriber.
    pub fn publish(&self, batch: &[WireTicker]) -> PublishReport {
        let Some(frame) = encode(batch) else {
            return PublishReport::default();
        };

        let targets: Vec<(SubscriberId, mpsc::Sender<Frame>)> = self
            .subscribers
            .read()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut report = PublishReport::default();
        let mut failed = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber = %id, "subscriber queue full — dropping subscriber");
                    failed.push(id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber = %id, "subscriber queue closed");
                    failed.push(id);
                }
            }
        }

        report.dropped = failed.len();
        for id in failed {
            self.unregister(id);
        }

        debug!(
            records = batch.len(),
            delivered = report.delivered,
            dropped = report.dropped,
            "batch published"
        );
        report
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

fn encode(records: &[WireTicker]) -> Option<Frame> {
    match serde_json::to_string(records) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            warn!(error = %e, "failed to serialise batch");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_config::ReseedPolicy;
    use crate::types::LiveTick;
    use crate::universe::Universe;

    fn hub(capacity: usize) -> (Arc<LiveStateStore>, SubscriberHub) {
        let universe = Universe::new(["BTCUSDT", "ETHUSDT", "SOLUSDT"]).unwrap();
        let store = Arc::new(LiveStateStore::new(Arc::new(universe)));
        store.seed_sentinels(ReseedPolicy::MissingOnly);
        let hub = SubscriberHub::new(store.clone(), capacity);
        (store, hub)
    }

    fn batch(symbol: &str, price: &str) -> Vec<WireTicker> {
        vec![WireTicker {
            symbol: symbol.into(),
            price: price.into(),
            change_pct: "1.0".into(),
        }]
    }

    fn decode(frame: &Frame) -> Vec<WireTicker> {
        serde_json::from_str(frame).unwrap()
    }

    #[test]
    fn snapshot_arrives_before_first_batch() {
        let (store, hub) = hub(8);
        store.set("BTCUSDT", LiveTick::new(43_000.0, 0.5));

        let mut sub = hub.register();
        assert_eq!(sub.snapshot_len, 3);
        hub.publish(&batch("ETHUSDT", "2300.5"));

        let first = decode(&sub.frames.try_recv().unwrap());
        assert_eq!(first.len(), 3);
        assert_eq!(first[0].price, "43000");

        let second = decode(&sub.frames.try_recv().unwrap());
        assert_eq!(second, batch("ETHUSDT", "2300.5"));
        assert!(sub.frames.try_recv().is_err());
    }

    #[test]
    fn closed_subscriber_does_not_block_others() {
        let (_store, hub) = hub(8);
        let dead = hub.register();
        let mut live = hub.register();
        drop(dead.frames);

        let report = hub.publish(&batch("SOLUSDT", "101.5"));
        assert_eq!(report, PublishReport { delivered: 1, dropped: 1 });
        assert_eq!(hub.subscriber_count(), 1);

        let _snapshot = live.frames.try_recv().unwrap();
        assert_eq!(decode(&live.frames.try_recv().unwrap()).len(), 1);
    }

    #[test]
    fn full_queue_unregisters_slow_subscriber() {
        let (_store, hub) = hub(2);
        let mut slow = hub.register();

        // Snapshot + one batch fill the queue; the next publish overflows.
        assert_eq!(hub.publish(&batch("BTCUSDT", "1")).delivered, 1);
        assert_eq!(hub.publish(&batch("BTCUSDT", "2")).dropped, 1);
        assert_eq!(hub.subscriber_count(), 0);

        // Queued frames are still drained, then the channel ends.
        assert!(slow.frames.try_recv().is_ok());
        assert!(slow.frames.try_recv().is_ok());
        assert!(matches!(
            slow.frames.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn unregister_is_idempotent() {
        let (_store, hub) = hub(4);
        let sub = hub.register();
        assert!(hub.unregister(sub.id));
        assert!(!hub.unregister(sub.id));
        assert_eq!(hub.publish(&[]), PublishReport::default());
    }
}
