//! Bounded hand-off queue between two pipeline stages.
//!
//! - Writes never block. A full queue drops an item and says so.
//! - Reads block up to a timeout, so a consumer can re-check the running flag.
//! - Order is exact FIFO.
//!
//! The queue is the only backpressure mechanism in the pipeline. Each endpoint
//! has exactly one owner: neither `QueueProducer` nor `QueueConsumer` is `Clone`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::Deserialize;

/// Default capacity of both pipeline queues.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// What happens to a push against a full queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Reject the incoming item.
    #[default]
    DropNewest,
    /// Evict the oldest queued item and accept the incoming one.
    DropOldest,
}

impl std::str::FromStr for DropPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop_newest" | "newest" => Ok(DropPolicy::DropNewest),
            "drop_oldest" | "oldest" => Ok(DropPolicy::DropOldest),
            other => Err(anyhow::anyhow!(
                "unknown drop policy '{}' (expected drop_newest or drop_oldest)",
                other
            )),
        }
    }
}

/// Result of a push.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// Item enqueued, nothing dropped.
    Queued,
    /// Queue was full; the pushed item was discarded.
    DroppedNewest,
    /// Queue was full; the oldest item was discarded to make room.
    DroppedOldest,
    /// Consumer is gone; the item was discarded.
    Disconnected,
}

/// Result of a pop.
#[derive(Debug, PartialEq, Eq)]
pub enum Popped<T> {
    Item(T),
    /// Nothing arrived within the timeout.
    TimedOut,
    /// Producer is gone and every queued item has been delivered.
    Closed,
}

#[derive(Debug)]
struct QueueCounters {
    capacity: usize,
    dropped: AtomicU64,
    /// Cleared when the `QueueConsumer` drops. Gauges and the eviction
    /// handle keep the channel itself connected.
    consumer_alive: AtomicBool,
}

/// Create a queue with the given capacity and drop policy.
pub fn handoff_queue<T>(
    capacity: usize,
    policy: DropPolicy,
) -> (QueueProducer<T>, QueueConsumer<T>) {
    let capacity = capacity.max(1);
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    let counters = Arc::new(QueueCounters {
        capacity,
        dropped: AtomicU64::new(0),
        consumer_alive: AtomicBool::new(true),
    });
    let evict = match policy {
        DropPolicy::DropNewest => None,
        DropPolicy::DropOldest => Some(rx.clone()),
    };
    (
        QueueProducer {
            tx,
            evict,
            counters: counters.clone(),
        },
        QueueConsumer { rx, counters },
    )
}

/// Writing end of a hand-off queue.
pub struct QueueProducer<T> {
    tx: Sender<T>,
    /// Present only under `DropPolicy::DropOldest`.
    evict: Option<Receiver<T>>,
    counters: Arc<QueueCounters>,
}

impl<T> QueueProducer<T> {
    /// Enqueue without blocking. Returns false when the item was not
    /// accepted as-is (the queue was full or the consumer is gone).
    pub fn try_push(&self, item: T) -> bool {
        self.push(item) == PushOutcome::Queued
    }

    /// Enqueue without blocking, reporting exactly what happened.
    pub fn push(&self, item: T) -> PushOutcome {
        if !self.counters.consumer_alive.load(Ordering::SeqCst) {
            return PushOutcome::Disconnected;
        }
        let item = match self.tx.try_send(item) {
            Ok(()) => return PushOutcome::Queued,
            Err(TrySendError::Disconnected(_)) => return PushOutcome::Disconnected,
            Err(TrySendError::Full(item)) => item,
        };
        let Some(evict) = &self.evict else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return PushOutcome::DroppedNewest;
        };
        // The consumer may have drained in between, in which case nothing is
        // evicted and the item simply fits.
        let evicted = evict.try_recv().is_ok();
        match self.tx.try_send(item) {
            Ok(()) if evicted => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                PushOutcome::DroppedOldest
            }
            Ok(()) => PushOutcome::Queued,
            Err(TrySendError::Disconnected(_)) => PushOutcome::Disconnected,
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                PushOutcome::DroppedNewest
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.counters.capacity
    }

    /// Items dropped by this queue since creation.
    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }
}

/// Reading end of a hand-off queue.
pub struct QueueConsumer<T> {
    rx: Receiver<T>,
    counters: Arc<QueueCounters>,
}

impl<T> QueueConsumer<T> {
    /// Block until an item arrives or `timeout` elapses.
    pub fn pop(&self, timeout: Duration) -> Popped<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Popped::Item(item),
            Err(RecvTimeoutError::Timeout) => Popped::TimedOut,
            Err(RecvTimeoutError::Disconnected) => Popped::Closed,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.counters.capacity
    }

    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    /// Read-only view for health reporting from another thread.
    pub fn gauge(&self) -> QueueGauge<T> {
        QueueGauge {
            rx: self.rx.clone(),
            counters: self.counters.clone(),
        }
    }
}

impl<T> Drop for QueueConsumer<T> {
    fn drop(&mut self) {
        self.counters.consumer_alive.store(false, Ordering::SeqCst);
    }
}

/// Occupancy and drop counter of a queue, readable from any thread.
///
/// A gauge never receives. It holds a receiver handle only to read the
/// channel length. Neither the consumer's `Closed` nor the producer's
/// `Disconnected` depends on it.
pub struct QueueGauge<T> {
    rx: Receiver<T>,
    counters: Arc<QueueCounters>,
}

impl<T> QueueGauge<T> {
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.counters.capacity
    }

    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }
}
