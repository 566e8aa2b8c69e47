//! Message queues between the network tasks and the controller loop
//!
//! - [`InboundQueue`]: decoded worker messages, popped oldest-result-first
//! - [`OutboundQueue`]: jobs waiting to be written, FIFO
//!
//! Both are plain mutex-guarded collections paired with a `Notify`, so
//! pushes never block and consumers sleep until there is work.

use super::registry::WorkerId;
use crate::protocol::{JobFrame, WorkerMessage};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

/// Statistics for a queue
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Total items enqueued
    pub enqueued: AtomicU64,

    /// Total items dequeued
    pub dequeued: AtomicU64,
}

impl QueueStats {
    pub fn throughput(&self) -> u64 {
        self.dequeued.load(Ordering::Relaxed)
    }
}

/// A message received from a worker
#[derive(Debug, Clone)]
pub struct Inbound {
    pub worker: WorkerId,
    pub message: WorkerMessage,
    /// Ordering key: the result timestamp for `job_done`, arrival time otherwise
    pub priority: DateTime<Utc>,
}

impl Inbound {
    pub fn new(worker: WorkerId, message: WorkerMessage) -> Self {
        let priority = match &message {
            WorkerMessage::JobDone { result, .. } => result.timestamp,
            _ => Utc::now(),
        };
        Self {
            worker,
            message,
            priority,
        }
    }
}

/// Heap entry; ties keep arrival order
struct Prioritized {
    priority: DateTime<Utc>,
    seq: u64,
    item: Inbound,
}

impl PartialEq for Prioritized {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Prioritized {}

impl PartialOrd for Prioritized {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Prioritized {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (self.priority, self.seq).cmp(&(other.priority, other.seq))
    }
}

/// Timestamp-ordered queue of worker messages
#[derive(Default)]
pub struct InboundQueue {
    heap: Mutex<BinaryHeap<Reverse<Prioritized>>>,
    seq: AtomicU64,
    notify: Notify,
    stats: QueueStats,
}

impl InboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message and wake the consumer
    pub fn push(&self, item: Inbound) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.heap.lock().push(Reverse(Prioritized {
            priority: item.priority,
            seq,
            item,
        }));
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
    }

    /// Oldest message, if any
    pub fn try_pop(&self) -> Option<Inbound> {
        let popped = self.heap.lock().pop().map(|Reverse(p)| p.item);
        if popped.is_some() {
            self.stats.dequeued.fetch_add(1, Ordering::Relaxed);
        }
        popped
    }

    /// Resolves after the next push (or immediately if one happened unobserved)
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }
}

/// A job addressed to a worker
#[derive(Debug, Clone)]
pub struct Outbound {
    pub worker: WorkerId,
    pub frame: JobFrame,
}

/// FIFO of jobs to transmit, drained by several writer tasks
#[derive(Default)]
pub struct OutboundQueue {
    items: Mutex<VecDeque<Outbound>>,
    notify: Notify,
    stats: QueueStats,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: Outbound) {
        self.items.lock().push_back(item);
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
    }

    pub fn try_pop(&self) -> Option<Outbound> {
        let popped = self.items.lock().pop_front();
        if popped.is_some() {
            self.stats.dequeued.fetch_add(1, Ordering::Relaxed);
        }
        popped
    }

    /// Wait for the next item
    pub async fn pop(&self) -> Outbound {
        loop {
            if let Some(item) = self.try_pop() {
                return item;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }
}
