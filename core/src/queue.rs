//! Background priority queue feeding `publish_async`.
//!
//! Lower priority values are served first; equal values keep enqueue order.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::event::Event;

struct Queued {
    priority: i32,
    seq: u64,
    event: Event,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

// BinaryHeap is a max-heap: invert so the smallest (priority, seq) pops first.
impl Ord for Queued {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub(crate) struct EventQueue {
    heap: Mutex<BinaryHeap<Queued>>,
    seq: AtomicU64,
    notify: Notify,
}

impl EventQueue {
    pub(crate) fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    fn push(&self, event: Event, priority: i32) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        self.heap
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Queued { priority, seq, event });
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Event> {
        self.heap
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .map(|q| q.event)
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub(crate) fn clear(&self) -> usize {
        let mut heap = self.heap.lock().unwrap_or_else(PoisonError::into_inner);
        let n = heap.len();
        heap.clear();
        n
    }

    pub(crate) fn wake(&self) {
        self.notify.notify_waiters();
        self.notify.notify_one();
    }
}

impl EventBus {
    /// Queues an envelope for the background worker.
    pub fn enqueue(&self, event: Event, priority: i32) {
        if !self.is_running() {
            warn!(target: "event_bus", kind = %event.kind(), "Event bus is not running, skipping enqueue");
            return;
        }
        debug!(target: "event_bus", kind = %event.kind(), priority, "Queueing event");
        self.queue.push(event, priority);
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Spawns the task that drains the queue through `publish_async` until the
    /// bus shuts down. Call after `start()`; one worker per bus.
    pub fn spawn_queue_worker(self: &Arc<Self>) -> JoinHandle<()> {
        let bus = Arc::clone(self);
        tokio::spawn(async move {
            info!(target: "event_bus", "Queue worker started");
            while bus.is_running() {
                match bus.queue.pop() {
                    Some(event) => bus.publish_async(event).await,
                    None => bus.queue.notify.notified().await,
                }
            }
            info!(target: "event_bus", "Queue worker stopped");
        })
    }
}
