//! Bounded outbound queue for streamed metric records.
//!
//! The control loop publishes one [`MetricsRecord`] per tick and must never
//! block on a slow consumer. The queue is a tokio broadcast channel: when
//! it is full the oldest unread record is overwritten. The queue keeps its
//! own receiver so a single polling consumer (the stream drain task, or a
//! status endpoint) can pop records without subscribing first, while
//! additional subscribers get independent cursors.

use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicU64, Ordering};

use signal_types::MetricsRecord;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

/// Default capacity when none is configured.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Bounded, lossy, non-blocking record queue.
#[derive(Debug)]
pub struct OutboundQueue {
    tx: broadcast::Sender<MetricsRecord>,
    rx: Mutex<broadcast::Receiver<MetricsRecord>>,
    dropped: AtomicU64,
}

impl OutboundQueue {
    /// Create a queue holding `capacity` unread records, rounded up to a
    /// power of two by the channel. A zero capacity is bumped to 1.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
            dropped: AtomicU64::new(0),
        }
    }

    /// Push a record, overwriting the oldest unread one if full.
    ///
    /// Never blocks. Returns the number of receivers that will see it.
    pub fn publish(&self, record: MetricsRecord) -> usize {
        // The queue's own receiver keeps the channel open, so send only
        // fails after every receiver is gone.
        self.tx.send(record).unwrap_or(0)
    }

    /// Pop the oldest unread record, if any.
    ///
    /// Records overwritten while unread are counted in [`dropped`].
    ///
    /// [`dropped`]: Self::dropped
    pub fn try_pop(&self) -> Option<MetricsRecord> {
        let mut rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            match rx.try_recv() {
                Ok(record) => return Some(record),
                Err(TryRecvError::Lagged(skipped)) => {
                    self.dropped.fetch_add(skipped, Ordering::Relaxed);
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Pop up to `max` records in order.
    pub fn drain(&self, max: usize) -> Vec<MetricsRecord> {
        let mut out = Vec::new();
        while out.len() < max {
            match self.try_pop() {
                Some(record) => out.push(record),
                None => break,
            }
        }
        out
    }

    /// Independent receiver seeing every record published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<MetricsRecord> {
        self.tx.subscribe()
    }

    /// Records overwritten before the queue's own consumer read them.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
