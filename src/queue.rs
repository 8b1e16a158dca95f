//! FIFO job queue shared by the gateway (producer) and workers (consumers).

use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::error::{RcaError, Result};
use crate::state_machine::QueueEntry;

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append to the tail. Never waits on consumers.
    async fn enqueue(&self, entry: QueueEntry) -> Result<()>;

    /// Wait until an entry is available and remove it. Each entry is handed
    /// to exactly one caller.
    async fn dequeue(&self) -> Result<QueueEntry>;

    /// Entries waiting to be dequeued.
    async fn len(&self) -> Result<usize>;

    /// Reachability probe for health checks.
    async fn ping(&self) -> Result<()>;
}

/// In-process queue. Consumers park on the channel receiver, so an idle
/// worker costs nothing while it waits.
pub struct MemoryQueue {
    tx: StdMutex<Option<UnboundedSender<QueueEntry>>>,
    rx: Mutex<UnboundedReceiver<QueueEntry>>,
    pending: AtomicUsize,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: StdMutex::new(Some(tx)),
            rx: Mutex::new(rx),
            pending: AtomicUsize::new(0),
        }
    }

    /// Stop accepting entries. Consumers drain what is left, then get
    /// `QueueUnavailable`.
    pub fn close(&self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
    }

    fn sender(&self) -> Result<UnboundedSender<QueueEntry>> {
        let guard = self
            .tx
            .lock()
            .map_err(|_| RcaError::QueueUnavailable("queue lock poisoned".into()))?;
        guard
            .clone()
            .ok_or_else(|| RcaError::QueueUnavailable("queue is closed".into()))
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, entry: QueueEntry) -> Result<()> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.sender().and_then(|tx| {
            tx.send(entry)
                .map_err(|_| RcaError::QueueUnavailable("queue is closed".into()))
        }) {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    async fn dequeue(&self) -> Result<QueueEntry> {
        // The receiver lock is held while parked; waiting consumers queue up
        // on the (fair) mutex and each receives a distinct entry.
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(entry) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                Ok(entry)
            }
            None => Err(RcaError::QueueUnavailable("queue is closed".into())),
        }
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.pending.load(Ordering::SeqCst))
    }

    async fn ping(&self) -> Result<()> {
        self.sender().map(|_| ())
    }
}
