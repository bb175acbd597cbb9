//! Bounded admission queue.
//!
//! Built on a FIFO-fair semaphore: callers are admitted in arrival order and
//! a slot is returned when its [`QueueSlot`] is dropped.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use switchyard_core::{
    config::{QueueConfig, MAX_QUEUE_SIZE},
    Error, Result,
};

/// An admission slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct QueueSlot {
    _permit: OwnedSemaphorePermit,
}

/// Limits how many requests are in the pipeline at once.
pub struct RequestQueue {
    semaphore: Arc<Semaphore>,
    max_size: usize,
    closed: AtomicBool,
    waiting: Arc<AtomicUsize>,
}

impl RequestQueue {
    /// Queue of `max_size` slots, clamped to `1..=MAX_QUEUE_SIZE`.
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.clamp(1, MAX_QUEUE_SIZE);
        Self {
            semaphore: Arc::new(Semaphore::new(max_size)),
            max_size,
            closed: AtomicBool::new(false),
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(config.max_size)
    }

    /// Wait for a slot in FIFO order.
    ///
    /// Fails `Backpressure` if the queue is closed or `cancel` fires first.
    pub async fn enqueue(&self, cancel: &CancellationToken) -> Result<QueueSlot> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Backpressure("queue is closed".into()));
        }

        let _waiting = WaitingGuard::enter(self.waiting.clone());
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Cancelled while waiting for a queue slot");
                Err(Error::Backpressure("cancelled while waiting for a queue slot".into()))
            }
            permit = self.semaphore.clone().acquire_owned() => permit
                .map(|permit| QueueSlot { _permit: permit })
                .map_err(|_| Error::Backpressure("queue is closed".into())),
        }
    }

    /// Release a slot.
    pub fn dequeue(&self, slot: QueueSlot) {
        drop(slot);
    }

    /// Stop admitting and wait until every admitted slot has been released.
    /// Later calls return immediately.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let permits = u32::try_from(self.max_size).unwrap_or(u32::MAX);
        if let Ok(all) = self.semaphore.acquire_many(permits).await {
            self.semaphore.close();
            drop(all);
            tracing::info!("Request queue drained and closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Slots currently held.
    pub fn in_flight(&self) -> usize {
        if self.semaphore.is_closed() {
            return 0;
        }
        self.max_size - self.semaphore.available_permits()
    }

    /// Callers currently waiting for a slot.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }
}

struct WaitingGuard(Arc<AtomicUsize>);

impl WaitingGuard {
    fn enter(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
