//! Bounded multi-producer, single-consumer queue.
//!
//! A thin adapter over a bounded [`tokio::sync::mpsc`] channel. Producers wait in
//! [`BoundedQueue::push`] while the channel is full, which slows their network poll cadence
//! to whatever the consumer can write. The consumer waits at most a caller-supplied timeout
//! in [`BoundedQueue::try_pop`].
//!
//! Once [`BoundedQueue::mark_complete`] is called no further push succeeds, but items
//! already queued stay poppable. `try_pop` reports [`Popped::Closed`] only when the
//! queue is both complete and empty, which is the consumer's signal to stop.
//!
//! FIFO holds per producer. Items from different producers interleave in enqueue order.

use crate::error::{IngestError, IngestResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Outcome of a timed pop.
#[derive(Debug, PartialEq, Eq)]
pub enum Popped<T> {
    /// An item was dequeued.
    Item(T),
    /// Nothing arrived before the timeout; the queue is still open.
    Empty,
    /// The queue is complete and fully drained.
    Closed,
}

/// The queue contract producers and the consumer are written against.
#[async_trait]
pub trait BoundedChannel<T: Send>: Send + Sync {
    /// Enqueue, waiting for room while full. Fails with [`IngestError::QueueClosed`]
    /// once the queue is complete.
    async fn push(&self, item: T) -> IngestResult<()>;

    /// Dequeue, waiting up to `timeout` for an item.
    async fn try_pop(&self, timeout: Duration) -> Popped<T>;

    /// Stop accepting items. Idempotent.
    fn mark_complete(&self);

    fn is_completed(&self) -> bool;
}

/// Fixed-capacity FIFO over an mpsc channel.
///
/// ```
/// use sensor_ingest::queue::{BoundedChannel, BoundedQueue, Popped};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let queue = BoundedQueue::new(2);
/// queue.push("a").await.unwrap();
/// queue.mark_complete();
///
/// assert!(queue.push("b").await.is_err());
/// assert_eq!(queue.try_pop(Duration::from_millis(10)).await, Popped::Item("a"));
/// assert_eq!(queue.try_pop(Duration::from_millis(10)).await, Popped::Closed);
/// # });
/// ```
pub struct BoundedQueue<T> {
    // Never dropped, so the channel stays open; completion is signalled by `completed`.
    sender: mpsc::Sender<T>,
    receiver: Mutex<mpsc::Receiver<T>>,
    completed: CancellationToken,
}

impl<T> BoundedQueue<T> {
    /// Capacity is fixed for the lifetime of the queue. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Mutex::new(receiver),
            completed: CancellationToken::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }

    /// Items currently buffered. Producers parked in `push` are not counted.
    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl<T: Send> BoundedChannel<T> for BoundedQueue<T> {
    async fn push(&self, item: T) -> IngestResult<()> {
        // Completion is checked first on every poll, so nothing is enqueued after it.
        tokio::select! {
            biased;
            _ = self.completed.cancelled() => Err(IngestError::QueueClosed),
            sent = self.sender.send(item) => sent.map_err(|_| IngestError::QueueClosed),
        }
    }

    async fn try_pop(&self, timeout: Duration) -> Popped<T> {
        let popped = tokio::time::timeout(timeout, async {
            let mut receiver = self.receiver.lock().await;
            tokio::select! {
                biased;
                item = receiver.recv() => item.map_or(Popped::Closed, Popped::Item),
                _ = self.completed.cancelled() => match receiver.try_recv() {
                    Ok(item) => Popped::Item(item),
                    Err(_) => Popped::Closed,
                },
            }
        })
        .await;
        popped.unwrap_or(Popped::Empty)
    }

    fn mark_complete(&self) {
        // Parked producers fail with QueueClosed, a waiting consumer re-checks and drains.
        self.completed.cancel();
    }

    fn is_completed(&self) -> bool {
        self.completed.is_cancelled()
    }
}
