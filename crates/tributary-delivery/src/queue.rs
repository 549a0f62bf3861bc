//! Bounded FIFO work queue with in-flight accounting.
//!
//! Producers suspend in [`BoundedQueue::submit`] while the queue is full;
//! consumers suspend in [`BoundedQueue::claim`] while it is empty. A claimed
//! item frees its slot immediately but stays counted as *pending* until the
//! consumer acknowledges it, which is what [`BoundedQueue::drain_wait`]
//! synchronizes on during shutdown.
//!
//! ```text
//!   submit ──▶ [ free_slots ] ──▶ items ──▶ [ ready ] ──▶ claim ──▶ acknowledge
//!                   ▲                                       │
//!                   └──────────── slot released ────────────┘
//!
//!   pending = queued + claimed-but-unacknowledged      drain_wait: pending == 0
//! ```

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use tokio::sync::{watch, Semaphore};
use tracing::{debug, warn};

use crate::error::{DeliveryError, Result};

/// Fixed-capacity FIFO shared between producers and consumer workers.
///
/// Capacity bounds the number of queued (unclaimed) items. Both semaphores
/// are only ever adjusted together with the item buffer, so the permit counts
/// and the buffer length never disagree by more than one in-progress call.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    free_slots: Semaphore,
    ready: Semaphore,
    pending: watch::Sender<usize>,
    capacity: usize,
    closed: AtomicBool,
}

impl<T> BoundedQueue<T> {
    /// Creates an empty queue holding at most `capacity` unclaimed items.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if `capacity` is zero or exceeds the
    /// semaphore permit limit.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(DeliveryError::configuration("queue capacity must be greater than 0"));
        }
        if capacity > Semaphore::MAX_PERMITS {
            return Err(DeliveryError::configuration(format!(
                "queue capacity must not exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }

        let (pending, _) = watch::channel(0);
        Ok(Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            free_slots: Semaphore::new(capacity),
            ready: Semaphore::new(0),
            pending,
            capacity,
            closed: AtomicBool::new(false),
        })
    }

    /// Enqueues `item`, suspending until a slot is free.
    ///
    /// The item counts as pending from the moment the call starts waiting, so
    /// a concurrent [`drain_wait`](Self::drain_wait) cannot complete while a
    /// submission is still racing for a slot.
    ///
    /// The call is cancel-safe: if the future is dropped before the item is
    /// enqueued, the pending count is restored and nothing is queued.
    ///
    /// # Errors
    ///
    /// Returns `QueueClosed` if the queue was closed before or while waiting.
    pub async fn submit(&self, item: T) -> Result<()> {
        if self.is_closed() {
            return Err(DeliveryError::QueueClosed);
        }

        let reservation = PendingReservation::new(self);
        self.free_slots.acquire().await.map_err(|_| DeliveryError::QueueClosed)?.forget();

        self.lock_items().push_back(item);
        self.ready.add_permits(1);
        reservation.commit();
        Ok(())
    }

    /// Takes the oldest item, suspending until one is available.
    ///
    /// Returns `None` only after [`terminate`](Self::terminate). The call is
    /// cancel-safe: dropping the future before it resolves claims nothing.
    pub async fn claim(&self) -> Option<T> {
        self.ready.acquire().await.ok()?.forget();
        self.take_claimed()
    }

    /// Takes the oldest item if one is immediately available.
    pub fn try_claim(&self) -> Option<T> {
        self.ready.try_acquire().ok()?.forget();
        self.take_claimed()
    }

    /// Marks `count` claimed items as fully processed.
    pub fn acknowledge(&self, count: usize) {
        self.release_pending(count);
    }

    /// Waits until nothing is queued and every claimed item is acknowledged.
    pub async fn drain_wait(&self) {
        let mut pending = self.pending.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = pending.wait_for(|pending| *pending == 0).await;
    }

    /// Stops accepting submissions.
    ///
    /// Submitters currently waiting for a slot fail with `QueueClosed`.
    /// Items already queued stay claimable so the queue can still drain.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(queued = self.len(), pending = self.pending(), "closing work queue");
        }
        self.free_slots.close();
    }

    /// Closes the queue and wakes every waiting consumer with `None`.
    ///
    /// Used for abrupt teardown; queued items are abandoned.
    pub fn terminate(&self) {
        self.close();
        self.ready.close();
    }

    /// Whether submissions are rejected.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of queued, unclaimed items.
    pub fn len(&self) -> usize {
        self.lock_items().len()
    }

    /// Whether no unclaimed items are queued.
    pub fn is_empty(&self) -> bool {
        self.lock_items().is_empty()
    }

    /// Queued plus claimed-but-unacknowledged items.
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Maximum number of queued items.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn take_claimed(&self) -> Option<T> {
        let item = self.lock_items().pop_front();
        if item.is_some() {
            self.free_slots.add_permits(1);
        }
        item
    }

    fn release_pending(&self, count: usize) {
        let mut over_acknowledged = false;
        self.pending.send_modify(|pending| {
            over_acknowledged = count > *pending;
            *pending = pending.saturating_sub(count);
        });

        if over_acknowledged {
            warn!(count, "acknowledged more items than were pending");
        }
    }

    fn lock_items(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One pending slot held by an in-progress submit.
///
/// Released on drop unless committed, so a submit that fails or is cancelled
/// while waiting never leaves `drain_wait` stuck.
struct PendingReservation<'a, T> {
    queue: &'a BoundedQueue<T>,
    committed: bool,
}

impl<'a, T> PendingReservation<'a, T> {
    fn new(queue: &'a BoundedQueue<T>) -> Self {
        queue.pending.send_modify(|pending| *pending += 1);
        Self { queue, committed: false }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl<T> Drop for PendingReservation<'_, T> {
    fn drop(&mut self) {
        if !self.committed {
            self.queue.release_pending(1);
        }
    }
}
