//! Bounded blocking queue with pluggable service order.
//!
//! Capacity is enforced with two counting semaphores, empty slots and
//! filled slots, around an exclusive lock on the entries themselves:
//!
//! ```text
//! enqueue: acquire(empty) → lock → push → release(filled)
//! dequeue: acquire(filled) → lock → pop  → release(empty)
//! ```
//!
//! Entries live in three lanes served in order: `promoted` (aged out,
//! dynamic priority only), `premium`, `standard`. Under
//! [`QueueOrder::Fifo`] everything goes to `standard`, so premium is
//! ignored.

use std::collections::VecDeque;
use std::sync::Mutex;

use rowforge_protocol::{ClientId, QueueOrder};
use tokio::sync::{Semaphore, TryAcquireError};

use crate::{lock, SyncError};

/// Service order plus the aging threshold used by
/// [`QueueOrder::DynamicPriority`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePolicy {
    pub order: QueueOrder,
    /// Enqueue events an entry may sit through before it is promoted to
    /// the front. Ignored by the other orders. Clamped to at least 1.
    pub max_waiting_time: u32,
}

impl QueuePolicy {
    /// Default aging threshold.
    pub const DEFAULT_MAX_WAITING_TIME: u32 = 3;

    pub fn fifo() -> Self {
        Self::new(QueueOrder::Fifo)
    }

    pub fn new(order: QueueOrder) -> Self {
        Self {
            order,
            max_waiting_time: Self::DEFAULT_MAX_WAITING_TIME,
        }
    }

    pub fn with_max_waiting_time(mut self, ticks: u32) -> Self {
        self.max_waiting_time = ticks.max(1);
        self
    }
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self::fifo()
    }
}

/// One queued client. Owned by the queue until it is dequeued or removed.
#[derive(Debug)]
pub struct WaitQueueEntry<T> {
    pub client_id: ClientId,
    pub premium: bool,
    /// Enqueue events this entry has sat through.
    pub wait_ticks: u32,
    pub item: T,
}

struct Lanes<T> {
    promoted: VecDeque<WaitQueueEntry<T>>,
    premium: VecDeque<WaitQueueEntry<T>>,
    standard: VecDeque<WaitQueueEntry<T>>,
}

impl<T> Lanes<T> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            promoted: VecDeque::new(),
            premium: VecDeque::with_capacity(capacity),
            standard: VecDeque::with_capacity(capacity),
        }
    }

    fn len(&self) -> usize {
        self.promoted.len() + self.premium.len() + self.standard.len()
    }

    fn push(&mut self, entry: WaitQueueEntry<T>, order: QueueOrder) {
        match order {
            QueueOrder::Fifo => self.standard.push_back(entry),
            QueueOrder::StaticPriority | QueueOrder::DynamicPriority => {
                if entry.premium {
                    self.premium.push_back(entry);
                } else {
                    self.standard.push_back(entry);
                }
            }
        }
    }

    fn pop(&mut self) -> Option<WaitQueueEntry<T>> {
        self.promoted
            .pop_front()
            .or_else(|| self.premium.pop_front())
            .or_else(|| self.standard.pop_front())
    }

    /// Bumps every resident entry's wait count and moves the ones that
    /// reached `max` to the promoted lane, preserving service order.
    fn age(&mut self, max: u32) -> usize {
        for entry in &mut self.promoted {
            entry.wait_ticks = entry.wait_ticks.saturating_add(1);
        }
        promote(&mut self.premium, &mut self.promoted, max)
            + promote(&mut self.standard, &mut self.promoted, max)
    }

    fn remove(&mut self, client_id: ClientId) -> Option<WaitQueueEntry<T>> {
        for lane in [&mut self.promoted, &mut self.premium, &mut self.standard] {
            if let Some(pos) = lane.iter().position(|e| e.client_id == client_id) {
                return lane.remove(pos);
            }
        }
        None
    }

    fn service_order(&self) -> Vec<ClientId> {
        self.promoted
            .iter()
            .chain(&self.premium)
            .chain(&self.standard)
            .map(|e| e.client_id)
            .collect()
    }
}

fn promote<T>(
    lane: &mut VecDeque<WaitQueueEntry<T>>,
    promoted: &mut VecDeque<WaitQueueEntry<T>>,
    max: u32,
) -> usize {
    let mut moved = 0;
    let mut kept = VecDeque::with_capacity(lane.len());
    for mut entry in lane.drain(..) {
        entry.wait_ticks = entry.wait_ticks.saturating_add(1);
        if entry.wait_ticks >= max {
            promoted.push_back(entry);
            moved += 1;
        } else {
            kept.push_back(entry);
        }
    }
    *lane = kept;
    moved
}

/// A bounded queue of waiting clients.
///
/// `enqueue` blocks while the queue is full and `dequeue` blocks while it
/// is empty. Both are cancellation-safe: no `.await` sits between taking
/// a slot permit and touching the entries.
pub struct WaitQueue<T> {
    policy: QueuePolicy,
    capacity: usize,
    empty_slots: Semaphore,
    filled_slots: Semaphore,
    lanes: Mutex<Lanes<T>>,
}

impl<T> WaitQueue<T> {
    /// Creates a queue with `capacity` slots (at least one).
    pub fn new(capacity: usize, policy: QueuePolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            policy,
            capacity,
            empty_slots: Semaphore::new(capacity),
            filled_slots: Semaphore::new(0),
            lanes: Mutex::new(Lanes::with_capacity(capacity)),
        }
    }

    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries currently held.
    pub fn len(&self) -> usize {
        lock(&self.lanes).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Client IDs in the order they would be served right now.
    pub fn service_order(&self) -> Vec<ClientId> {
        lock(&self.lanes).service_order()
    }

    /// Adds a client, waiting for a free slot if the queue is full.
    ///
    /// # Errors
    /// [`SyncError::Closed`] if the queue is closed while waiting.
    pub async fn enqueue(
        &self,
        client_id: ClientId,
        premium: bool,
        item: T,
    ) -> Result<(), SyncError> {
        let permit = self
            .empty_slots
            .acquire()
            .await
            .map_err(|_| SyncError::Closed)?;
        permit.forget();
        self.push(client_id, premium, item);
        Ok(())
    }

    /// Adds a client without waiting.
    ///
    /// # Errors
    /// [`SyncError::QueueFull`] when no slot is free, [`SyncError::Closed`]
    /// after [`close`](Self::close).
    pub fn try_enqueue(
        &self,
        client_id: ClientId,
        premium: bool,
        item: T,
    ) -> Result<(), SyncError> {
        match self.empty_slots.try_acquire() {
            Ok(permit) => permit.forget(),
            Err(TryAcquireError::NoPermits) => {
                return Err(SyncError::QueueFull(self.capacity));
            }
            Err(TryAcquireError::Closed) => return Err(SyncError::Closed),
        }
        self.push(client_id, premium, item);
        Ok(())
    }

    fn push(&self, client_id: ClientId, premium: bool, item: T) {
        let entry = WaitQueueEntry {
            client_id,
            premium,
            wait_ticks: 0,
            item,
        };
        let promoted = {
            let mut lanes = lock(&self.lanes);
            let promoted = match self.policy.order {
                QueueOrder::DynamicPriority => lanes.age(self.policy.max_waiting_time),
                QueueOrder::Fifo | QueueOrder::StaticPriority => 0,
            };
            lanes.push(entry, self.policy.order);
            promoted
        };
        self.filled_slots.add_permits(1);

        if promoted > 0 {
            tracing::debug!(promoted, %client_id, "aged entries promoted to queue front");
        }
        tracing::trace!(%client_id, premium, "enqueued");
    }

    /// Removes the next client in service order, waiting while empty.
    ///
    /// Returns `Ok(None)` when a filled-slot permit was obtained but the
    /// entry it stood for had already been [`remove`](Self::remove)d.
    /// Callers must check for it.
    ///
    /// # Errors
    /// [`SyncError::Closed`] if the queue is closed while waiting.
    pub async fn dequeue(&self) -> Result<Option<WaitQueueEntry<T>>, SyncError> {
        let permit = self
            .filled_slots
            .acquire()
            .await
            .map_err(|_| SyncError::Closed)?;
        permit.forget();
        Ok(self.pop())
    }

    /// Removes the next client if one is immediately available.
    pub fn try_dequeue(&self) -> Option<WaitQueueEntry<T>> {
        match self.filled_slots.try_acquire() {
            Ok(permit) => {
                permit.forget();
                self.pop()
            }
            Err(_) => None,
        }
    }

    fn pop(&self) -> Option<WaitQueueEntry<T>> {
        let entry = lock(&self.lanes).pop();
        self.empty_slots.add_permits(1);
        if entry.is_none() {
            tracing::debug!("dequeue found no client");
        }
        entry
    }

    /// Pulls a specific client out of the queue, e.g. after its
    /// connection dropped.
    pub fn remove(&self, client_id: ClientId) -> Option<WaitQueueEntry<T>> {
        let entry = lock(&self.lanes).remove(client_id)?;
        // If no filled permit is left, a dequeuer already holds the one
        // for this entry; it will come up empty and free the slot itself.
        if let Ok(permit) = self.filled_slots.try_acquire() {
            permit.forget();
            self.empty_slots.add_permits(1);
        }
        tracing::debug!(%client_id, "removed from wait queue");
        Some(entry)
    }

    /// Wakes every blocked `enqueue`/`dequeue` with [`SyncError::Closed`].
    /// Entries still queued stay where they are.
    pub fn close(&self) {
        self.empty_slots.close();
        self.filled_slots.close();
    }

    pub fn is_closed(&self) -> bool {
        self.filled_slots.is_closed()
    }
}
