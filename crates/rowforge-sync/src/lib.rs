//! Room concurrency primitives for Rowforge.
//!
//! Every shared resource inside a room is guarded by one of the types in
//! this crate. Each one is independently testable and knows nothing about
//! rooms or boards:
//!
//! - [`WaitQueue`]: bounded blocking queue with FIFO, static-priority, or
//!   aging service order
//! - [`TurnBarrier`]: two-gate rendezvous that keeps a room's clients in
//!   lockstep, one round at a time
//! - [`AccessDiscipline`]: the board access policy: a writer-preferring
//!   [`ReaderWriterLock`] or a single-chair [`BarberShop`]
//! - [`LogPipeline`]: many producers, one consumer, bounded buffer
//!
//! # Release guarantees
//!
//! Every `enter`/`arrive`/`enqueue` either completes or leaves no trace.
//! Guards release on drop, and a future dropped mid-wait (the owning
//! connection died) undoes its own bookkeeping.

mod barrier;
mod discipline;
mod error;
mod log;
mod wait_queue;

pub use barrier::{Gate, GateRelease, TurnBarrier};
pub use discipline::{
    AccessDiscipline, AccessMode, BarberShop, ChairGuard, CriticalAccess, ReadGuard,
    ReaderWriterLock, RwStats, WriteGuard,
};
pub use error::{SinkError, SyncError};
pub use log::{JsonLinesSink, LogEvent, LogPipeline, LogProducer, LogSink, LogSubject, MemorySink};
pub use wait_queue::{QueuePolicy, WaitQueue, WaitQueueEntry};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a std mutex, recovering the data if a holder panicked.
///
/// Every critical section in this crate is a handful of counter updates
/// that leave the state consistent at each step, so a poisoned lock is
/// still safe to use.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
