//! Writer-preferring reader/writer lock.
//!
//! Readers share; a writer is exclusive. Once a writer starts waiting, no
//! new reader is admitted, so a stream of snapshot requests cannot starve
//! a row submission.

use std::pin::pin;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::lock;

#[derive(Debug, Default)]
struct RwState {
    readers: usize,
    writer_active: bool,
    writers_waiting: usize,
}

/// Point-in-time counters, mostly for tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RwStats {
    pub readers: usize,
    pub writer_active: bool,
    pub writers_waiting: usize,
}

/// The lock itself. Guards nothing by value; callers pair it with the data
/// they protect.
#[derive(Debug, Default)]
pub struct ReaderWriterLock {
    state: Mutex<RwState>,
    changed: Notify,
}

impl ReaderWriterLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for shared access.
    pub async fn read(&self) -> ReadGuard<'_> {
        loop {
            let mut notified = pin!(self.changed.notified());
            notified.as_mut().enable();
            {
                let mut state = lock(&self.state);
                if !state.writer_active && state.writers_waiting == 0 {
                    state.readers += 1;
                    return ReadGuard { lock: self };
                }
            }
            notified.await;
        }
    }

    /// Waits for exclusive access.
    pub async fn write(&self) -> WriteGuard<'_> {
        lock(&self.state).writers_waiting += 1;
        let mut waiting = WaitingWriter {
            lock: self,
            armed: true,
        };

        loop {
            let mut notified = pin!(self.changed.notified());
            notified.as_mut().enable();
            {
                let mut state = lock(&self.state);
                if !state.writer_active && state.readers == 0 {
                    state.writers_waiting -= 1;
                    state.writer_active = true;
                    waiting.armed = false;
                    return WriteGuard { lock: self };
                }
            }
            notified.await;
        }
    }

    pub fn stats(&self) -> RwStats {
        let state = lock(&self.state);
        RwStats {
            readers: state.readers,
            writer_active: state.writer_active,
            writers_waiting: state.writers_waiting,
        }
    }
}

/// Shared access; released on drop.
#[must_use = "access is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ReadGuard<'a> {
    lock: &'a ReaderWriterLock,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        let last = {
            let mut state = lock(&self.lock.state);
            state.readers -= 1;
            state.readers == 0
        };
        if last {
            self.lock.changed.notify_waiters();
        }
    }
}

/// Exclusive access; released on drop.
#[must_use = "access is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct WriteGuard<'a> {
    lock: &'a ReaderWriterLock,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        lock(&self.lock.state).writer_active = false;
        self.lock.changed.notify_waiters();
    }
}

/// Withdraws a writer's place in line if its `write()` future is dropped.
struct WaitingWriter<'a> {
    lock: &'a ReaderWriterLock,
    armed: bool,
}

impl Drop for WaitingWriter<'_> {
    fn drop(&mut self) {
        if self.armed {
            lock(&self.lock.state).writers_waiting -= 1;
            // Readers held back by this writer may go now.
            self.lock.changed.notify_waiters();
        }
    }
}
