//! Admission driver: the per-room timer task of a forming room.

use std::sync::Arc;

use rowforge_tick::{TickConfig, TickScheduler};
use tokio::task::JoinHandle;

use crate::{Room, TickOutcome};

/// Drives a forming room's countdown.
///
/// Ticks the room once per interval and whenever the room signals it is
/// full, until the room starts or is cancelled. Dropping the driver
/// stops the task.
pub struct AdmissionDriver {
    task: JoinHandle<TickOutcome>,
}

impl AdmissionDriver {
    /// Spawns the driver task for `room`.
    pub fn spawn(room: Arc<Room>, config: TickConfig) -> Self {
        let task = tokio::spawn(run(room, config));
        Self { task }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the driver to exit and returns the tick that ended
    /// admission.
    pub async fn join(mut self) -> Option<TickOutcome> {
        (&mut self.task).await.ok()
    }
}

impl Drop for AdmissionDriver {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(room: Arc<Room>, config: TickConfig) -> TickOutcome {
    let room_id = room.room_id();
    let mut scheduler = TickScheduler::new(config);
    tracing::debug!(%room_id, interval_ms = scheduler.interval().as_millis(), "admission started");

    loop {
        // A wake-up only checks for a full room; the countdown moves on
        // ticks alone.
        let outcome = tokio::select! {
            _ = room.woken() => room.check_admission().await,
            _ = scheduler.wait_for_tick() => room.tick().await,
        };

        match outcome {
            TickOutcome::Counting { remaining, announced } => {
                if announced {
                    tracing::debug!(%room_id, remaining, "admission countdown");
                }
            }
            outcome => {
                tracing::debug!(
                    %room_id,
                    ?outcome,
                    ticks = scheduler.tick_count(),
                    "admission ended"
                );
                return outcome;
            }
        }
    }
}
