//! Two-gate rendezvous for a room's participants.
//!
//! Every round runs between two gates:
//!
//! ```text
//!   start gate ──► critical work ──► end gate
//!   (all N in)                       (all N out)
//! ```
//!
//! Each gate counts arrivals and, when the last of the N participants
//! shows up, resets its count and bumps its **generation**. Waiters wait
//! for the generation to move past the one they arrived in, not for the
//! count to reach zero, so a slow departure from round `k` can never be
//! mistaken for an arrival in round `k + 1` even though the same barrier
//! is reused for all nine rows.

use std::fmt;
use std::sync::Mutex;

use tokio::sync::watch;

use crate::{lock, SyncError};

/// Which of the two gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gate {
    Start,
    End,
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::End => write!(f, "end"),
        }
    }
}

/// What a participant learns when its gate opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateRelease {
    /// The gate generation that just opened (1 for the first round).
    pub generation: u64,
    /// `true` for exactly one participant per opening: the one whose
    /// arrival (or withdrawal) completed the set.
    pub is_leader: bool,
}

#[derive(Debug, Default)]
struct GateCount {
    arrived: usize,
    generation: u64,
}

#[derive(Debug, Default)]
struct BarrierState {
    parties: usize,
    start: GateCount,
    end: GateCount,
}

impl BarrierState {
    fn gate_mut(&mut self, gate: Gate) -> &mut GateCount {
        match gate {
            Gate::Start => &mut self.start,
            Gate::End => &mut self.end,
        }
    }
}

/// The round-rendezvous barrier.
///
/// No timeouts: a participant that never arrives holds everyone. The
/// owner is expected to call [`withdraw`](Self::withdraw) when a
/// participant's connection fails.
pub struct TurnBarrier {
    state: Mutex<BarrierState>,
    start_opened: watch::Sender<u64>,
    end_opened: watch::Sender<u64>,
}

impl TurnBarrier {
    /// Creates a barrier for `parties` participants.
    pub fn new(parties: usize) -> Self {
        let (start_opened, _) = watch::channel(0);
        let (end_opened, _) = watch::channel(0);
        Self {
            state: Mutex::new(BarrierState {
                parties,
                ..BarrierState::default()
            }),
            start_opened,
            end_opened,
        }
    }

    /// Current participant count.
    pub fn parties(&self) -> usize {
        lock(&self.state).parties
    }

    /// Participants currently parked at `gate`.
    pub fn arrived(&self, gate: Gate) -> usize {
        lock(&self.state).gate_mut(gate).arrived
    }

    /// Generation of `gate`, i.e. how many times it has opened.
    pub fn generation(&self, gate: Gate) -> u64 {
        lock(&self.state).gate_mut(gate).generation
    }

    /// Resets the participant count. Only meaningful while nobody is
    /// waiting, e.g. when the room's roster is fixed at start.
    pub fn set_parties(&self, parties: usize) {
        let mut state = lock(&self.state);
        debug_assert!(state.start.arrived == 0 && state.end.arrived == 0);
        state.parties = parties;
    }

    /// Waits until all participants reach the start gate.
    pub async fn start_gate(&self) -> Result<GateRelease, SyncError> {
        self.arrive(Gate::Start, || {}).await
    }

    /// Waits until all participants reach the end gate.
    pub async fn end_gate(&self) -> Result<GateRelease, SyncError> {
        self.arrive(Gate::End, || {}).await
    }

    /// Like [`end_gate`](Self::end_gate), but the participant that opens
    /// the gate runs `on_open` before anyone is released. Use it for
    /// once-per-round bookkeeping such as advancing the current row.
    ///
    /// `on_open` runs under the barrier's lock and must not block or
    /// touch the barrier.
    pub async fn end_gate_with<F>(&self, on_open: F) -> Result<GateRelease, SyncError>
    where
        F: FnOnce(),
    {
        self.arrive(Gate::End, on_open).await
    }

    async fn arrive<F>(&self, gate: Gate, on_open: F) -> Result<GateRelease, SyncError>
    where
        F: FnOnce(),
    {
        let (generation, mut opened) = {
            let mut state = lock(&self.state);
            let parties = state.parties;
            if parties == 0 {
                return Err(SyncError::NoParticipants);
            }
            let count = state.gate_mut(gate);
            count.arrived += 1;
            if count.arrived >= parties {
                count.arrived = 0;
                count.generation += 1;
                let generation = count.generation;
                on_open();
                self.sender(gate).send_replace(generation);
                tracing::trace!(%gate, generation, "barrier gate opened");
                return Ok(GateRelease {
                    generation,
                    is_leader: true,
                });
            }
            (count.generation, self.sender(gate).subscribe())
        };

        let mut pending = PendingArrival {
            barrier: self,
            gate,
            generation,
            armed: true,
        };
        let opened_at = opened
            .wait_for(|g| *g > generation)
            .await
            .map(|g| *g)
            .map_err(|_| SyncError::Closed)?;
        pending.armed = false;

        Ok(GateRelease {
            generation: opened_at,
            is_leader: false,
        })
    }

    /// Removes one participant for good.
    ///
    /// If the remaining participants are all already parked at a gate,
    /// that gate opens. `on_open` is called once for every gate opened
    /// this way, so end-of-round bookkeeping still happens.
    pub fn withdraw<F>(&self, mut on_open: F) -> usize
    where
        F: FnMut(Gate),
    {
        let mut state = lock(&self.state);
        state.parties = state.parties.saturating_sub(1);
        let parties = state.parties;

        for gate in [Gate::Start, Gate::End] {
            let count = state.gate_mut(gate);
            if count.arrived > 0 && count.arrived >= parties {
                count.arrived = 0;
                count.generation += 1;
                let generation = count.generation;
                on_open(gate);
                self.sender(gate).send_replace(generation);
                tracing::debug!(%gate, generation, parties, "barrier gate opened by withdrawal");
            }
        }
        parties
    }

    fn sender(&self, gate: Gate) -> &watch::Sender<u64> {
        match gate {
            Gate::Start => &self.start_opened,
            Gate::End => &self.end_opened,
        }
    }
}

/// Undoes an arrival whose waiter was dropped before the gate opened.
struct PendingArrival<'a> {
    barrier: &'a TurnBarrier,
    gate: Gate,
    generation: u64,
    armed: bool,
}

impl Drop for PendingArrival<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = lock(&self.barrier.state);
        let count = state.gate_mut(self.gate);
        if count.generation == self.generation && count.arrived > 0 {
            count.arrived -= 1;
        }
    }
}
