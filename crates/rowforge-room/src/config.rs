//! Room and registry configuration, and the room state machine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RoomConfig
// ---------------------------------------------------------------------------

/// Settings shared by every room a registry creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Players per multiplayer room. Single-player rooms always hold one.
    pub capacity: usize,

    /// Length of the admission countdown, in ticks.
    pub admission_secs: u32,

    /// Announce the countdown every this many ticks.
    pub announce_every: u32,

    /// Announce every tick once this few remain.
    pub final_countdown: u32,

    /// Aging threshold for dynamic-priority queues.
    pub max_waiting_time: u32,

    /// Time between admission ticks.
    pub tick_interval: Duration,

    /// Buffer size of each room's event broadcast channel.
    pub event_buffer: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            capacity: 3,
            admission_secs: 60,
            announce_every: 10,
            final_countdown: 5,
            max_waiting_time: 3,
            tick_interval: Duration::from_secs(1),
            event_buffer: 32,
        }
    }
}

// ---------------------------------------------------------------------------
// RegistryConfig
// ---------------------------------------------------------------------------

/// Limits on the registry itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Rooms that may exist at once. Creating one more fails with
    /// `ResourceExhausted`.
    pub max_rooms: usize,

    /// Clients that may be connected at once.
    pub max_clients: usize,

    /// Registry command channel size.
    pub channel_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_rooms: 16,
            max_clients: 64,
            channel_size: 64,
        }
    }
}

// ---------------------------------------------------------------------------
// RoomStatus
// ---------------------------------------------------------------------------

/// The lifecycle state of a room.
///
/// ```text
/// Forming → Running → Finished → Deleted
///    └──────── cancel ────────────┘
/// ```
///
/// - **Forming**: multiplayer only. Accepting joins while the admission
///   countdown runs.
/// - **Running**: rounds are being played. No further joins.
/// - **Finished**: the board is complete and statistics are being
///   recorded.
/// - **Deleted**: gone from the registry. Also where a room ends up if
///   its countdown expires with nobody in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomStatus {
    Forming,
    Running,
    Finished,
    Deleted,
}

impl RoomStatus {
    /// Returns `true` if the room is accepting new players.
    pub fn is_joinable(&self) -> bool {
        matches!(self, Self::Forming)
    }

    /// The next state on the normal path, or `None` at the end.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Forming => Some(Self::Running),
            Self::Running => Some(Self::Finished),
            Self::Finished => Some(Self::Deleted),
            Self::Deleted => None,
        }
    }

    /// Returns `true` if moving to `target` is allowed: one step along
    /// the normal path, or straight from Forming to Deleted.
    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == Some(target) || (self == Self::Forming && target == Self::Deleted)
    }
}

impl std::fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forming => write!(f, "Forming"),
            Self::Running => write!(f, "Running"),
            Self::Finished => write!(f, "Finished"),
            Self::Deleted => write!(f, "Deleted"),
        }
    }
}
