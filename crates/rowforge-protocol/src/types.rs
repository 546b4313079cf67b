//! Identity and room-option types shared by every layer.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique identifier for a connected client.
///
/// Newtype over `u64` so a `ClientId` can never be passed where a
/// `RoomId` is expected. Serialized as the bare number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C-{}", self.0)
    }
}

/// A unique identifier for a room (one shared board session).
///
/// Room IDs are handed out by the registry in increasing order and are
/// never reused for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R-{}", self.0)
    }
}

/// Identifies a puzzle in the puzzle store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(pub u64);

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Room options
// ---------------------------------------------------------------------------

/// Whether a room is played alone or shared.
///
/// A `SinglePlayer` room skips admission entirely: it starts running on
/// its one and only join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum GameMode {
    SinglePlayer,
    MultiPlayer,
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SinglePlayer => write!(f, "SinglePlayer"),
            Self::MultiPlayer => write!(f, "MultiPlayer"),
        }
    }
}

/// Service order for a wait queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum QueueOrder {
    /// Strict arrival order. The premium flag is ignored.
    #[default]
    Fifo,
    /// Premium entries always precede non-premium ones.
    StaticPriority,
    /// Premium precedence, but long waiters are promoted to the front.
    DynamicPriority,
}

impl fmt::Display for QueueOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fifo => write!(f, "Fifo"),
            Self::StaticPriority => write!(f, "StaticPriority"),
            Self::DynamicPriority => write!(f, "DynamicPriority"),
        }
    }
}

/// The concurrency policy a multiplayer room uses for its board.
///
/// Serialized adjacently tagged, e.g.
/// `{ "kind": "BarberShop", "order": "StaticPriority" }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "order")]
pub enum DisciplinePolicy {
    /// Concurrent readers, exclusive writers, writers preferred.
    #[default]
    ReaderWriter,
    /// One client at a time, served from a queue in the given order.
    BarberShop(QueueOrder),
}

impl DisciplinePolicy {
    /// The queue ordering the room's queues should use.
    ///
    /// Reader-writer rooms have no service queue of their own, so their
    /// entry queue falls back to FIFO.
    pub fn queue_order(&self) -> QueueOrder {
        match self {
            Self::ReaderWriter => QueueOrder::Fifo,
            Self::BarberShop(order) => *order,
        }
    }
}

impl fmt::Display for DisciplinePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReaderWriter => write!(f, "ReaderWriter"),
            Self::BarberShop(order) => write!(f, "BarberShop({order})"),
        }
    }
}
