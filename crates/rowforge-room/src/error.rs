//! Error types for the room layer.

use rowforge_protocol::{ClientId, GameId, RoomId};
use rowforge_sync::SyncError;

/// Errors that can occur during room and registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The registry is at its room or client limit.
    #[error("registry limit reached: {0}")]
    ResourceExhausted(String),

    /// The room already holds `capacity` clients.
    #[error("room {0} is full")]
    RoomFull(RoomId),

    /// The room left admission before the join landed.
    #[error("room {0} is already running")]
    RoomAlreadyRunning(RoomId),

    /// The room does not exist.
    #[error("room {0} not found")]
    NotFound(RoomId),

    /// The client is not registered.
    #[error("client {0} not found")]
    ClientNotFound(ClientId),

    /// The client is not part of this room.
    #[error("client {0} not in room {1}")]
    NotInRoom(ClientId, RoomId),

    /// The room is in a state that doesn't allow this operation.
    #[error("invalid room state for this operation: {0}")]
    InvalidState(String),

    /// The room was closed, or the registry stopped, while the caller
    /// was waiting on it.
    #[error("room {0} is unavailable")]
    Unavailable(RoomId),

    #[error("registry is unavailable")]
    RegistryUnavailable,

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors reported by a [`PuzzleStore`](crate::PuzzleStore).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("game {0} not found")]
    GameNotFound(GameId),

    /// The store has no puzzles to pick from.
    #[error("puzzle store is empty")]
    Empty,

    /// A statistics write failed. Best effort: callers log it and go on.
    #[error("failed to persist statistics: {0}")]
    Persistence(String),

    /// Puzzle data could not be parsed.
    #[error("malformed puzzle data: {0}")]
    Malformed(String),
}
