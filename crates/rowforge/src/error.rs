//! Unified error type for Rowforge.

use rowforge_protocol::ProtocolError;
use rowforge_room::{RoomError, StoreError};
use rowforge_sync::{SinkError, SyncError};
use rowforge_transport::TransportError;

/// Top-level error that wraps every crate-specific error.
///
/// The `#[from]` conversions let `?` lift a sub-crate error into this one.
#[derive(Debug, thiserror::Error)]
pub enum RowforgeError {
    /// Connection, send, or receive failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Encode, decode, or malformed input.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Room full, not found, wrong state, and the like.
    #[error(transparent)]
    Room(#[from] RoomError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    /// The audit log sink could not be opened.
    #[error(transparent)]
    Log(#[from] SinkError),
}

impl From<StoreError> for RowforgeError {
    fn from(err: StoreError) -> Self {
        Self::Room(RoomError::Store(err))
    }
}
