//! # Rowforge
//!
//! A multiplayer sudoku server. Clients share one board per room and solve
//! it a row at a time: every round starts and ends together, and board
//! access follows the room's discipline (reader-writer or barber shop).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use rowforge::prelude::*;
//!
//! # async fn run() -> Result<(), RowforgeError> {
//! let server = RowforgeServer::builder()
//!     .bind("0.0.0.0:7000")
//!     .build_tcp(Arc::new(MemoryPuzzleStore::with_builtin()))
//!     .await?;
//! server.run().await
//! # }
//! ```

mod error;
mod handler;
mod server;

pub use error::RowforgeError;
pub use server::{RowforgeServer, RowforgeServerBuilder, ServerConfig, TransportKind};

/// Everything needed to configure and run a server.
pub mod prelude {
    pub use crate::{
        RowforgeError, RowforgeServer, RowforgeServerBuilder, ServerConfig, TransportKind,
    };
    pub use rowforge_protocol::{
        Board, BoardSnapshot, ClientId, ClientMessage, DisciplinePolicy, Envelope, GameId,
        GameMode, QueueOrder, RoomId, RoomListEntry, ServerMessage,
    };
    pub use rowforge_room::{
        GameSelector, MemoryPuzzleStore, PuzzleStore, RegistryConfig, RoomConfig, RoomError,
        StoreError,
    };
}
