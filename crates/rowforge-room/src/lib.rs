//! Rooms, admission, and the registry for Rowforge.
//!
//! A [`Room`] is one shared sudoku board and the clients solving it row by
//! row. The [`Registry`] actor decides which rooms exist and who is in
//! them; an [`AdmissionDriver`] per room runs the countdown that turns a
//! forming room into a running one.
//!
//! ```text
//! connection task ──► Registry (actor) ──► Arc<Room>
//!        │                                    │
//!        └────── play_round / withdraw ───────┘
//! ```
//!
//! Puzzles come from a [`PuzzleStore`]; results go back into it when a
//! room finishes.

mod admission;
mod config;
mod error;
mod registry;
mod room;
mod store;

pub use admission::AdmissionDriver;
pub use config::{RegistryConfig, RoomConfig, RoomStatus};
pub use error::{RoomError, StoreError};
pub use registry::{Joined, Registry, RegistryStats};
pub use room::{
    Admission, ClientResult, FinishOutcome, FinishSummary, Room, RoomEvent, RoomInfo, RowOutcome,
    TickOutcome,
};
pub use store::{GameRecord, GameSelector, MemoryPuzzleStore, Puzzle, PuzzleStore};
