//! Wire protocol for Rowforge.
//!
//! This crate defines the "language" that puzzle clients and the server
//! speak, plus the board types every other layer shares:
//!
//! - **Types** ([`ClientId`], [`RoomId`], [`GameMode`], [`DisciplinePolicy`], ...)
//!   the identities and room options that travel on the wire.
//! - **Board** ([`Board`], [`Row`], [`BoardSnapshot`]) the 9x9 grid.
//! - **Messages** ([`Envelope`], [`ClientMessage`], [`ServerMessage`]).
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]) how messages become bytes.
//! - **Errors** ([`ProtocolError`]).
//!
//! The protocol layer doesn't know about connections or rooms. It only
//! knows how to describe them.
//!
//! ```text
//! Transport (lines) → Protocol (Envelope) → Room (board, lifecycle)
//! ```

mod board;
mod codec;
mod error;
mod message;
mod types;

pub use board::{parse_row, Board, BoardSnapshot, Row, BOARD_SIZE};
pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use message::{ClientMessage, Envelope, RoomListEntry, ServerMessage};
pub use types::{
    ClientId, DisciplinePolicy, GameId, GameMode, QueueOrder, RoomId,
};
