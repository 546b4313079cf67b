//! Messages exchanged between clients and the server.
//!
//! Every line on the wire is one JSON [`Envelope`]. Clients send
//! `Envelope<ClientMessage>`, the server answers with
//! `Envelope<ServerMessage>`. Both enums are internally tagged:
//!
//! ```text
//! {"seq":1,"timestamp":0,"payload":{"type":"Submit","row":"534678912"}}
//! ```

use serde::{Deserialize, Serialize};

use crate::{BoardSnapshot, ClientId, DisciplinePolicy, GameId, GameMode, RoomId};

/// The top-level message wrapper. Every message on the wire is an Envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Per-direction sequence number, starting at 1.
    pub seq: u64,
    /// Milliseconds since the sender's connection started.
    pub timestamp: u64,
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Wraps a payload.
    pub fn new(seq: u64, timestamp: u64, payload: T) -> Self {
        Self {
            seq,
            timestamp,
            payload,
        }
    }
}

/// A summary of an open room returned in room listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomListEntry {
    pub room_id: RoomId,
    pub mode: GameMode,
    pub policy: DisciplinePolicy,
    pub joined: usize,
    pub capacity: usize,
    /// Seconds left on the admission countdown.
    pub remaining: u32,
}

/// Client → Server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Create a room and join it. `game` picks a puzzle; `None` asks for
    /// a random one.
    Create {
        mode: GameMode,
        #[serde(default)]
        policy: DisciplinePolicy,
        #[serde(default)]
        game: Option<GameId>,
        #[serde(default)]
        premium: bool,
    },

    /// Join an existing room that is still forming.
    Join {
        room_id: RoomId,
        #[serde(default)]
        premium: bool,
    },

    /// Join the first open room with these options, or create one.
    JoinOrCreate {
        #[serde(default)]
        policy: DisciplinePolicy,
        #[serde(default)]
        premium: bool,
    },

    /// List rooms that are still accepting players.
    ListRooms,

    /// Submit nine digits for the row currently in play.
    Submit { row: String },

    /// Leave and close the connection.
    Quit,
}

/// Server → Client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Sent once right after the connection is accepted.
    Welcome { client_id: ClientId },

    /// The client is now part of a room.
    RoomJoined {
        room_id: RoomId,
        game_id: GameId,
        joined: usize,
        capacity: usize,
    },

    RoomList { rooms: Vec<RoomListEntry> },

    /// Admission countdown update.
    Countdown { remaining: u32 },

    /// The room left admission and the first round can begin.
    Started { players: usize },

    /// Current board state.
    Board { snapshot: BoardSnapshot },

    /// Outcome of a submitted row, once every player finished the round.
    RowResult {
        row: u8,
        correct: bool,
        snapshot: BoardSnapshot,
    },

    /// The board is complete. `accuracy` is in `0.0..=1.0`.
    Finished { elapsed_ms: u64, accuracy: f64 },

    /// The room closed before it could run.
    Cancelled { reason: String },

    /// Something went wrong. `code` follows HTTP conventions.
    Error { code: u16, message: String },
}
