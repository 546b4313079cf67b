//! Error types for the protocol layer.
//!
//! Each crate in Rowforge defines its own error enum. When you see a
//! `ProtocolError`, the problem is in parsing or serialization, not in
//! networking or room management.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, missing fields, or a
    /// message type this server doesn't know.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// A submitted row is not exactly nine digits in `1..=9`.
    #[error("invalid row: {0}")]
    InvalidRow(String),

    /// A board literal has the wrong length or a non-digit cell.
    #[error("invalid board: {0}")]
    InvalidBoard(String),

    /// The message is well-formed but violates protocol rules.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
