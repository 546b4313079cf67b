//! Bounded many-producer, single-consumer log pipeline.
//!
//! Rooms and connection handlers push [`LogEvent`]s into a bounded
//! channel; one consumer task drains it in arrival order and hands each
//! event to a [`LogSink`]. A full buffer makes producers wait, so nothing
//! is dropped silently. Use [`LogProducer::try_log`] where waiting is not
//! an option.
//!
//! This is the game's audit trail. Diagnostics go through `tracing`.

mod sink;

pub use sink::{JsonLinesSink, LogSink, MemorySink};

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use rowforge_protocol::{ClientId, GameId, RoomId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::SyncError;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// What a log line is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id")]
pub enum LogSubject {
    Room(RoomId),
    Game(GameId),
    Server,
}

impl fmt::Display for LogSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Room(id) => write!(f, "{id}"),
            Self::Game(id) => write!(f, "{id}"),
            Self::Server => write!(f, "server"),
        }
    }
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub subject: LogSubject,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    pub message: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

impl LogEvent {
    pub fn new(subject: LogSubject, message: impl Into<String>) -> Self {
        Self {
            subject,
            client_id: None,
            message: message.into(),
            timestamp_ms: now_ms(),
        }
    }

    pub fn room(room_id: RoomId, message: impl Into<String>) -> Self {
        Self::new(LogSubject::Room(room_id), message)
    }

    pub fn game(game_id: GameId, message: impl Into<String>) -> Self {
        Self::new(LogSubject::Game(game_id), message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(LogSubject::Server, message)
    }

    pub fn with_client(mut self, client_id: ClientId) -> Self {
        self.client_id = Some(client_id);
        self
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Entry point: spawns the consumer.
pub struct LogPipeline;

impl LogPipeline {
    /// Default buffer size.
    pub const DEFAULT_CAPACITY: usize = 10;

    /// Spawns the consumer task over `sink` with a buffer of `capacity`
    /// events (at least 1).
    ///
    /// The task ends once every [`LogProducer`] clone is dropped and the
    /// buffer is drained; it resolves to the number of events consumed.
    pub fn spawn<S>(sink: S, capacity: usize) -> (LogProducer, JoinHandle<u64>)
    where
        S: LogSink + Send + Sync + 'static,
    {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let handle = tokio::spawn(consume(sink, rx));
        let producer = LogProducer {
            tx: Some(tx),
            capacity,
        };
        (producer, handle)
    }
}

async fn consume<S>(sink: S, mut rx: mpsc::Receiver<LogEvent>) -> u64
where
    S: LogSink + Send + Sync + 'static,
{
    let mut consumed = 0u64;
    while let Some(event) = rx.recv().await {
        if let Err(e) = sink.append(&event).await {
            tracing::warn!(error = %e, subject = %event.subject, "log sink rejected event");
        }
        consumed += 1;
    }
    tracing::debug!(consumed, "log pipeline drained");
    consumed
}

/// Producer side of the pipeline. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LogProducer {
    tx: Option<mpsc::Sender<LogEvent>>,
    capacity: usize,
}

impl LogProducer {
    /// A producer that is not connected to any consumer. Every event is
    /// accepted and discarded.
    pub fn detached() -> Self {
        Self {
            tx: None,
            capacity: 0,
        }
    }

    pub fn is_detached(&self) -> bool {
        self.tx.is_none()
    }

    /// Appends an event, waiting while the buffer is full.
    ///
    /// # Errors
    /// [`SyncError::Closed`] if the consumer has stopped.
    pub async fn log(&self, event: LogEvent) -> Result<(), SyncError> {
        match &self.tx {
            Some(tx) => tx.send(event).await.map_err(|_| SyncError::Closed),
            None => Ok(()),
        }
    }

    /// Appends an event without waiting.
    ///
    /// # Errors
    /// [`SyncError::QueueFull`] when the buffer is full,
    /// [`SyncError::Closed`] if the consumer has stopped.
    pub fn try_log(&self, event: LogEvent) -> Result<(), SyncError> {
        match &self.tx {
            Some(tx) => tx.try_send(event).map_err(|e| match e {
                TrySendError::Full(_) => SyncError::QueueFull(self.capacity),
                TrySendError::Closed(_) => SyncError::Closed,
            }),
            None => Ok(()),
        }
    }
}
