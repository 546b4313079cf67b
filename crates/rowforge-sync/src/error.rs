//! Error types for the synchronization layer.

/// Errors returned by the room concurrency primitives.
///
/// An empty queue is deliberately not here: [`WaitQueue::dequeue`]
/// reports underflow as `None`.
///
/// [`WaitQueue::dequeue`]: crate::WaitQueue::dequeue
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// A non-blocking enqueue found every slot taken.
    #[error("queue is full ({0} slots)")]
    QueueFull(usize),

    /// The primitive was shut down while the caller was waiting on it.
    #[error("synchronization primitive closed")]
    Closed,

    /// A barrier gate was used before any participant was registered.
    #[error("barrier has no participants")]
    NoParticipants,
}

/// Errors a [`LogSink`](crate::LogSink) can report.
///
/// The pipeline logs these and keeps draining; they never reach producers.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("log sink I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("log event encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}
