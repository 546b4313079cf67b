use std::future::Future;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tokio::io::AsyncWriteExt;

use crate::{lock, LogEvent, SinkError};

/// Where the log pipeline's consumer writes events.
pub trait LogSink {
    fn append(&self, event: &LogEvent) -> impl Future<Output = Result<(), SinkError>> + Send;
}

impl<S: LogSink + Send + Sync> LogSink for Arc<S> {
    fn append(&self, event: &LogEvent) -> impl Future<Output = Result<(), SinkError>> + Send {
        (**self).append(event)
    }
}

/// Appends one JSON object per line to a file.
pub struct JsonLinesSink {
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl JsonLinesSink {
    /// Opens `path` for appending, creating it if needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref();
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        tracing::info!(path = %path.display(), "log file opened");
        Ok(Self {
            file: tokio::sync::Mutex::new(file),
        })
    }
}

impl LogSink for JsonLinesSink {
    fn append(&self, event: &LogEvent) -> impl Future<Output = Result<(), SinkError>> + Send {
        let line = serde_json::to_vec(event);
        async move {
            let mut line = line?;
            line.push(b'\n');
            let mut file = self.file.lock().await;
            file.write_all(&line).await?;
            file.flush().await?;
            Ok(())
        }
    }
}

/// Keeps the most recent events in memory. Used by tests and by servers
/// started without a log file.
///
/// Holds at most [`capacity`](Self::capacity) events; appending past that
/// evicts the oldest.
#[derive(Debug)]
pub struct MemorySink {
    events: Mutex<VecDeque<LogEvent>>,
    capacity: usize,
}

impl MemorySink {
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// A sink that keeps the last `capacity` events (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(Self::DEFAULT_CAPACITY))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The retained events, oldest first.
    pub fn events(&self) -> Vec<LogEvent> {
        lock(&self.events).iter().cloned().collect()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink for MemorySink {
    fn append(&self, event: &LogEvent) -> impl Future<Output = Result<(), SinkError>> + Send {
        let mut events = lock(&self.events);
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
        std::future::ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_sink_keeps_most_recent() {
        let sink = MemorySink::with_capacity(3);
        for i in 0..5 {
            sink.append(&LogEvent::server(format!("event {i}"))).await.unwrap();
        }
        let messages: Vec<String> = sink.events().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, ["event 2", "event 3", "event 4"]);
    }

    #[test]
    fn test_memory_sink_capacity_is_at_least_one() {
        assert_eq!(MemorySink::with_capacity(0).capacity(), 1);
        assert_eq!(MemorySink::new().capacity(), MemorySink::DEFAULT_CAPACITY);
    }
}
