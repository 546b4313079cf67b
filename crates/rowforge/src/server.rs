//! `RowforgeServer` builder and server loop.
//!
//! This is the entry point for running a Rowforge server. It ties the
//! layers together: transport → protocol → registry → rooms.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use rowforge_protocol::{Codec, JsonCodec};
use rowforge_room::{PuzzleStore, Registry, RegistryConfig, RoomConfig};
use rowforge_sync::{JsonLinesSink, LogEvent, LogPipeline, LogProducer, MemorySink};
use rowforge_transport::{TcpTransport, Transport};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::handler::handle_connection;
use crate::RowforgeError;

/// Which transport to listen on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Newline-delimited JSON over TCP.
    #[default]
    Tcp,
    /// One JSON document per WebSocket text message.
    #[cfg(feature = "websocket")]
    WebSocket,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            #[cfg(feature = "websocket")]
            "websocket" | "ws" => Ok(Self::WebSocket),
            other => Err(format!("unknown transport: {other}")),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            #[cfg(feature = "websocket")]
            Self::WebSocket => write!(f, "websocket"),
        }
    }
}

/// Everything the builder collects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub transport: TransportKind,
    pub room: RoomConfig,
    pub registry: RegistryConfig,
    /// Append audit events here as JSON lines. When unset, the most recent
    /// events are kept in memory.
    pub log_path: Option<PathBuf>,
    pub log_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7000".to_string(),
            transport: TransportKind::default(),
            room: RoomConfig::default(),
            registry: RegistryConfig::default(),
            log_path: None,
            log_capacity: LogPipeline::DEFAULT_CAPACITY,
        }
    }
}

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState<S, C> {
    pub(crate) registry: Registry<S>,
    pub(crate) codec: C,
    pub(crate) log: LogProducer,
}

/// Builder for configuring and starting a Rowforge server.
///
/// # Example
///
/// ```rust,ignore
/// let server = RowforgeServer::builder()
///     .bind("0.0.0.0:7000")
///     .room_config(RoomConfig { capacity: 2, ..RoomConfig::default() })
///     .build_tcp(Arc::new(MemoryPuzzleStore::with_builtin()))
///     .await?;
/// server.run().await
/// ```
#[derive(Debug, Clone, Default)]
pub struct RowforgeServerBuilder {
    config: ServerConfig,
}

impl RowforgeServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from a complete configuration.
    pub fn with_config(config: ServerConfig) -> Self {
        Self { config }
    }

    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    pub fn transport(mut self, kind: TransportKind) -> Self {
        self.config.transport = kind;
        self
    }

    pub fn room_config(mut self, config: RoomConfig) -> Self {
        self.config.room = config;
        self
    }

    pub fn registry_config(mut self, config: RegistryConfig) -> Self {
        self.config.registry = config;
        self
    }

    /// Persists audit events to `path` instead of memory.
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.log_path = Some(path.into());
        self
    }

    pub fn log_capacity(mut self, capacity: usize) -> Self {
        self.config.log_capacity = capacity;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Binds a TCP listener and builds the server.
    pub async fn build_tcp<S: PuzzleStore>(
        self,
        store: Arc<S>,
    ) -> Result<RowforgeServer<TcpTransport, S>, RowforgeError> {
        let transport = TcpTransport::bind(&self.config.bind_addr).await?;
        self.build_with(transport, store).await
    }

    /// Binds a WebSocket listener and builds the server.
    #[cfg(feature = "websocket")]
    pub async fn build_websocket<S: PuzzleStore>(
        self,
        store: Arc<S>,
    ) -> Result<RowforgeServer<rowforge_transport::WebSocketTransport, S>, RowforgeError> {
        let transport = rowforge_transport::WebSocketTransport::bind(&self.config.bind_addr).await?;
        self.build_with(transport, store).await
    }

    /// Builds the server over an already bound transport.
    ///
    /// Uses `JsonCodec`. Starts the audit log consumer and the registry.
    pub async fn build_with<T: Transport, S: PuzzleStore>(
        self,
        transport: T,
        store: Arc<S>,
    ) -> Result<RowforgeServer<T, S>, RowforgeError> {
        let capacity = self.config.log_capacity;
        let (log, log_task, memory) = match &self.config.log_path {
            Some(path) => {
                let sink = JsonLinesSink::open(path).await?;
                let (log, task) = LogPipeline::spawn(sink, capacity);
                (log, task, None)
            }
            None => {
                let sink = Arc::new(MemorySink::new());
                let (log, task) = LogPipeline::spawn(Arc::clone(&sink), capacity);
                (log, task, Some(sink))
            }
        };

        let registry = Registry::spawn(
            self.config.registry.clone(),
            self.config.room.clone(),
            store,
            log.clone(),
        );
        let state = Arc::new(ServerState {
            registry,
            codec: JsonCodec,
            log,
        });

        Ok(RowforgeServer {
            transport,
            state,
            config: self.config,
            memory,
            _log_task: log_task,
        })
    }

    /// Builds the configured transport and runs until the process ends.
    pub async fn serve<S: PuzzleStore>(self, store: Arc<S>) -> Result<(), RowforgeError> {
        match self.config.transport {
            TransportKind::Tcp => self.build_tcp(store).await?.run().await,
            #[cfg(feature = "websocket")]
            TransportKind::WebSocket => self.build_websocket(store).await?.run().await,
        }
    }
}

/// A bound Rowforge server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct RowforgeServer<T, S, C = JsonCodec> {
    transport: T,
    state: Arc<ServerState<S, C>>,
    config: ServerConfig,
    /// Set when audit events are kept in memory.
    memory: Option<Arc<MemorySink>>,
    _log_task: JoinHandle<u64>,
}

impl RowforgeServer<TcpTransport, rowforge_room::MemoryPuzzleStore> {
    /// Creates a new builder.
    pub fn builder() -> RowforgeServerBuilder {
        RowforgeServerBuilder::new()
    }
}

impl<T, S, C> RowforgeServer<T, S, C>
where
    T: Transport,
    S: PuzzleStore,
    C: Codec,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// A handle to the registry, e.g. for inspecting rooms.
    pub fn registry(&self) -> Registry<S> {
        self.state.registry.clone()
    }

    /// Audit events recorded so far, when no log file is configured.
    pub fn audit_events(&self) -> Option<Vec<LogEvent>> {
        self.memory.as_ref().map(|sink| sink.events())
    }

    /// Runs the accept loop.
    ///
    /// Spawns a handler task for each connection. Runs until the process
    /// is terminated.
    pub async fn run(mut self) -> Result<(), RowforgeError> {
        tracing::info!(
            addr = ?self.transport.local_addr().ok(),
            transport = %self.config.transport,
            capacity = self.config.room.capacity,
            "Rowforge server running"
        );
        if let Err(e) = self.state.log.log(LogEvent::server("server started")).await {
            tracing::warn!(error = %e, "audit log unavailable");
        }

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}
