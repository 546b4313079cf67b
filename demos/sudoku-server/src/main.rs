use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rowforge::prelude::*;

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(name = "sudoku-server")]
#[command(about = "Multiplayer sudoku rooms over TCP or WebSocket", long_about = None)]
struct Cli {
    /// Address to listen on
    #[arg(short, long, env = "ROWFORGE_BIND", default_value = "0.0.0.0:7000")]
    bind: String,

    /// tcp or websocket
    #[arg(short, long, env = "ROWFORGE_TRANSPORT", default_value = "tcp")]
    transport: TransportKind,

    /// Players per multiplayer room
    #[arg(short, long, env = "ROWFORGE_CAPACITY", default_value_t = 3)]
    capacity: usize,

    /// Admission countdown, in seconds
    #[arg(long, env = "ROWFORGE_ADMISSION_SECS", default_value_t = 60)]
    admission_secs: u32,

    /// Aging threshold for dynamic-priority queues
    #[arg(long, env = "ROWFORGE_MAX_WAITING_TIME", default_value_t = 3)]
    max_waiting_time: u32,

    #[arg(long, env = "ROWFORGE_MAX_ROOMS", default_value_t = 16)]
    max_rooms: usize,

    #[arg(long, env = "ROWFORGE_MAX_CLIENTS", default_value_t = 64)]
    max_clients: usize,

    /// Append audit events to this file as JSON lines
    #[arg(long, env = "ROWFORGE_LOG_PATH")]
    log_path: Option<PathBuf>,

    /// Audit log buffer size
    #[arg(long, env = "ROWFORGE_LOG_CAPACITY", default_value_t = 10)]
    log_capacity: usize,

    /// JSON file of puzzles; the built-in puzzle is used when absent
    #[arg(short, long, env = "ROWFORGE_PUZZLES")]
    puzzles: Option<PathBuf>,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.bind.clone(),
            transport: self.transport,
            room: RoomConfig {
                capacity: self.capacity,
                admission_secs: self.admission_secs,
                max_waiting_time: self.max_waiting_time,
                tick_interval: Duration::from_secs(1),
                ..RoomConfig::default()
            },
            registry: RegistryConfig {
                max_rooms: self.max_rooms,
                max_clients: self.max_clients,
                ..RegistryConfig::default()
            },
            log_path: self.log_path.clone(),
            log_capacity: self.log_capacity,
        }
    }

    async fn puzzle_store(&self) -> Result<MemoryPuzzleStore, Box<dyn std::error::Error>> {
        match &self.puzzles {
            Some(path) => {
                let json = tokio::fs::read_to_string(path).await?;
                Ok(MemoryPuzzleStore::from_json(&json)?)
            }
            None => Ok(MemoryPuzzleStore::with_builtin()),
        }
    }
}

// ---------------------------------------------------------------------------
// Server bootstrap
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let store = Arc::new(cli.puzzle_store().await?);
    if store.is_empty() {
        tracing::warn!("puzzle store is empty, every game request will fail");
    }

    let config = cli.server_config();
    tracing::info!(
        addr = %config.bind_addr,
        transport = %config.transport,
        "starting sudoku server"
    );

    RowforgeServerBuilder::with_config(config).serve(store).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_room_config() {
        let cli = Cli::try_parse_from(["sudoku-server"]).unwrap();
        let config = cli.server_config();
        assert_eq!(config.transport, TransportKind::Tcp);
        assert_eq!(config.room, RoomConfig::default());
        assert_eq!(config.registry, RegistryConfig::default());
        assert_eq!(config.log_path, None);
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "sudoku-server",
            "--bind",
            "127.0.0.1:9000",
            "--capacity",
            "2",
            "--admission-secs",
            "10",
            "--max-rooms",
            "4",
            "--log-path",
            "/tmp/audit.jsonl",
        ])
        .unwrap();
        let config = cli.server_config();
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.room.capacity, 2);
        assert_eq!(config.room.admission_secs, 10);
        assert_eq!(config.registry.max_rooms, 4);
        assert_eq!(config.log_path, Some(PathBuf::from("/tmp/audit.jsonl")));
    }

    #[test]
    fn test_unknown_transport_is_rejected() {
        assert!(Cli::try_parse_from(["sudoku-server", "--transport", "udp"]).is_err());
    }

    #[tokio::test]
    async fn test_missing_puzzle_file_is_an_error() {
        let cli = Cli::try_parse_from(["sudoku-server", "--puzzles", "/nonexistent/puzzles.json"])
            .unwrap();
        assert!(cli.puzzle_store().await.is_err());
    }
}
