//! Integration tests for the Rowforge server, handler, and full connection flow.
//!
//! Clients speak the line protocol over a raw `TcpStream`.

use std::sync::Arc;
use std::time::Duration;

use rowforge::prelude::*;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

// =========================================================================
// Helpers
// =========================================================================

/// Starts a server on a random port and returns the address.
async fn start_server(room: RoomConfig) -> String {
    let server = RowforgeServer::builder()
        .bind("127.0.0.1:0")
        .room_config(room)
        .build_tcp(Arc::new(MemoryPuzzleStore::with_builtin()))
        .await
        .expect("server should build");

    let addr = server
        .local_addr()
        .expect("should have local addr")
        .to_string();

    tokio::spawn(async move {
        let _ = server.run().await;
    });
    addr
}

fn two_player_room() -> RoomConfig {
    RoomConfig {
        capacity: 2,
        ..RoomConfig::default()
    }
}

/// The built-in puzzle's solution, one nine-digit string per row.
async fn solution_rows() -> Vec<String> {
    let puzzle = MemoryPuzzleStore::with_builtin()
        .load_game(GameSelector::Id(GameId(1)))
        .await
        .expect("built-in puzzle");
    puzzle
        .solution
        .rows()
        .iter()
        .map(|row| row.iter().map(|d| char::from(b'0' + d)).collect())
        .collect()
}

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    seq: u64,
    id: ClientId,
}

impl Client {
    /// Connects and consumes the Welcome.
    async fn connect(addr: &str) -> Self {
        let stream = TcpStream::connect(addr).await.expect("should connect");
        let (read, writer) = stream.into_split();
        let mut client = Self {
            lines: BufReader::new(read).lines(),
            writer,
            seq: 1,
            id: ClientId(0),
        };
        match client.recv().await {
            ServerMessage::Welcome { client_id } => client.id = client_id,
            other => panic!("expected Welcome, got {other:?}"),
        }
        client
    }

    async fn send(&mut self, payload: ClientMessage) {
        let envelope = Envelope::new(self.seq, 0, payload);
        self.seq += 1;
        let mut line = serde_json::to_vec(&envelope).expect("encode");
        line.push(b'\n');
        self.writer.write_all(&line).await.expect("write");
    }

    async fn send_raw(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("write");
    }

    async fn recv(&mut self) -> ServerMessage {
        let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("server should answer in time")
            .expect("read")
            .expect("connection open");
        let envelope: Envelope<ServerMessage> = serde_json::from_str(&line).expect("decode");
        envelope.payload
    }

    /// Skips countdown announcements.
    async fn recv_skipping_countdown(&mut self) -> ServerMessage {
        loop {
            match self.recv().await {
                ServerMessage::Countdown { .. } => continue,
                other => return other,
            }
        }
    }

    /// Reads up to Started and the first Board.
    async fn expect_start(&mut self, players: usize) {
        match self.recv_skipping_countdown().await {
            ServerMessage::Started { players: n } => assert_eq!(n, players),
            other => panic!("expected Started, got {other:?}"),
        }
        match self.recv().await {
            ServerMessage::Board { snapshot } => assert_eq!(snapshot.current_row, 1),
            other => panic!("expected Board, got {other:?}"),
        }
    }

    async fn expect_joined(&mut self) -> RoomId {
        match self.recv().await {
            ServerMessage::RoomJoined { room_id, .. } => room_id,
            other => panic!("expected RoomJoined, got {other:?}"),
        }
    }

    async fn list_rooms(&mut self) -> Vec<RoomListEntry> {
        self.send(ClientMessage::ListRooms).await;
        match self.recv_skipping_countdown().await {
            ServerMessage::RoomList { rooms } => rooms,
            other => panic!("expected RoomList, got {other:?}"),
        }
    }
}

fn expect_error(msg: ServerMessage, code: u16) {
    match msg {
        ServerMessage::Error { code: c, .. } => assert_eq!(c, code),
        other => panic!("expected Error {code}, got {other:?}"),
    }
}

// =========================================================================
// Lobby
// =========================================================================

#[tokio::test]
async fn test_welcome_assigns_increasing_ids() {
    let addr = start_server(RoomConfig::default()).await;
    let a = Client::connect(&addr).await;
    let b = Client::connect(&addr).await;
    assert!(b.id > a.id);
}

#[tokio::test]
async fn test_list_rooms_shows_forming_rooms() {
    let addr = start_server(two_player_room()).await;
    let mut a = Client::connect(&addr).await;
    let mut b = Client::connect(&addr).await;
    assert!(b.list_rooms().await.is_empty());

    a.send(ClientMessage::Create {
        mode: GameMode::MultiPlayer,
        policy: DisciplinePolicy::BarberShop(QueueOrder::Fifo),
        game: None,
        premium: false,
    })
    .await;
    let room_id = a.expect_joined().await;

    let rooms = b.list_rooms().await;
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].room_id, room_id);
    assert_eq!(rooms[0].joined, 1);
    assert_eq!(rooms[0].capacity, 2);
    assert_eq!(rooms[0].policy, DisciplinePolicy::BarberShop(QueueOrder::Fifo));
}

#[tokio::test]
async fn test_lobby_errors() {
    let addr = start_server(RoomConfig::default()).await;
    let mut c = Client::connect(&addr).await;

    c.send_raw("this is not json").await;
    expect_error(c.recv().await, 400);

    c.send(ClientMessage::Submit {
        row: "534678912".into(),
    })
    .await;
    expect_error(c.recv().await, 409);

    c.send(ClientMessage::Join {
        room_id: RoomId(999),
        premium: false,
    })
    .await;
    expect_error(c.recv().await, 404);

    c.send(ClientMessage::Create {
        mode: GameMode::SinglePlayer,
        policy: DisciplinePolicy::ReaderWriter,
        game: Some(GameId(404)),
        premium: false,
    })
    .await;
    expect_error(c.recv().await, 404);
}

// =========================================================================
// Games
// =========================================================================

#[tokio::test]
async fn test_single_player_game_to_completion() {
    let addr = start_server(RoomConfig::default()).await;
    let rows = solution_rows().await;
    let mut c = Client::connect(&addr).await;

    c.send(ClientMessage::Create {
        mode: GameMode::SinglePlayer,
        policy: DisciplinePolicy::ReaderWriter,
        game: Some(GameId(1)),
        premium: false,
    })
    .await;
    c.expect_joined().await;
    c.expect_start(1).await;

    // A malformed row is rejected without using up the round.
    c.send(ClientMessage::Submit { row: "12345".into() }).await;
    expect_error(c.recv().await, 400);

    for (i, row) in rows.iter().enumerate() {
        c.send(ClientMessage::Submit { row: row.clone() }).await;
        match c.recv().await {
            ServerMessage::RowResult {
                row,
                correct,
                snapshot,
            } => {
                assert_eq!(usize::from(row), i + 1);
                assert!(correct);
                assert_eq!(usize::from(snapshot.current_row), i + 2);
            }
            other => panic!("expected RowResult, got {other:?}"),
        }
    }

    match c.recv().await {
        ServerMessage::Finished { accuracy, .. } => assert_eq!(accuracy, 1.0),
        other => panic!("expected Finished, got {other:?}"),
    }

    // Back in the lobby: the room is gone and a new one can be made.
    assert!(c.list_rooms().await.is_empty());
}

#[tokio::test]
async fn test_two_players_share_one_board() {
    let addr = start_server(two_player_room()).await;
    let rows = solution_rows().await;
    let policy = DisciplinePolicy::BarberShop(QueueOrder::StaticPriority);

    let mut a = Client::connect(&addr).await;
    let mut b = Client::connect(&addr).await;
    a.send(ClientMessage::JoinOrCreate {
        policy,
        premium: false,
    })
    .await;
    let room_a = a.expect_joined().await;
    b.send(ClientMessage::JoinOrCreate {
        policy,
        premium: true,
    })
    .await;
    let room_b = b.expect_joined().await;
    assert_eq!(room_a, room_b);

    a.expect_start(2).await;
    b.expect_start(2).await;

    for row in &rows {
        a.send(ClientMessage::Submit { row: row.clone() }).await;
        b.send(ClientMessage::Submit { row: row.clone() }).await;
        let ra = a.recv().await;
        let rb = b.recv().await;
        match (ra, rb) {
            (
                ServerMessage::RowResult { snapshot: sa, .. },
                ServerMessage::RowResult { snapshot: sb, .. },
            ) => assert_eq!(sa, sb),
            other => panic!("expected two RowResults, got {other:?}"),
        }
    }

    for client in [&mut a, &mut b] {
        match client.recv().await {
            ServerMessage::Finished { accuracy, .. } => assert_eq!(accuracy, 1.0),
            other => panic!("expected Finished, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_rows_sent_before_half_close_are_played() {
    let addr = start_server(two_player_room()).await;
    let rows = solution_rows().await;

    let mut a = Client::connect(&addr).await;
    let mut b = Client::connect(&addr).await;
    a.send(ClientMessage::JoinOrCreate {
        policy: DisciplinePolicy::ReaderWriter,
        premium: false,
    })
    .await;
    a.expect_joined().await;
    b.send(ClientMessage::JoinOrCreate {
        policy: DisciplinePolicy::ReaderWriter,
        premium: false,
    })
    .await;
    b.expect_joined().await;
    a.expect_start(2).await;
    b.expect_start(2).await;

    // A sends the whole board up front, then stops writing.
    for row in &rows {
        a.send(ClientMessage::Submit { row: row.clone() }).await;
    }
    a.writer.shutdown().await.expect("shutdown");

    for (i, row) in rows.iter().enumerate() {
        b.send(ClientMessage::Submit { row: row.clone() }).await;
        for client in [&mut a, &mut b] {
            match client.recv().await {
                ServerMessage::RowResult { row, correct, .. } => {
                    assert_eq!(usize::from(row), i + 1);
                    assert!(correct);
                }
                other => panic!("expected RowResult, got {other:?}"),
            }
        }
    }
    for client in [&mut a, &mut b] {
        match client.recv().await {
            ServerMessage::Finished { accuracy, .. } => assert_eq!(accuracy, 1.0),
            other => panic!("expected Finished, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_partner_disconnect_does_not_strand_player() {
    let addr = start_server(two_player_room()).await;
    let rows = solution_rows().await;

    let mut a = Client::connect(&addr).await;
    let mut b = Client::connect(&addr).await;
    a.send(ClientMessage::JoinOrCreate {
        policy: DisciplinePolicy::ReaderWriter,
        premium: false,
    })
    .await;
    a.expect_joined().await;
    b.send(ClientMessage::JoinOrCreate {
        policy: DisciplinePolicy::ReaderWriter,
        premium: false,
    })
    .await;
    b.expect_joined().await;
    a.expect_start(2).await;
    b.expect_start(2).await;

    // A waits at the barrier for B, who hangs up instead.
    a.send(ClientMessage::Submit {
        row: rows[0].clone(),
    })
    .await;
    drop(b);

    match a.recv().await {
        ServerMessage::RowResult { row, correct, .. } => {
            assert_eq!(row, 1);
            assert!(correct);
        }
        other => panic!("expected RowResult, got {other:?}"),
    }
}

#[tokio::test]
async fn test_last_client_leaving_cancels_forming_room() {
    let addr = start_server(two_player_room()).await;
    let mut a = Client::connect(&addr).await;
    let mut watcher = Client::connect(&addr).await;

    a.send(ClientMessage::Create {
        mode: GameMode::MultiPlayer,
        policy: DisciplinePolicy::ReaderWriter,
        game: None,
        premium: false,
    })
    .await;
    a.expect_joined().await;
    assert_eq!(watcher.list_rooms().await.len(), 1);

    a.send(ClientMessage::Quit).await;
    drop(a);

    let mut gone = false;
    for _ in 0..50 {
        if watcher.list_rooms().await.is_empty() {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(gone, "abandoned room should be released");
}

#[tokio::test]
async fn test_countdown_reaches_waiting_client() {
    let addr = start_server(RoomConfig {
        capacity: 2,
        admission_secs: 2,
        tick_interval: Duration::from_millis(50),
        ..RoomConfig::default()
    })
    .await;
    let mut a = Client::connect(&addr).await;
    a.send(ClientMessage::JoinOrCreate {
        policy: DisciplinePolicy::ReaderWriter,
        premium: false,
    })
    .await;
    a.expect_joined().await;

    // Two ticks: one announced with one left, then a partial start.
    match a.recv().await {
        ServerMessage::Countdown { remaining } => assert_eq!(remaining, 1),
        other => panic!("expected Countdown, got {other:?}"),
    }
    a.expect_start(1).await;
}

// =========================================================================
// WebSocket
// =========================================================================

#[cfg(feature = "websocket")]
#[tokio::test]
async fn test_websocket_client_gets_welcome() {
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    let server = RowforgeServer::builder()
        .bind("127.0.0.1:0")
        .build_websocket(Arc::new(MemoryPuzzleStore::with_builtin()))
        .await
        .expect("server should build");
    let addr = server.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = server.run().await;
    });

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("should connect");

    let decode = |msg: Message| -> ServerMessage {
        let envelope: Envelope<ServerMessage> =
            serde_json::from_slice(&msg.into_data()).expect("decode");
        envelope.payload
    };

    let welcome = ws.next().await.unwrap().expect("recv");
    assert!(matches!(decode(welcome), ServerMessage::Welcome { .. }));

    let request = serde_json::to_string(&Envelope::new(1, 0, ClientMessage::ListRooms)).unwrap();
    ws.send(Message::Text(request.into())).await.expect("send");
    let reply = ws.next().await.unwrap().expect("recv");
    assert_eq!(decode(reply), ServerMessage::RoomList { rooms: vec![] });
}
