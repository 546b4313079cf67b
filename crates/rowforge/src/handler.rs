//! Per-connection handler: lobby, admission, rounds.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Register with the registry → send Welcome
//!   2. Lobby: create, join, or list rooms
//!   3. Admission: forward the countdown until the room starts
//!   4. Rounds: one Submit per row until the board is complete
//!   5. Finished → back to the lobby
//!
//! A separate reader task owns `recv`, so the handler can wait on a room
//! and on its client at the same time without losing a half-read frame.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rowforge_protocol::{
    parse_row, ClientId, ClientMessage, Codec, Envelope, ProtocolError, RoomListEntry,
    ServerMessage, BOARD_SIZE,
};
use rowforge_room::{Joined, PuzzleStore, Registry, Room, RoomError, RoomEvent, StoreError};
use rowforge_sync::{LogEvent, LogProducer};
use rowforge_transport::Connection;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::server::ServerState;
use crate::RowforgeError;

/// Frames buffered between the reader task and the handler.
const INBOX_SIZE: usize = 16;

type Inbound = Result<ClientMessage, ProtocolError>;

/// Frames from the reader task, plus the signal that it has exited.
struct Inbox {
    frames: mpsc::Receiver<Inbound>,
    hangup: oneshot::Receiver<()>,
    hung_up: bool,
}

impl Inbox {
    async fn recv(&mut self) -> Option<Inbound> {
        self.frames.recv().await
    }

    /// Resolves once the peer is gone and every frame it sent before
    /// leaving has been taken.
    async fn closed(&mut self) {
        if !self.hung_up {
            let _ = (&mut self.hangup).await;
            self.hung_up = true;
        }
        // The reader has exited, so the queue can only shrink.
        if self.frames.is_empty() {
            return;
        }
        std::future::pending::<()>().await;
    }
}

/// What the handler does after leaving a room.
enum Flow {
    Lobby,
    Disconnect,
}

/// Drop guard that takes the client out of the registry, and out of its
/// room, when the handler exits.
///
/// This runs even if the handler panics or errors out. `Drop` is
/// synchronous, so the async cleanup is spawned as a fire-and-forget task.
struct ClientGuard<S: PuzzleStore> {
    client_id: ClientId,
    registry: Registry<S>,
    log: LogProducer,
    reader: JoinHandle<()>,
}

impl<S: PuzzleStore> Drop for ClientGuard<S> {
    fn drop(&mut self) {
        self.reader.abort();
        let client_id = self.client_id;
        let registry = self.registry.clone();
        let log = self.log.clone();
        tokio::spawn(async move {
            release_client(&registry, client_id).await;
            if let Err(e) = log.log(LogEvent::server("disconnected").with_client(client_id)).await {
                tracing::debug!(%client_id, error = %e, "audit log unavailable");
            }
        });
    }
}

/// Withdraws a departed client from its room. The last one out finishes
/// (or cancels) the room.
async fn release_client<S: PuzzleStore>(registry: &Registry<S>, client_id: ClientId) {
    let room = match registry.remove_client(client_id).await {
        Ok(Some(room)) => room,
        Ok(None) => return,
        Err(e) => {
            tracing::debug!(%client_id, error = %e, "remove client failed");
            return;
        }
    };
    match room.withdraw(client_id).await {
        Ok(0) => {
            if let Err(e) = registry.finish(room.room_id()).await {
                tracing::debug!(
                    %client_id,
                    room_id = %room.room_id(),
                    error = %e,
                    "finish after withdrawal failed"
                );
            }
        }
        Ok(active) => {
            tracing::debug!(%client_id, room_id = %room.room_id(), active, "client withdrawn");
        }
        Err(e) => tracing::debug!(%client_id, error = %e, "withdraw failed"),
    }
}

/// Whole milliseconds, saturating.
fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Sequence numbers and timestamps for everything sent on one connection.
struct Outbox<'a, Conn, C> {
    conn: &'a Conn,
    codec: &'a C,
    seq: u64,
    start: Instant,
}

impl<Conn: Connection, C: Codec> Outbox<'_, Conn, C> {
    async fn send(&mut self, payload: ServerMessage) -> Result<(), RowforgeError> {
        let envelope = Envelope::new(
            next_seq(&mut self.seq),
            millis(self.start.elapsed()),
            payload,
        );
        let bytes = self.codec.encode(&envelope)?;
        self.conn.send(&bytes).await?;
        Ok(())
    }

    async fn error(&mut self, code: u16, message: impl Into<String>) -> Result<(), RowforgeError> {
        self.send(ServerMessage::Error {
            code,
            message: message.into(),
        })
        .await
    }

    async fn room_error(&mut self, err: &RoomError) -> Result<(), RowforgeError> {
        self.error(error_code(err), err.to_string()).await
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<Conn, S, C>(
    conn: Conn,
    state: Arc<ServerState<S, C>>,
) -> Result<(), RowforgeError>
where
    Conn: Connection,
    S: PuzzleStore,
    C: Codec,
{
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    let mut outbox = Outbox {
        conn: &*conn,
        codec: &state.codec,
        seq: 1,
        start: Instant::now(),
    };

    let client_id = match state.registry.register_client().await {
        Ok(id) => id,
        Err(e) => {
            tracing::info!(%conn_id, error = %e, "connection refused");
            outbox.room_error(&e).await?;
            let _ = conn.close().await;
            return Err(e.into());
        }
    };
    tracing::info!(%conn_id, %client_id, "client connected");

    let (inbox_tx, frames) = mpsc::channel(INBOX_SIZE);
    let (hangup_tx, hangup) = oneshot::channel();
    let mut inbox = Inbox {
        frames,
        hangup,
        hung_up: false,
    };
    let reader = tokio::spawn(read_frames(
        Arc::clone(&conn),
        Arc::clone(&state),
        inbox_tx,
        hangup_tx,
    ));
    let _guard = ClientGuard {
        client_id,
        registry: state.registry.clone(),
        log: state.log.clone(),
        reader,
    };

    outbox.send(ServerMessage::Welcome { client_id }).await?;

    loop {
        let Some(inbound) = inbox.recv().await else {
            tracing::info!(%client_id, "connection closed");
            break;
        };
        let message = match inbound {
            Ok(message) => message,
            Err(e) => {
                outbox.error(400, e.to_string()).await?;
                continue;
            }
        };

        let joined = match message {
            ClientMessage::Create {
                mode,
                policy,
                game,
                premium,
            } => {
                state
                    .registry
                    .create_and_join(client_id, mode, policy, game.into(), premium)
                    .await
            }
            ClientMessage::Join { room_id, premium } => {
                state.registry.join_room(room_id, client_id, premium).await
            }
            ClientMessage::JoinOrCreate { policy, premium } => {
                state
                    .registry
                    .join_or_create(client_id, policy, premium)
                    .await
            }
            ClientMessage::ListRooms => {
                send_room_list(&mut outbox, &state.registry).await?;
                continue;
            }
            ClientMessage::Submit { .. } => {
                outbox.error(409, "not in a running room").await?;
                continue;
            }
            ClientMessage::Quit => {
                tracing::info!(%client_id, "client quit");
                break;
            }
        };

        let joined = match joined {
            Ok(joined) => joined,
            Err(e) => {
                outbox.room_error(&e).await?;
                continue;
            }
        };

        match play(&mut outbox, &state, client_id, joined, &mut inbox).await? {
            Flow::Lobby => {}
            Flow::Disconnect => break,
        }
    }

    let _ = conn.close().await;
    // _guard drops here → client removed from the registry.
    Ok(())
}

/// One room, from join to finish.
async fn play<Conn, S, C>(
    outbox: &mut Outbox<'_, Conn, C>,
    state: &ServerState<S, C>,
    client_id: ClientId,
    joined: Joined,
    inbox: &mut Inbox,
) -> Result<Flow, RowforgeError>
where
    Conn: Connection,
    S: PuzzleStore,
    C: Codec,
{
    let Joined { room, admission } = joined;
    let room_id = room.room_id();
    let info = room.info();
    outbox
        .send(ServerMessage::RoomJoined {
            room_id,
            game_id: room.game_id(),
            joined: info.joined,
            capacity: info.capacity,
        })
        .await?;

    // --- Admission ---
    let mut events = room.subscribe();
    let admitted = room.await_admission(admission);
    tokio::pin!(admitted);
    loop {
        tokio::select! {
            result = &mut admitted => match result {
                Ok(()) => break,
                Err(e) => {
                    tracing::debug!(%client_id, %room_id, error = %e, "admission failed");
                    let reason = cancel_reason(&room, &mut events);
                    outbox.send(ServerMessage::Cancelled { reason }).await?;
                    return Ok(Flow::Lobby);
                }
            },
            event = events.recv() => match event {
                Ok(RoomEvent::Countdown { remaining }) => {
                    outbox.send(ServerMessage::Countdown { remaining }).await?;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return Ok(Flow::Lobby),
            },
            inbound = inbox.recv() => match inbound {
                None | Some(Ok(ClientMessage::Quit)) => return Ok(Flow::Disconnect),
                Some(Ok(ClientMessage::ListRooms)) => {
                    send_room_list(outbox, &state.registry).await?;
                }
                Some(Ok(_)) => outbox.error(409, "waiting for the room to start").await?,
                Some(Err(e)) => outbox.error(400, e.to_string()).await?,
            },
        }
    }
    drop(events);

    outbox
        .send(ServerMessage::Started {
            players: room.joined().len(),
        })
        .await?;
    let snapshot = room.snapshot(client_id).await?;
    outbox.send(ServerMessage::Board { snapshot }).await?;

    // --- Rounds ---
    while !room.is_complete() {
        let Some(inbound) = inbox.recv().await else {
            return Ok(Flow::Disconnect);
        };
        let text = match inbound {
            Ok(ClientMessage::Submit { row }) => row,
            Ok(ClientMessage::Quit) => return Ok(Flow::Disconnect),
            Ok(ClientMessage::ListRooms) => {
                send_room_list(outbox, &state.registry).await?;
                continue;
            }
            Ok(_) => {
                outbox.error(409, "already in a room").await?;
                continue;
            }
            Err(e) => {
                outbox.error(400, e.to_string()).await?;
                continue;
            }
        };
        let row = match parse_row(&text) {
            Ok(row) => row,
            Err(e) => {
                outbox.error(400, e.to_string()).await?;
                continue;
            }
        };

        // Dropping the round future on hangup undoes its barrier arrival.
        // Rows the peer sent before leaving are still played.
        let outcome = tokio::select! {
            biased;
            outcome = room.play_round(client_id, row) => outcome,
            () = inbox.closed() => {
                tracing::info!(%client_id, %room_id, "connection lost mid-round");
                return Ok(Flow::Disconnect);
            }
        };
        match outcome {
            Ok(outcome) => {
                outbox
                    .send(ServerMessage::RowResult {
                        row: outcome.row,
                        correct: outcome.correct,
                        snapshot: outcome.snapshot,
                    })
                    .await?;
            }
            Err(e) => {
                outbox.room_error(&e).await?;
                if matches!(e, RoomError::NotInRoom(..)) {
                    return Ok(Flow::Lobby);
                }
            }
        }
    }

    // --- Finish ---
    // Every client asks; only the first records.
    state.registry.finish(room_id).await?;
    if let Some(summary) = room.summary() {
        outbox
            .send(ServerMessage::Finished {
                elapsed_ms: millis(summary.elapsed),
                accuracy: summary.accuracy_of(client_id).unwrap_or(0.0),
            })
            .await?;
    }
    tracing::info!(%client_id, %room_id, rows = BOARD_SIZE, "board complete");
    Ok(Flow::Lobby)
}

/// The reason carried by the room's Cancelled event, if it is still
/// buffered.
fn cancel_reason(room: &Room, events: &mut tokio::sync::broadcast::Receiver<RoomEvent>) -> String {
    while let Ok(event) = events.try_recv() {
        if let RoomEvent::Cancelled { reason } = event {
            return reason;
        }
    }
    format!("room {} closed before it started", room.room_id())
}

async fn send_room_list<Conn, S, C>(
    outbox: &mut Outbox<'_, Conn, C>,
    registry: &Registry<S>,
) -> Result<(), RowforgeError>
where
    Conn: Connection,
    S: PuzzleStore,
    C: Codec,
{
    match registry.list_rooms().await {
        Ok(infos) => {
            let rooms = infos.iter().map(RoomListEntry::from).collect();
            outbox.send(ServerMessage::RoomList { rooms }).await
        }
        Err(e) => outbox.room_error(&e).await,
    }
}

/// Reader task: decodes frames into the inbox until the peer goes away.
/// Dropping `hangup` on exit tells the handler the connection is gone.
async fn read_frames<Conn, S, C>(
    conn: Arc<Conn>,
    state: Arc<ServerState<S, C>>,
    inbox: mpsc::Sender<Inbound>,
    hangup: oneshot::Sender<()>,
) where
    Conn: Connection,
    S: PuzzleStore,
    C: Codec,
{
    let conn_id = conn.id();
    loop {
        let data = match conn.recv().await {
            Ok(Some(data)) => data,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "recv error");
                break;
            }
        };
        let inbound = state
            .codec
            .decode::<Envelope<ClientMessage>>(&data)
            .map(|envelope| envelope.payload);
        if let Err(e) = &inbound {
            tracing::debug!(%conn_id, error = %e, "failed to decode envelope");
        }
        if inbox.send(inbound).await.is_err() {
            break;
        }
    }
    drop(hangup);
}

/// HTTP-style status for a room error.
fn error_code(err: &RoomError) -> u16 {
    match err {
        RoomError::NotFound(_)
        | RoomError::ClientNotFound(_)
        | RoomError::Store(StoreError::GameNotFound(_)) => 404,
        RoomError::RoomFull(_)
        | RoomError::RoomAlreadyRunning(_)
        | RoomError::NotInRoom(..)
        | RoomError::InvalidState(_) => 409,
        RoomError::ResourceExhausted(_)
        | RoomError::Unavailable(_)
        | RoomError::RegistryUnavailable
        | RoomError::Store(StoreError::Empty) => 503,
        RoomError::Sync(_) | RoomError::Store(_) => 500,
    }
}

/// Increments and returns the next sequence number.
fn next_seq(seq: &mut u64) -> u64 {
    let current = *seq;
    *seq += 1;
    current
}
