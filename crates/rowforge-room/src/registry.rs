//! Registry: creates, tracks, and routes clients to rooms.
//!
//! The registry is an actor. One task owns the room and client maps and
//! serves [`RegistryCommand`]s one at a time, so creation, lookup, and
//! deletion never race each other and no registry-wide lock exists.
//! Rooms themselves are shared (`Arc<Room>`) and used directly by the
//! connection tasks; the registry only decides who gets one.

use std::collections::HashMap;
use std::sync::Arc;

use rowforge_protocol::{ClientId, DisciplinePolicy, GameMode, RoomId};
use rowforge_sync::{LogEvent, LogProducer};
use rowforge_tick::TickConfig;
use tokio::sync::{mpsc, oneshot};

use crate::{
    Admission, AdmissionDriver, FinishOutcome, GameSelector, Puzzle, PuzzleStore, RegistryConfig,
    Room, RoomConfig, RoomError, RoomInfo, RoomStatus,
};

/// A successful join: the room and the ticket to wait on.
#[derive(Debug)]
pub struct Joined {
    pub room: Arc<Room>,
    pub admission: Admission,
}

/// Counts of what the registry currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryStats {
    pub rooms: usize,
    pub clients: usize,
}

type Reply<T> = oneshot::Sender<Result<T, RoomError>>;

/// Commands sent to the registry actor.
enum RegistryCommand {
    RegisterClient {
        reply: Reply<ClientId>,
    },
    RemoveClient {
        client_id: ClientId,
        reply: oneshot::Sender<Option<Arc<Room>>>,
    },
    CreateRoom {
        mode: GameMode,
        policy: DisciplinePolicy,
        puzzle: Puzzle,
        reply: Reply<Arc<Room>>,
    },
    CreateAndJoin {
        client_id: ClientId,
        mode: GameMode,
        policy: DisciplinePolicy,
        premium: bool,
        puzzle: Puzzle,
        reply: Reply<Joined>,
    },
    JoinRoom {
        room_id: RoomId,
        client_id: ClientId,
        premium: bool,
        reply: Reply<Joined>,
    },
    JoinOrCreate {
        client_id: ClientId,
        policy: DisciplinePolicy,
        premium: bool,
        puzzle: Puzzle,
        reply: Reply<Joined>,
    },
    FindRoom {
        room_id: RoomId,
        reply: Reply<Arc<Room>>,
    },
    ListRooms {
        reply: oneshot::Sender<Vec<RoomInfo>>,
    },
    Release {
        room_id: RoomId,
        reply: oneshot::Sender<bool>,
    },
    Stats {
        reply: oneshot::Sender<RegistryStats>,
    },
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle to the registry actor. Cheap to clone; every connection task
/// holds one.
///
/// The puzzle store lives on the handle: puzzles are loaded and results
/// recorded by the caller, outside the actor, so a slow store never
/// stalls admission for everyone else.
pub struct Registry<S> {
    sender: mpsc::Sender<RegistryCommand>,
    store: Arc<S>,
}

impl<S> Clone for Registry<S> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: PuzzleStore> Registry<S> {
    /// Spawns the registry actor.
    pub fn spawn(
        config: RegistryConfig,
        room_config: RoomConfig,
        store: Arc<S>,
        log: LogProducer,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_size.max(1));
        let actor = RegistryActor {
            rooms: HashMap::new(),
            clients: HashMap::new(),
            next_room: 1,
            next_client: 1,
            config,
            room_config,
            log,
            receiver: rx,
        };
        tokio::spawn(actor.run());
        Self { sender: tx, store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Result<T, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(command(reply_tx))
            .await
            .map_err(|_| RoomError::RegistryUnavailable)?;
        reply_rx.await.map_err(|_| RoomError::RegistryUnavailable)
    }

    /// Allocates a new client id.
    ///
    /// # Errors
    /// [`RoomError::ResourceExhausted`] at `max_clients`.
    pub async fn register_client(&self) -> Result<ClientId, RoomError> {
        self.request(|reply| RegistryCommand::RegisterClient { reply })
            .await?
    }

    /// Forgets a client and returns the room it was in, if any. The
    /// caller withdraws it from that room.
    pub async fn remove_client(&self, client_id: ClientId) -> Result<Option<Arc<Room>>, RoomError> {
        self.request(|reply| RegistryCommand::RemoveClient { client_id, reply })
            .await
    }

    /// Creates an empty room for the selected puzzle.
    ///
    /// # Errors
    /// [`RoomError::ResourceExhausted`] at `max_rooms`, or a store error
    /// if the puzzle cannot be loaded.
    pub async fn create_room(
        &self,
        mode: GameMode,
        policy: DisciplinePolicy,
        game: GameSelector,
    ) -> Result<Arc<Room>, RoomError> {
        let puzzle = self.store.load_game(game).await?;
        self.request(|reply| RegistryCommand::CreateRoom {
            mode,
            policy,
            puzzle,
            reply,
        })
        .await?
    }

    /// Creates a room and seats its creator in one step, so nobody else
    /// can fill or start it first. If the creator cannot be seated the
    /// room is released again.
    pub async fn create_and_join(
        &self,
        client_id: ClientId,
        mode: GameMode,
        policy: DisciplinePolicy,
        game: GameSelector,
        premium: bool,
    ) -> Result<Joined, RoomError> {
        let puzzle = self.store.load_game(game).await?;
        self.request(|reply| RegistryCommand::CreateAndJoin {
            client_id,
            mode,
            policy,
            premium,
            puzzle,
            reply,
        })
        .await?
    }

    /// Joins a client to a forming room.
    pub async fn join_room(
        &self,
        room_id: RoomId,
        client_id: ClientId,
        premium: bool,
    ) -> Result<Joined, RoomError> {
        self.request(|reply| RegistryCommand::JoinRoom {
            room_id,
            client_id,
            premium,
            reply,
        })
        .await?
    }

    /// Joins the oldest open multiplayer room with this policy, or
    /// creates one with a random puzzle.
    pub async fn join_or_create(
        &self,
        client_id: ClientId,
        policy: DisciplinePolicy,
        premium: bool,
    ) -> Result<Joined, RoomError> {
        // Loaded up front so the actor never waits on the store. Unused if
        // an open room is found.
        let puzzle = self.store.load_game(GameSelector::Random).await?;
        self.request(|reply| RegistryCommand::JoinOrCreate {
            client_id,
            policy,
            premium,
            puzzle,
            reply,
        })
        .await?
    }

    pub async fn find_room(&self, room_id: RoomId) -> Result<Arc<Room>, RoomError> {
        self.request(|reply| RegistryCommand::FindRoom { room_id, reply })
            .await?
    }

    /// Every forming multiplayer room, oldest first.
    pub async fn list_rooms(&self) -> Result<Vec<RoomInfo>, RoomError> {
        self.request(|reply| RegistryCommand::ListRooms { reply })
            .await
    }

    /// Drops a room from the registry, freeing its slot. Returns `false`
    /// if it was already gone.
    pub async fn release_room(&self, room_id: RoomId) -> Result<bool, RoomError> {
        self.request(|reply| RegistryCommand::Release { room_id, reply })
            .await
    }

    /// Finishes a room and frees its slot.
    ///
    /// Statistics go to the store exactly once no matter how many of the
    /// room's clients call this. A room still forming is cancelled. Once
    /// the slot is released, further calls return `Ok(None)`.
    pub async fn finish(&self, room_id: RoomId) -> Result<Option<FinishOutcome>, RoomError> {
        let room = match self.find_room(room_id).await {
            Ok(room) => room,
            Err(RoomError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let outcome = room.finish(&*self.store).await?;
        self.release_room(room_id).await?;
        Ok(Some(outcome))
    }

    pub async fn stats(&self) -> Result<RegistryStats, RoomError> {
        self.request(|reply| RegistryCommand::Stats { reply })
            .await
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct RoomSlot {
    room: Arc<Room>,
    /// Aborted when the slot is dropped.
    _driver: AdmissionDriver,
}

struct RegistryActor {
    rooms: HashMap<RoomId, RoomSlot>,
    /// Every connected client and the room it is in. A client occupies at
    /// most one room at a time.
    clients: HashMap<ClientId, Option<RoomId>>,
    /// Ids are never reused for the life of the process.
    next_room: u64,
    next_client: u64,
    config: RegistryConfig,
    room_config: RoomConfig,
    log: LogProducer,
    receiver: mpsc::Receiver<RegistryCommand>,
}

impl RegistryActor {
    async fn run(mut self) {
        tracing::info!(
            max_rooms = self.config.max_rooms,
            max_clients = self.config.max_clients,
            "registry started"
        );

        while let Some(cmd) = self.receiver.recv().await {
            self.prune().await;
            match cmd {
                RegistryCommand::RegisterClient { reply } => {
                    let result = self.handle_register();
                    if let Ok(client_id) = &result {
                        self.audit(LogEvent::server("client registered").with_client(*client_id))
                            .await;
                    }
                    let _ = reply.send(result);
                }
                RegistryCommand::RemoveClient { client_id, reply } => {
                    let _ = reply.send(self.handle_remove(client_id));
                }
                RegistryCommand::CreateRoom {
                    mode,
                    policy,
                    puzzle,
                    reply,
                } => {
                    let result = self.handle_create(mode, policy, puzzle);
                    if let Ok(room) = &result {
                        self.audit(LogEvent::room(room.room_id(), "created")).await;
                    }
                    let _ = reply.send(result);
                }
                RegistryCommand::CreateAndJoin {
                    client_id,
                    mode,
                    policy,
                    premium,
                    puzzle,
                    reply,
                } => {
                    let result = self
                        .handle_create_and_join(client_id, mode, policy, premium, puzzle)
                        .await;
                    self.audit_join(client_id, &result).await;
                    let _ = reply.send(result);
                }
                RegistryCommand::JoinRoom {
                    room_id,
                    client_id,
                    premium,
                    reply,
                } => {
                    let result = self.handle_join(room_id, client_id, premium);
                    self.audit_join(client_id, &result).await;
                    let _ = reply.send(result);
                }
                RegistryCommand::JoinOrCreate {
                    client_id,
                    policy,
                    premium,
                    puzzle,
                    reply,
                } => {
                    let result = self.handle_join_or_create(client_id, policy, premium, puzzle);
                    self.audit_join(client_id, &result).await;
                    let _ = reply.send(result);
                }
                RegistryCommand::FindRoom { room_id, reply } => {
                    let result = self
                        .rooms
                        .get(&room_id)
                        .map(|slot| Arc::clone(&slot.room))
                        .ok_or(RoomError::NotFound(room_id));
                    let _ = reply.send(result);
                }
                RegistryCommand::ListRooms { reply } => {
                    let _ = reply.send(self.handle_list());
                }
                RegistryCommand::Release { room_id, reply } => {
                    let released = self.release(room_id).await;
                    let _ = reply.send(released);
                }
                RegistryCommand::Stats { reply } => {
                    let _ = reply.send(RegistryStats {
                        rooms: self.rooms.len(),
                        clients: self.clients.len(),
                    });
                }
            }
        }

        tracing::info!(rooms = self.rooms.len(), "registry stopped");
    }

    fn handle_register(&mut self) -> Result<ClientId, RoomError> {
        if self.clients.len() >= self.config.max_clients {
            return Err(RoomError::ResourceExhausted(format!(
                "{} clients connected",
                self.clients.len()
            )));
        }
        let client_id = ClientId(self.next_client);
        self.next_client += 1;
        self.clients.insert(client_id, None);
        tracing::debug!(%client_id, clients = self.clients.len(), "client registered");
        Ok(client_id)
    }

    fn handle_remove(&mut self, client_id: ClientId) -> Option<Arc<Room>> {
        let room_id = self.clients.remove(&client_id).flatten()?;
        tracing::debug!(%client_id, %room_id, "client removed");
        self.rooms.get(&room_id).map(|slot| Arc::clone(&slot.room))
    }

    fn handle_create(
        &mut self,
        mode: GameMode,
        policy: DisciplinePolicy,
        puzzle: Puzzle,
    ) -> Result<Arc<Room>, RoomError> {
        if self.rooms.len() >= self.config.max_rooms {
            return Err(RoomError::ResourceExhausted(format!(
                "{} rooms open",
                self.rooms.len()
            )));
        }
        let room_id = RoomId(self.next_room);
        self.next_room += 1;

        let room = Arc::new(Room::new(
            room_id,
            mode,
            policy,
            puzzle,
            &self.room_config,
            self.log.clone(),
        ));
        // Single-player rooms get one too, so an abandoned one is cancelled
        // rather than held forever.
        let driver = AdmissionDriver::spawn(
            Arc::clone(&room),
            TickConfig::with_interval(self.room_config.tick_interval).validated(),
        );
        self.rooms.insert(
            room_id,
            RoomSlot {
                room: Arc::clone(&room),
                _driver: driver,
            },
        );
        tracing::info!(
            %room_id,
            game_id = %room.game_id(),
            ?mode,
            ?policy,
            capacity = room.capacity(),
            "room created"
        );
        Ok(room)
    }

    fn handle_join(
        &mut self,
        room_id: RoomId,
        client_id: ClientId,
        premium: bool,
    ) -> Result<Joined, RoomError> {
        self.check_client(client_id)?;
        let room = self
            .rooms
            .get(&room_id)
            .map(|slot| Arc::clone(&slot.room))
            .ok_or(RoomError::NotFound(room_id))?;

        let admission = room.join(client_id, premium)?;
        self.clients.insert(client_id, Some(room_id));
        Ok(Joined { room, admission })
    }

    async fn handle_create_and_join(
        &mut self,
        client_id: ClientId,
        mode: GameMode,
        policy: DisciplinePolicy,
        premium: bool,
        puzzle: Puzzle,
    ) -> Result<Joined, RoomError> {
        self.check_client(client_id)?;
        let room_id = self.handle_create(mode, policy, puzzle)?.room_id();
        self.audit(LogEvent::room(room_id, "created").with_client(client_id))
            .await;
        match self.handle_join(room_id, client_id, premium) {
            Ok(joined) => Ok(joined),
            Err(e) => {
                self.release(room_id).await;
                Err(e)
            }
        }
    }

    fn handle_join_or_create(
        &mut self,
        client_id: ClientId,
        policy: DisciplinePolicy,
        premium: bool,
        puzzle: Puzzle,
    ) -> Result<Joined, RoomError> {
        self.check_client(client_id)?;
        let open = self
            .rooms
            .iter()
            .filter(|(_, slot)| slot.room.is_open_for(policy))
            .map(|(room_id, _)| *room_id)
            .min();

        let room_id = match open {
            Some(room_id) => room_id,
            None => self
                .handle_create(GameMode::MultiPlayer, policy, puzzle)?
                .room_id(),
        };
        self.handle_join(room_id, client_id, premium)
    }

    fn handle_list(&self) -> Vec<RoomInfo> {
        let mut rooms: Vec<RoomInfo> = self
            .rooms
            .values()
            .filter(|slot| slot.room.mode() == GameMode::MultiPlayer)
            .map(|slot| slot.room.info())
            .filter(|info| info.status == RoomStatus::Forming)
            .collect();
        rooms.sort_by_key(|info| info.room_id);
        rooms
    }

    fn check_client(&self, client_id: ClientId) -> Result<(), RoomError> {
        match self.clients.get(&client_id) {
            None => Err(RoomError::ClientNotFound(client_id)),
            Some(Some(current)) => Err(RoomError::InvalidState(format!(
                "client {client_id} is already in room {current}"
            ))),
            Some(None) => Ok(()),
        }
    }

    /// Every room leaves the registry through here, and each departure is
    /// audited once.
    async fn release(&mut self, room_id: RoomId) -> bool {
        if self.rooms.remove(&room_id).is_none() {
            return false;
        }
        for slot in self.clients.values_mut() {
            if *slot == Some(room_id) {
                *slot = None;
            }
        }
        tracing::info!(%room_id, rooms = self.rooms.len(), "room released");
        self.audit(LogEvent::room(room_id, "deleted")).await;
        true
    }

    /// Releases rooms that reached Deleted on their own: finished by a
    /// client or cancelled by admission.
    async fn prune(&mut self) {
        let deleted: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|(_, slot)| slot.room.status() == RoomStatus::Deleted)
            .map(|(room_id, _)| *room_id)
            .collect();
        for room_id in deleted {
            self.release(room_id).await;
        }
    }

    async fn audit_join(&self, client_id: ClientId, result: &Result<Joined, RoomError>) {
        match result {
            Ok(joined) => {
                self.audit(LogEvent::room(joined.room.room_id(), "joined").with_client(client_id))
                    .await;
            }
            Err(e) => tracing::debug!(%client_id, error = %e, "join refused"),
        }
    }

    async fn audit(&self, event: LogEvent) {
        if let Err(e) = self.log.log(event).await {
            tracing::debug!(error = %e, "audit log unavailable");
        }
    }
}

#[cfg(test)]
mod tests {
    use rowforge_sync::{LogPipeline, MemorySink};

    use super::*;
    use crate::MemoryPuzzleStore;

    fn registry(config: RegistryConfig) -> Registry<MemoryPuzzleStore> {
        Registry::spawn(
            config,
            RoomConfig::default(),
            Arc::new(MemoryPuzzleStore::with_builtin()),
            LogProducer::detached(),
        )
    }

    #[tokio::test]
    async fn test_client_ids_are_monotonic() {
        let registry = registry(RegistryConfig::default());
        let a = registry.register_client().await.unwrap();
        let b = registry.register_client().await.unwrap();
        registry.remove_client(a).await.unwrap();
        let c = registry.register_client().await.unwrap();
        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn test_client_limit() {
        let registry = registry(RegistryConfig {
            max_clients: 1,
            ..RegistryConfig::default()
        });
        registry.register_client().await.unwrap();
        assert!(matches!(
            registry.register_client().await,
            Err(RoomError::ResourceExhausted(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_room_and_client() {
        let registry = registry(RegistryConfig::default());
        let client = registry.register_client().await.unwrap();
        assert!(matches!(
            registry.join_room(RoomId(99), client, false).await,
            Err(RoomError::NotFound(RoomId(99)))
        ));
        let room = registry
            .create_room(GameMode::MultiPlayer, DisciplinePolicy::default(), GameSelector::Random)
            .await
            .unwrap();
        assert!(matches!(
            registry.join_room(room.room_id(), ClientId(42), false).await,
            Err(RoomError::ClientNotFound(ClientId(42)))
        ));
    }

    #[tokio::test]
    async fn test_one_room_per_client() {
        let registry = registry(RegistryConfig::default());
        let client = registry.register_client().await.unwrap();
        let first = registry
            .join_or_create(client, DisciplinePolicy::ReaderWriter, false)
            .await
            .unwrap();
        let other = registry
            .create_room(
                GameMode::MultiPlayer,
                DisciplinePolicy::ReaderWriter,
                GameSelector::Random,
            )
            .await
            .unwrap();
        assert!(matches!(
            registry.join_room(other.room_id(), client, false).await,
            Err(RoomError::InvalidState(_))
        ));

        let left = registry.remove_client(client).await.unwrap().unwrap();
        assert_eq!(left.room_id(), first.room.room_id());
    }

    #[tokio::test]
    async fn test_join_or_create_matches_policy() {
        let registry = registry(RegistryConfig::default());
        let a = registry.register_client().await.unwrap();
        let b = registry.register_client().await.unwrap();
        let c = registry.register_client().await.unwrap();

        let rw = DisciplinePolicy::ReaderWriter;
        let barber = DisciplinePolicy::BarberShop(rowforge_protocol::QueueOrder::Fifo);
        let ja = registry.join_or_create(a, rw, false).await.unwrap();
        let jb = registry.join_or_create(b, rw, false).await.unwrap();
        let jc = registry.join_or_create(c, barber, false).await.unwrap();

        assert_eq!(ja.room.room_id(), jb.room.room_id());
        assert_ne!(ja.room.room_id(), jc.room.room_id());

        let listed = registry.list_rooms().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].joined, 2);
        assert_eq!(registry.stats().await.unwrap(), RegistryStats { rooms: 2, clients: 3 });
    }

    #[tokio::test]
    async fn test_release_frees_slot_and_is_idempotent() {
        let registry = registry(RegistryConfig {
            max_rooms: 1,
            ..RegistryConfig::default()
        });
        let room = registry
            .create_room(GameMode::SinglePlayer, DisciplinePolicy::default(), GameSelector::Random)
            .await
            .unwrap();
        assert!(matches!(
            registry
                .create_room(
                    GameMode::SinglePlayer,
                    DisciplinePolicy::default(),
                    GameSelector::Random,
                )
                .await,
            Err(RoomError::ResourceExhausted(_))
        ));
        assert!(registry.release_room(room.room_id()).await.unwrap());
        assert!(!registry.release_room(room.room_id()).await.unwrap());
        registry
            .create_room(GameMode::SinglePlayer, DisciplinePolicy::default(), GameSelector::Random)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_and_join_seats_the_creator_first() {
        let registry = Registry::spawn(
            RegistryConfig::default(),
            RoomConfig {
                capacity: 1,
                ..RoomConfig::default()
            },
            Arc::new(MemoryPuzzleStore::with_builtin()),
            LogProducer::detached(),
        );
        let creator = registry.register_client().await.unwrap();
        let intruder = registry.register_client().await.unwrap();

        // The intruder keeps trying the first room id until it exists.
        let racing = registry.clone();
        let race = tokio::spawn(async move {
            loop {
                match racing.join_room(RoomId(1), intruder, false).await {
                    Err(RoomError::NotFound(_)) => tokio::task::yield_now().await,
                    other => return other,
                }
            }
        });
        let joined = registry
            .create_and_join(
                creator,
                GameMode::MultiPlayer,
                DisciplinePolicy::ReaderWriter,
                GameSelector::Random,
                false,
            )
            .await
            .unwrap();
        assert_eq!(joined.room.room_id(), RoomId(1));
        assert_eq!(joined.room.joined(), vec![creator]);

        let lost = tokio::time::timeout(std::time::Duration::from_secs(5), race)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            lost,
            Err(RoomError::RoomFull(_) | RoomError::RoomAlreadyRunning(_))
        ));
    }

    #[tokio::test]
    async fn test_create_and_join_leaves_no_room_behind_on_refusal() {
        let registry = registry(RegistryConfig::default());
        let client = registry.register_client().await.unwrap();
        registry
            .join_or_create(client, DisciplinePolicy::ReaderWriter, false)
            .await
            .unwrap();
        assert_eq!(registry.stats().await.unwrap().rooms, 1);

        assert!(matches!(
            registry
                .create_and_join(
                    client,
                    GameMode::MultiPlayer,
                    DisciplinePolicy::ReaderWriter,
                    GameSelector::Random,
                    false,
                )
                .await,
            Err(RoomError::InvalidState(_))
        ));
        assert!(matches!(
            registry
                .create_and_join(
                    ClientId(42),
                    GameMode::SinglePlayer,
                    DisciplinePolicy::default(),
                    GameSelector::Random,
                    false,
                )
                .await,
            Err(RoomError::ClientNotFound(ClientId(42)))
        ));
        assert_eq!(registry.stats().await.unwrap().rooms, 1);
    }

    #[tokio::test]
    async fn test_every_room_departure_is_audited() {
        let sink = Arc::new(MemorySink::new());
        let (log, consumer) = LogPipeline::spawn(Arc::clone(&sink), LogPipeline::DEFAULT_CAPACITY);
        let registry = Registry::spawn(
            RegistryConfig::default(),
            RoomConfig::default(),
            Arc::new(MemoryPuzzleStore::with_builtin()),
            log,
        );
        let client = registry.register_client().await.unwrap();

        // Released explicitly.
        let released = registry
            .create_room(GameMode::MultiPlayer, DisciplinePolicy::default(), GameSelector::Random)
            .await
            .unwrap();
        assert!(registry.release_room(released.room_id()).await.unwrap());

        // Cancelled by finishing it while still forming.
        let joined = registry
            .create_and_join(
                client,
                GameMode::MultiPlayer,
                DisciplinePolicy::default(),
                GameSelector::Random,
                false,
            )
            .await
            .unwrap();
        let finished = joined.room.room_id();
        assert!(registry.finish(finished).await.unwrap().is_some());
        assert!(registry.finish(finished).await.unwrap().is_none());

        drop(joined);
        drop(released);
        drop(registry);
        tokio::time::timeout(std::time::Duration::from_secs(5), consumer)
            .await
            .unwrap()
            .unwrap();

        let deleted: Vec<LogEvent> = sink
            .events()
            .into_iter()
            .filter(|e| e.message == "deleted")
            .collect();
        assert_eq!(deleted.len(), 2);
    }
}
