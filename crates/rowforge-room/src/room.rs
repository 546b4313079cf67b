//! A room: one shared board and the clients playing it.
//!
//! Unlike the registry, a room is not an actor. Its clients' connection
//! tasks call into it directly and meet inside its synchronization
//! primitives:
//!
//! ```text
//!            join ──► entry queue ──► start_round releases in policy order
//!                                            │
//!   per round:  start gate ─► submit_row (write access) ─► end gate ─► snapshot (read access)
//! ```
//!
//! Lifecycle bookkeeping sits behind one short-held std mutex that is
//! never held across an `.await`. Board access goes through the room's
//! [`AccessDiscipline`]; the board mutex underneath it only makes the
//! data `Sync` and is held for a handful of cell writes at most.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rowforge_protocol::{
    Board, BoardSnapshot, ClientId, DisciplinePolicy, GameId, GameMode, RoomId, RoomListEntry,
    Row, BOARD_SIZE,
};
use rowforge_sync::{
    AccessDiscipline, AccessMode, CriticalAccess, Gate, LogEvent, LogProducer, QueuePolicy,
    TurnBarrier, WaitQueue,
};
use rowforge_tick::Countdown;
use tokio::sync::futures::Notified;
use tokio::sync::{broadcast, oneshot, Notify};
use tokio::time::Instant;

use crate::{Puzzle, PuzzleStore, RoomConfig, RoomError, RoomStatus};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Something that happened in a room, broadcast to every subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    /// Admission countdown update.
    Countdown { remaining: u32 },
    /// The room left admission with these players.
    Started { players: Vec<ClientId> },
    /// Every participant passed the end gate of `row`.
    RoundComplete { row: u8 },
    Finished(FinishSummary),
    Cancelled { reason: String },
}

/// One client's final score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientResult {
    pub client_id: ClientId,
    /// Correct digits over submitted free cells, `0.0..=1.0`.
    pub accuracy: f64,
}

/// What a finished room reports.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishSummary {
    pub elapsed: Duration,
    pub results: Vec<ClientResult>,
}

impl FinishSummary {
    pub fn accuracy_of(&self, client_id: ClientId) -> Option<f64> {
        self.results
            .iter()
            .find(|r| r.client_id == client_id)
            .map(|r| r.accuracy)
    }
}

/// Outcome of [`Room::finish`].
#[derive(Debug, Clone, PartialEq)]
pub enum FinishOutcome {
    /// This call recorded the statistics.
    Recorded(FinishSummary),
    /// An earlier call already did. Nothing was recorded again.
    AlreadyFinished(FinishSummary),
    /// The room never started and was cancelled instead.
    Cancelled,
}

/// Outcome of one admission [`Room::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Counting { remaining: u32, announced: bool },
    /// The room started; clients listed in release order.
    Started(Vec<ClientId>),
    Cancelled,
    /// The room is no longer forming.
    Inactive,
}

/// Result of a row submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowOutcome {
    /// 1-based row the submission applied to.
    pub row: u8,
    /// Every free cell in the row matched the solution.
    pub correct: bool,
    pub snapshot: BoardSnapshot,
}

/// A snapshot of room metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub room_id: RoomId,
    pub game_id: GameId,
    pub mode: GameMode,
    pub policy: DisciplinePolicy,
    pub status: RoomStatus,
    pub joined: usize,
    pub capacity: usize,
    /// Admission ticks left.
    pub remaining: u32,
}

impl From<&RoomInfo> for RoomListEntry {
    fn from(info: &RoomInfo) -> Self {
        Self {
            room_id: info.room_id,
            mode: info.mode,
            policy: info.policy,
            joined: info.joined,
            capacity: info.capacity,
            remaining: info.remaining,
        }
    }
}

/// Proof of a successful join, redeemed with [`Room::await_admission`].
#[derive(Debug)]
pub struct Admission {
    client_id: ClientId,
    released: oneshot::Receiver<()>,
}

impl Admission {
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
struct Score {
    correct: u32,
    submitted: u32,
}

impl Score {
    fn accuracy(&self) -> f64 {
        if self.submitted == 0 {
            0.0
        } else {
            f64::from(self.correct) / f64::from(self.submitted)
        }
    }
}

struct Lifecycle {
    status: RoomStatus,
    /// Insertion order is join order.
    joined: Vec<ClientId>,
    premium: HashSet<ClientId>,
    /// Withdrawn after the room started. Still counted for statistics.
    departed: HashSet<ClientId>,
    countdown: Countdown,
    started_at: Option<Instant>,
    finished: bool,
    summary: Option<FinishSummary>,
    scores: HashMap<ClientId, Score>,
}

struct BoardState {
    grid: Board,
    /// 1-based; `BOARD_SIZE + 1` once every row is done.
    current_row: u8,
}

impl BoardState {
    fn snapshot(&self) -> BoardSnapshot {
        BoardSnapshot {
            grid: self.grid,
            current_row: self.current_row,
        }
    }

    fn is_complete(&self) -> bool {
        usize::from(self.current_row) > BOARD_SIZE
    }
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

/// A shared game session. Held behind an `Arc` by the registry and by
/// every connection playing in it.
pub struct Room {
    room_id: RoomId,
    game_id: GameId,
    mode: GameMode,
    policy: DisciplinePolicy,
    capacity: usize,
    initial: Board,
    solution: Board,
    board: Mutex<BoardState>,
    lifecycle: Mutex<Lifecycle>,
    /// `None` for single-player rooms.
    discipline: Option<AccessDiscipline>,
    barrier: TurnBarrier,
    entry: WaitQueue<oneshot::Sender<()>>,
    events: broadcast::Sender<RoomEvent>,
    /// Poked when the room fills up or closes, so the admission driver
    /// does not wait for its next tick.
    wake: Notify,
    log: LogProducer,
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("room_id", &self.room_id)
            .field("game_id", &self.game_id)
            .field("mode", &self.mode)
            .field("policy", &self.policy)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Room {
    /// Creates a room. Single-player rooms hold exactly one client and
    /// skip admission; multiplayer rooms start Forming.
    ///
    /// Must be called inside a tokio runtime: a barber-shop discipline
    /// spawns its barber task here.
    pub fn new(
        room_id: RoomId,
        mode: GameMode,
        policy: DisciplinePolicy,
        puzzle: Puzzle,
        config: &RoomConfig,
        log: LogProducer,
    ) -> Self {
        let capacity = match mode {
            GameMode::SinglePlayer => 1,
            GameMode::MultiPlayer => config.capacity.max(1),
        };
        let discipline = match mode {
            GameMode::SinglePlayer => None,
            GameMode::MultiPlayer => Some(AccessDiscipline::for_policy(
                policy,
                capacity,
                config.max_waiting_time,
            )),
        };
        let entry_policy =
            QueuePolicy::new(policy.queue_order()).with_max_waiting_time(config.max_waiting_time);
        let (events, _) = broadcast::channel(config.event_buffer.max(1));

        Self {
            room_id,
            game_id: puzzle.game_id,
            mode,
            policy,
            capacity,
            initial: puzzle.board,
            solution: puzzle.solution,
            board: Mutex::new(BoardState {
                grid: puzzle.board,
                current_row: 1,
            }),
            lifecycle: Mutex::new(Lifecycle {
                status: RoomStatus::Forming,
                joined: Vec::with_capacity(capacity),
                premium: HashSet::new(),
                departed: HashSet::new(),
                countdown: Countdown::new(
                    config.admission_secs,
                    config.announce_every,
                    config.final_countdown,
                ),
                started_at: None,
                finished: false,
                summary: None,
                scores: HashMap::new(),
            }),
            discipline,
            barrier: TurnBarrier::new(0),
            entry: WaitQueue::new(capacity * 2, entry_policy),
            events,
            wake: Notify::new(),
            log,
        }
    }

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    pub fn game_id(&self) -> GameId {
        self.game_id
    }

    pub fn mode(&self) -> GameMode {
        self.mode
    }

    pub fn policy(&self) -> DisciplinePolicy {
        self.policy
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn status(&self) -> RoomStatus {
        self.lifecycle().status
    }

    /// Joined clients in join order.
    pub fn joined(&self) -> Vec<ClientId> {
        self.lifecycle().joined.clone()
    }

    pub fn info(&self) -> RoomInfo {
        let lc = self.lifecycle();
        RoomInfo {
            room_id: self.room_id,
            game_id: self.game_id,
            mode: self.mode,
            policy: self.policy,
            status: lc.status,
            joined: lc.joined.len(),
            capacity: self.capacity,
            remaining: lc.countdown.remaining(),
        }
    }

    /// Final results, once the room has finished.
    pub fn summary(&self) -> Option<FinishSummary> {
        self.lifecycle().summary.clone()
    }

    /// Whether a join-or-create request for `policy` may land here.
    pub fn is_open_for(&self, policy: DisciplinePolicy) -> bool {
        let lc = self.lifecycle();
        self.mode == GameMode::MultiPlayer
            && self.policy == policy
            && lc.status.is_joinable()
            && lc.joined.len() < self.capacity
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.events.subscribe()
    }

    pub(crate) fn woken(&self) -> Notified<'_> {
        self.wake.notified()
    }

    // -----------------------------------------------------------------
    // Admission
    // -----------------------------------------------------------------

    /// Adds a client and parks its admission ticket on the entry queue.
    ///
    /// A single-player room starts on its one join; a multiplayer room
    /// that just filled up wakes its admission driver.
    pub fn join(&self, client_id: ClientId, premium: bool) -> Result<Admission, RoomError> {
        let mut lc = self.lifecycle();
        if !lc.status.is_joinable() {
            return Err(RoomError::RoomAlreadyRunning(self.room_id));
        }
        if lc.joined.contains(&client_id) {
            return Err(RoomError::InvalidState(format!(
                "client {client_id} already joined room {}",
                self.room_id
            )));
        }
        if lc.joined.len() >= self.capacity {
            return Err(RoomError::RoomFull(self.room_id));
        }

        let (release, released) = oneshot::channel();
        self.entry.try_enqueue(client_id, premium, release)?;
        lc.joined.push(client_id);
        if premium {
            lc.premium.insert(client_id);
        }
        lc.scores.insert(client_id, Score::default());
        tracing::info!(
            room_id = %self.room_id,
            %client_id,
            premium,
            joined = lc.joined.len(),
            capacity = self.capacity,
            "client joined"
        );

        match self.mode {
            GameMode::SinglePlayer => {
                self.start_locked(&mut lc)?;
            }
            GameMode::MultiPlayer if lc.joined.len() == self.capacity => {
                self.wake.notify_one();
            }
            GameMode::MultiPlayer => {}
        }

        Ok(Admission {
            client_id,
            released,
        })
    }

    /// Waits until the room starts and releases this client.
    ///
    /// # Errors
    /// [`RoomError::Unavailable`] if the room is cancelled, or the client
    /// withdrawn, first.
    pub async fn await_admission(&self, admission: Admission) -> Result<(), RoomError> {
        admission
            .released
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id))?;
        tracing::debug!(room_id = %self.room_id, client_id = %admission.client_id, "admitted");
        Ok(())
    }

    /// Forming → Running. Releases every parked client in the entry
    /// queue's service order and returns that order.
    pub async fn start_round(&self) -> Result<Vec<ClientId>, RoomError> {
        let order = {
            let mut lc = self.lifecycle();
            self.start_locked(&mut lc)?
        };
        self.audit(LogEvent::room(self.room_id, format!("started with {} players", order.len())))
            .await;
        Ok(order)
    }

    /// Advances the admission countdown by one tick.
    ///
    /// A full room starts at once. When the countdown runs out, the room
    /// starts with whoever joined, or is cancelled if nobody did.
    pub async fn tick(&self) -> TickOutcome {
        self.admission_step(true).await
    }

    /// Like [`tick`](Self::tick) but without using up countdown time:
    /// starts the room if it is full, otherwise reports where it stands.
    pub(crate) async fn check_admission(&self) -> TickOutcome {
        self.admission_step(false).await
    }

    async fn admission_step(&self, elapse: bool) -> TickOutcome {
        let outcome = {
            let mut lc = self.lifecycle();
            if lc.status != RoomStatus::Forming {
                return TickOutcome::Inactive;
            }

            if lc.joined.len() >= self.capacity {
                self.start_or_inactive(&mut lc)
            } else if !elapse {
                TickOutcome::Counting {
                    remaining: lc.countdown.remaining(),
                    announced: false,
                }
            } else {
                let step = lc.countdown.tick();
                if !step.expired() {
                    if step.announce {
                        let _ = self.events.send(RoomEvent::Countdown {
                            remaining: step.remaining,
                        });
                    }
                    TickOutcome::Counting {
                        remaining: step.remaining,
                        announced: step.announce,
                    }
                } else if lc.joined.is_empty() {
                    self.cancel_locked(&mut lc, "admission countdown expired with no players");
                    TickOutcome::Cancelled
                } else {
                    tracing::info!(
                        room_id = %self.room_id,
                        joined = lc.joined.len(),
                        capacity = self.capacity,
                        "admission countdown expired, starting with partial roster"
                    );
                    self.start_or_inactive(&mut lc)
                }
            }
        };

        match &outcome {
            TickOutcome::Started(order) => {
                self.audit(LogEvent::room(
                    self.room_id,
                    format!("started with {} players", order.len()),
                ))
                .await;
            }
            TickOutcome::Cancelled => {
                self.audit(LogEvent::room(self.room_id, "cancelled: nobody joined")).await;
            }
            TickOutcome::Counting { .. } | TickOutcome::Inactive => {}
        }
        outcome
    }

    fn start_or_inactive(&self, lc: &mut Lifecycle) -> TickOutcome {
        match self.start_locked(lc) {
            Ok(order) => TickOutcome::Started(order),
            Err(e) => {
                tracing::warn!(
                    room_id = %self.room_id,
                    error = %e,
                    "admission could not start room"
                );
                TickOutcome::Inactive
            }
        }
    }

    fn start_locked(&self, lc: &mut Lifecycle) -> Result<Vec<ClientId>, RoomError> {
        if !lc.status.can_transition_to(RoomStatus::Running) {
            return Err(RoomError::InvalidState(format!(
                "cannot start room in state {}",
                lc.status
            )));
        }
        if lc.joined.is_empty() {
            return Err(RoomError::InvalidState("cannot start an empty room".into()));
        }

        lc.status = RoomStatus::Running;
        lc.started_at = Some(Instant::now());
        lc.countdown.cancel();
        self.barrier.set_parties(lc.joined.len());

        let mut order = Vec::with_capacity(lc.joined.len());
        while let Some(entry) = self.entry.try_dequeue() {
            order.push(entry.client_id);
            let _ = entry.item.send(());
        }

        tracing::info!(
            room_id = %self.room_id,
            players = lc.joined.len(),
            release_order = ?order,
            "room running"
        );
        let _ = self.events.send(RoomEvent::Started {
            players: lc.joined.clone(),
        });
        self.wake.notify_one();
        Ok(order)
    }

    fn cancel_locked(&self, lc: &mut Lifecycle, reason: &str) {
        lc.status = RoomStatus::Deleted;
        lc.countdown.cancel();
        // Dropping the parked tickets fails every pending admission.
        while self.entry.try_dequeue().is_some() {}
        self.entry.close();

        tracing::info!(room_id = %self.room_id, reason, "room cancelled");
        let _ = self.events.send(RoomEvent::Cancelled {
            reason: reason.to_string(),
        });
        self.wake.notify_one();
    }

    // -----------------------------------------------------------------
    // Rounds
    // -----------------------------------------------------------------

    /// Plays the current round for one client: start gate, guarded
    /// submission, end gate, guarded read of the result.
    ///
    /// The last client through the end gate advances the current row.
    /// A rejected submission still passes the end gate so the others are
    /// not left waiting, and its error is returned afterwards.
    pub async fn play_round(&self, client_id: ClientId, row: Row) -> Result<RowOutcome, RoomError> {
        self.check_player(client_id)?;

        self.barrier.start_gate().await?;
        let submitted = self.submit_row(client_id, row).await;

        let mut completed = None;
        self.barrier
            .end_gate_with(|| completed = Some(self.advance_row()))
            .await?;
        if let Some(row) = completed {
            tracing::debug!(room_id = %self.room_id, row, "round complete");
            let _ = self.events.send(RoomEvent::RoundComplete { row });
        }

        let outcome = submitted?;
        let snapshot = self.snapshot(client_id).await?;
        Ok(RowOutcome { snapshot, ..outcome })
    }

    /// Writes a client's digits for the current row under write access.
    ///
    /// Cells given in the puzzle are never touched. Free cells are
    /// written only where the digit matches the solution.
    pub async fn submit_row(&self, client_id: ClientId, row: Row) -> Result<RowOutcome, RoomError> {
        let premium = self.check_player(client_id)?;

        let access = self.enter(client_id, premium, AccessMode::Write).await?;
        let written = self.write_row(&row);
        leave(access).await;

        let (outcome, score) = written?;
        {
            let mut lc = self.lifecycle();
            let total = lc.scores.entry(client_id).or_default();
            total.correct += score.correct;
            total.submitted += score.submitted;
        }
        tracing::debug!(
            room_id = %self.room_id,
            %client_id,
            row = outcome.row,
            correct = outcome.correct,
            "row submitted"
        );
        Ok(outcome)
    }

    fn write_row(&self, row: &Row) -> Result<(RowOutcome, Score), RoomError> {
        let mut board = self.board();
        if board.is_complete() {
            return Err(RoomError::InvalidState("board is already complete".into()));
        }
        let index = usize::from(board.current_row) - 1;
        let given = self.initial.rows()[index];
        let solved = self.solution.rows()[index];

        let mut score = Score::default();
        for col in 0..BOARD_SIZE {
            if given[col] != 0 {
                continue;
            }
            score.submitted += 1;
            if row[col] == solved[col] {
                score.correct += 1;
                board.grid.set(index, col, row[col]);
            }
        }

        let outcome = RowOutcome {
            row: board.current_row,
            correct: score.correct == score.submitted,
            snapshot: board.snapshot(),
        };
        Ok((outcome, score))
    }

    /// Returns the finished row number.
    fn advance_row(&self) -> u8 {
        let mut board = self.board();
        let done = board.current_row;
        if !board.is_complete() {
            board.current_row += 1;
        }
        done
    }

    /// Reads the board under read access.
    pub async fn snapshot(&self, client_id: ClientId) -> Result<BoardSnapshot, RoomError> {
        let premium = {
            let lc = self.lifecycle();
            if !lc.joined.contains(&client_id) || lc.departed.contains(&client_id) {
                return Err(RoomError::NotInRoom(client_id, self.room_id));
            }
            lc.premium.contains(&client_id)
        };
        let access = self.enter(client_id, premium, AccessMode::Read).await?;
        let snapshot = self.board().snapshot();
        leave(access).await;
        Ok(snapshot)
    }

    pub fn is_complete(&self) -> bool {
        self.board().is_complete()
    }

    async fn enter(
        &self,
        client_id: ClientId,
        premium: bool,
        mode: AccessMode,
    ) -> Result<Option<CriticalAccess<'_>>, RoomError> {
        match &self.discipline {
            Some(discipline) => Ok(Some(
                discipline
                    .enter_critical_access(client_id, premium, mode)
                    .await?,
            )),
            None => Ok(None),
        }
    }

    /// Running, joined, and not withdrawn. Returns the premium flag.
    fn check_player(&self, client_id: ClientId) -> Result<bool, RoomError> {
        let lc = self.lifecycle();
        if lc.status != RoomStatus::Running {
            return Err(RoomError::InvalidState(format!(
                "room {} is {}",
                self.room_id, lc.status
            )));
        }
        if !lc.joined.contains(&client_id) || lc.departed.contains(&client_id) {
            return Err(RoomError::NotInRoom(client_id, self.room_id));
        }
        Ok(lc.premium.contains(&client_id))
    }

    // -----------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------

    /// Running → Finished → Deleted, exactly once.
    ///
    /// Records elapsed time and accuracy for every joined client through
    /// `store`. A store failure is logged and skipped. A room still
    /// forming is cancelled instead.
    pub async fn finish<S: PuzzleStore>(&self, store: &S) -> Result<FinishOutcome, RoomError> {
        let summary = {
            let mut lc = self.lifecycle();
            match lc.status {
                RoomStatus::Forming => {
                    self.cancel_locked(&mut lc, "room closed before it started");
                    return Ok(FinishOutcome::Cancelled);
                }
                RoomStatus::Running if !lc.finished => {
                    lc.finished = true;
                    lc.status = RoomStatus::Finished;
                    let elapsed = lc.started_at.map(|t| t.elapsed()).unwrap_or_default();
                    let results = lc
                        .joined
                        .iter()
                        .map(|client_id| ClientResult {
                            client_id: *client_id,
                            accuracy: lc.scores.get(client_id).map_or(0.0, Score::accuracy),
                        })
                        .collect();
                    let summary = FinishSummary { elapsed, results };
                    lc.summary = Some(summary.clone());
                    summary
                }
                _ => {
                    return Ok(match &lc.summary {
                        Some(summary) => FinishOutcome::AlreadyFinished(summary.clone()),
                        None => FinishOutcome::Cancelled,
                    });
                }
            }
        };

        for result in &summary.results {
            match store
                .update_statistics(self.game_id, summary.elapsed, result.accuracy)
                .await
            {
                Ok(record) => tracing::debug!(
                    room_id = %self.room_id,
                    game_id = %self.game_id,
                    client_id = %result.client_id,
                    plays = record.plays,
                    "statistics recorded"
                ),
                Err(e) => tracing::warn!(
                    room_id = %self.room_id,
                    game_id = %self.game_id,
                    client_id = %result.client_id,
                    error = %e,
                    "statistics not recorded"
                ),
            }
        }

        self.lifecycle().status = RoomStatus::Deleted;
        tracing::info!(
            room_id = %self.room_id,
            elapsed_ms = summary.elapsed.as_millis(),
            "room finished"
        );
        let _ = self.events.send(RoomEvent::Finished(summary.clone()));
        self.audit(LogEvent::game(
            self.game_id,
            format!("room {} finished in {} ms", self.room_id, summary.elapsed.as_millis()),
        ))
        .await;

        Ok(FinishOutcome::Recorded(summary))
    }

    /// Takes a client out of the room after its connection failed or it
    /// quit.
    ///
    /// While forming, the client leaves the roster and the entry queue.
    /// Once running, it is marked departed and the barrier shrinks so the
    /// others are not stranded; if everyone left was already waiting at
    /// the end gate, the round completes here.
    ///
    /// Returns how many participants are still active.
    pub async fn withdraw(&self, client_id: ClientId) -> Result<usize, RoomError> {
        let (active, completed) = {
            let mut lc = self.lifecycle();
            match lc.status {
                RoomStatus::Forming => {
                    let pos = lc
                        .joined
                        .iter()
                        .position(|c| *c == client_id)
                        .ok_or(RoomError::NotInRoom(client_id, self.room_id))?;
                    lc.joined.remove(pos);
                    lc.premium.remove(&client_id);
                    lc.scores.remove(&client_id);
                    self.entry.remove(client_id);
                    (lc.joined.len(), None)
                }
                RoomStatus::Running => {
                    if !lc.joined.contains(&client_id) || !lc.departed.insert(client_id) {
                        return Err(RoomError::NotInRoom(client_id, self.room_id));
                    }
                    let mut completed = None;
                    self.barrier.withdraw(|gate| {
                        if gate == Gate::End {
                            completed = Some(self.advance_row());
                        }
                    });
                    (lc.joined.len() - lc.departed.len(), completed)
                }
                RoomStatus::Finished | RoomStatus::Deleted => (0, None),
            }
        };

        tracing::info!(room_id = %self.room_id, %client_id, active, "client withdrew");
        if let Some(row) = completed {
            let _ = self.events.send(RoomEvent::RoundComplete { row });
        }
        self.audit(LogEvent::room(self.room_id, "withdrew").with_client(client_id))
            .await;
        Ok(active)
    }

    // -----------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn board(&self) -> MutexGuard<'_, BoardState> {
        self.board.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn audit(&self, event: LogEvent) {
        if let Err(e) = self.log.log(event).await {
            tracing::debug!(room_id = %self.room_id, error = %e, "audit log unavailable");
        }
    }
}

async fn leave(access: Option<CriticalAccess<'_>>) {
    if let Some(access) = access {
        access.leave_critical_access().await;
    }
}

#[cfg(test)]
mod tests {
    use rowforge_protocol::QueueOrder;

    use super::*;
    use crate::{GameSelector, MemoryPuzzleStore};

    async fn puzzle() -> Puzzle {
        MemoryPuzzleStore::with_builtin()
            .load_game(GameSelector::Id(GameId(1)))
            .await
            .unwrap()
    }

    async fn room(mode: GameMode, capacity: usize) -> Room {
        let config = RoomConfig {
            capacity,
            ..RoomConfig::default()
        };
        Room::new(
            RoomId(1),
            mode,
            DisciplinePolicy::ReaderWriter,
            puzzle().await,
            &config,
            LogProducer::detached(),
        )
    }

    #[tokio::test]
    async fn test_single_player_runs_on_join() {
        let room = room(GameMode::SinglePlayer, 5).await;
        assert_eq!(room.capacity(), 1);
        let admission = room.join(ClientId(1), false).unwrap();
        assert_eq!(room.status(), RoomStatus::Running);
        room.await_admission(admission).await.unwrap();
        assert!(room.discipline.is_none());
    }

    #[tokio::test]
    async fn test_join_refuses_past_capacity() {
        let room = room(GameMode::MultiPlayer, 2).await;
        room.join(ClientId(1), false).unwrap();
        room.join(ClientId(2), false).unwrap();
        assert!(matches!(room.join(ClientId(3), false), Err(RoomError::RoomFull(_))));
        assert_eq!(room.joined().len(), 2);
    }

    #[tokio::test]
    async fn test_join_after_start_is_already_running() {
        let room = room(GameMode::MultiPlayer, 3).await;
        room.join(ClientId(1), false).unwrap();
        room.start_round().await.unwrap();
        assert!(matches!(
            room.join(ClientId(2), false),
            Err(RoomError::RoomAlreadyRunning(_))
        ));
    }

    #[tokio::test]
    async fn test_submission_keeps_given_cells_and_drops_wrong_digits() {
        let room = room(GameMode::SinglePlayer, 1).await;
        room.join(ClientId(1), false).unwrap();

        // Row 1 is 5 3 . . 7 . . . . and solves to 534678912.
        // Overwrite the givens with 9s and get one free cell wrong.
        let row = [9, 9, 4, 6, 9, 8, 1, 1, 2];
        let outcome = room.play_round(ClientId(1), row).await.unwrap();
        assert_eq!(outcome.row, 1);
        assert!(!outcome.correct);

        let grid = outcome.snapshot.grid;
        assert_eq!(grid.row(0), Some(&[5, 3, 4, 6, 7, 8, 0, 1, 2]));
        assert_eq!(outcome.snapshot.current_row, 2);
    }

    #[tokio::test]
    async fn test_tick_cancels_empty_room_on_expiry() {
        let config = RoomConfig {
            admission_secs: 2,
            ..RoomConfig::default()
        };
        let room = Room::new(
            RoomId(9),
            GameMode::MultiPlayer,
            DisciplinePolicy::BarberShop(QueueOrder::Fifo),
            puzzle().await,
            &config,
            LogProducer::detached(),
        );
        let mut events = room.subscribe();

        assert_eq!(
            room.tick().await,
            TickOutcome::Counting {
                remaining: 1,
                announced: true
            }
        );
        assert_eq!(room.tick().await, TickOutcome::Cancelled);
        assert_eq!(room.status(), RoomStatus::Deleted);
        assert_eq!(room.tick().await, TickOutcome::Inactive);

        assert_eq!(events.recv().await.unwrap(), RoomEvent::Countdown { remaining: 1 });
        assert!(matches!(events.recv().await.unwrap(), RoomEvent::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_withdraw_while_forming_frees_the_slot() {
        let room = room(GameMode::MultiPlayer, 2).await;
        let admission = room.join(ClientId(1), false).unwrap();
        assert_eq!(room.withdraw(ClientId(1)).await.unwrap(), 0);
        assert!(matches!(
            room.await_admission(admission).await,
            Err(RoomError::Unavailable(_))
        ));
        room.join(ClientId(2), false).unwrap();
        assert_eq!(room.joined(), vec![ClientId(2)]);
    }

    #[tokio::test]
    async fn test_departed_client_cannot_read_the_board() {
        let room = room(GameMode::MultiPlayer, 2).await;
        room.join(ClientId(1), false).unwrap();
        room.join(ClientId(2), false).unwrap();
        room.start_round().await.unwrap();

        assert_eq!(room.withdraw(ClientId(2)).await.unwrap(), 1);
        assert!(matches!(
            room.snapshot(ClientId(2)).await,
            Err(RoomError::NotInRoom(ClientId(2), _))
        ));
        assert_eq!(room.snapshot(ClientId(1)).await.unwrap().current_row, 1);
    }
}
