//! Puzzle store: where boards come from and where results go.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

use rand::Rng;
use rowforge_protocol::{Board, GameId};
use serde::{Deserialize, Serialize};

use crate::StoreError;

/// Which puzzle to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameSelector {
    Id(GameId),
    Random,
}

impl From<Option<GameId>> for GameSelector {
    fn from(id: Option<GameId>) -> Self {
        id.map_or(Self::Random, Self::Id)
    }
}

/// A puzzle and its solution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Puzzle {
    pub game_id: GameId,
    pub board: Board,
    pub solution: Board,
}

impl Puzzle {
    /// Builds a puzzle, checking that every given digit agrees with the
    /// solution and that the solution is complete.
    pub fn new(game_id: GameId, board: Board, solution: Board) -> Result<Self, StoreError> {
        if solution.filled() != 81 {
            return Err(StoreError::Malformed(format!("{game_id}: solution has empty cells")));
        }
        for (r, (given, solved)) in board.rows().iter().zip(solution.rows()).enumerate() {
            if let Some(c) = (0..given.len()).find(|&c| given[c] != 0 && given[c] != solved[c]) {
                return Err(StoreError::Malformed(format!(
                    "{game_id}: given digit at row {}, column {} contradicts the solution",
                    r + 1,
                    c + 1
                )));
            }
        }
        Ok(Self {
            game_id,
            board,
            solution,
        })
    }
}

/// Best results recorded for one game.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    pub plays: u64,
    pub best_time: Option<Duration>,
    pub best_accuracy: f64,
}

/// Loads puzzles and records statistics.
///
/// Implementations must be shareable across tasks; the registry holds one
/// behind an `Arc`.
pub trait PuzzleStore: Send + Sync + 'static {
    fn load_game(
        &self,
        selector: GameSelector,
    ) -> impl Future<Output = Result<Puzzle, StoreError>> + Send;

    /// Folds one player's result into the game's record and returns the
    /// updated record.
    fn update_statistics(
        &self,
        game_id: GameId,
        elapsed: Duration,
        accuracy: f64,
    ) -> impl Future<Output = Result<GameRecord, StoreError>> + Send;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

const BUILTIN_BOARD: &str = "\
    530070000600195000098000060\
    800060003400803001700020006\
    060000280000419005000080079";

const BUILTIN_SOLUTION: &str = "\
    534678912672195348198342567\
    859761423426853791713924856\
    961537284287419635345286179";

/// On-disk puzzle format: one object per puzzle, boards as 81-digit
/// strings (`0` or `.` for empty).
#[derive(Debug, Deserialize)]
struct PuzzleFile {
    id: GameId,
    board: String,
    solution: String,
}

/// Puzzles and records kept in memory.
#[derive(Debug, Default)]
pub struct MemoryPuzzleStore {
    puzzles: RwLock<BTreeMap<GameId, Puzzle>>,
    records: Mutex<HashMap<GameId, GameRecord>>,
}

impl MemoryPuzzleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding one classic puzzle as game `G-1`.
    pub fn with_builtin() -> Self {
        let store = Self::new();
        // The built-in literals are known good.
        if let Ok(puzzle) = parse_puzzle(GameId(1), BUILTIN_BOARD, BUILTIN_SOLUTION) {
            store.insert(puzzle);
        }
        store
    }

    /// Parses a JSON array of `{ "id", "board", "solution" }` objects.
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let files: Vec<PuzzleFile> =
            serde_json::from_str(json).map_err(|e| StoreError::Malformed(e.to_string()))?;
        let store = Self::new();
        for file in files {
            store.insert(parse_puzzle(file.id, &file.board, &file.solution)?);
        }
        tracing::info!(puzzles = store.len(), "puzzle store loaded");
        Ok(store)
    }

    pub fn insert(&self, puzzle: Puzzle) {
        self.puzzles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(puzzle.game_id, puzzle);
    }

    pub fn len(&self) -> usize {
        self.puzzles.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The record for `game_id`, if anyone has finished it.
    pub fn record(&self, game_id: GameId) -> Option<GameRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&game_id)
            .cloned()
    }

    fn select(&self, selector: GameSelector) -> Result<Puzzle, StoreError> {
        let puzzles = self.puzzles.read().unwrap_or_else(PoisonError::into_inner);
        match selector {
            GameSelector::Id(id) => puzzles.get(&id).cloned().ok_or(StoreError::GameNotFound(id)),
            GameSelector::Random => {
                if puzzles.is_empty() {
                    return Err(StoreError::Empty);
                }
                let pick = rand::rng().random_range(0..puzzles.len());
                puzzles.values().nth(pick).cloned().ok_or(StoreError::Empty)
            }
        }
    }

    fn record_result(
        &self,
        game_id: GameId,
        elapsed: Duration,
        accuracy: f64,
    ) -> Result<GameRecord, StoreError> {
        if !self
            .puzzles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&game_id)
        {
            return Err(StoreError::GameNotFound(game_id));
        }
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let record = records.entry(game_id).or_default();
        record.plays += 1;
        record.best_time = Some(record.best_time.map_or(elapsed, |best| best.min(elapsed)));
        record.best_accuracy = record.best_accuracy.max(accuracy);
        Ok(record.clone())
    }
}

fn parse_puzzle(id: GameId, board: &str, solution: &str) -> Result<Puzzle, StoreError> {
    let malformed =
        |e: rowforge_protocol::ProtocolError| StoreError::Malformed(format!("{id}: {e}"));
    let board = Board::from_digits(board).map_err(malformed)?;
    let solution = Board::from_digits(solution).map_err(malformed)?;
    Puzzle::new(id, board, solution)
}

impl PuzzleStore for MemoryPuzzleStore {
    fn load_game(
        &self,
        selector: GameSelector,
    ) -> impl Future<Output = Result<Puzzle, StoreError>> + Send {
        std::future::ready(self.select(selector))
    }

    fn update_statistics(
        &self,
        game_id: GameId,
        elapsed: Duration,
        accuracy: f64,
    ) -> impl Future<Output = Result<GameRecord, StoreError>> + Send {
        std::future::ready(self.record_result(game_id, elapsed, accuracy))
    }
}
