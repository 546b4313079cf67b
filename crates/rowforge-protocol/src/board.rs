//! The 9x9 puzzle grid.
//!
//! A cell holds `0` when empty and `1..=9` otherwise. Rows are addressed
//! 1-based in the protocol (`current_row` runs `1..=10`, where 10 means
//! "every row is done") and 0-based inside [`Board`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Side length of the board.
pub const BOARD_SIZE: usize = 9;

/// One row of digits.
pub type Row = [u8; BOARD_SIZE];

/// A 9x9 grid of digits (`0` = empty).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Board {
    cells: [Row; BOARD_SIZE],
}

impl Board {
    /// Builds a board from raw cells, rejecting digits above 9.
    pub fn new(cells: [Row; BOARD_SIZE]) -> Result<Self, ProtocolError> {
        for (r, row) in cells.iter().enumerate() {
            if let Some(c) = row.iter().position(|d| *d > 9) {
                return Err(ProtocolError::InvalidBoard(format!(
                    "cell ({r}, {c}) holds {}",
                    row[c]
                )));
            }
        }
        Ok(Self { cells })
    }

    /// Parses an 81-character literal, row-major. `0` or `.` mark empty
    /// cells; whitespace is ignored.
    pub fn from_digits(literal: &str) -> Result<Self, ProtocolError> {
        let digits: Vec<u8> = literal
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| match c {
                '.' => Ok(0),
                '0'..='9' => Ok(c as u8 - b'0'),
                other => Err(ProtocolError::InvalidBoard(format!(
                    "unexpected character {other:?}"
                ))),
            })
            .collect::<Result<_, _>>()?;

        if digits.len() != BOARD_SIZE * BOARD_SIZE {
            return Err(ProtocolError::InvalidBoard(format!(
                "expected {} cells, got {}",
                BOARD_SIZE * BOARD_SIZE,
                digits.len()
            )));
        }

        let mut cells = [[0u8; BOARD_SIZE]; BOARD_SIZE];
        for (i, d) in digits.into_iter().enumerate() {
            cells[i / BOARD_SIZE][i % BOARD_SIZE] = d;
        }
        Ok(Self { cells })
    }

    /// Returns the 0-based row `index`, if it exists.
    pub fn row(&self, index: usize) -> Option<&Row> {
        self.cells.get(index)
    }

    /// Returns the digit at (`row`, `col`), 0-based.
    pub fn cell(&self, row: usize, col: usize) -> u8 {
        self.cells[row][col]
    }

    /// Overwrites the digit at (`row`, `col`), 0-based.
    pub fn set(&mut self, row: usize, col: usize, digit: u8) {
        self.cells[row][col] = digit;
    }

    /// All rows, top to bottom.
    pub fn rows(&self) -> &[Row; BOARD_SIZE] {
        &self.cells
    }

    /// Number of non-empty cells.
    pub fn filled(&self) -> usize {
        self.cells.iter().flatten().filter(|d| **d != 0).count()
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in &self.cells {
            for d in row {
                write!(f, "{d}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Parses a submitted row: exactly nine digits, each in `1..=9`.
pub fn parse_row(input: &str) -> Result<Row, ProtocolError> {
    let trimmed = input.trim();
    let mut row = [0u8; BOARD_SIZE];
    let mut count = 0;

    for c in trimmed.chars() {
        if count == BOARD_SIZE {
            return Err(ProtocolError::InvalidRow(format!(
                "more than {BOARD_SIZE} digits in {trimmed:?}"
            )));
        }
        match c {
            '1'..='9' => row[count] = c as u8 - b'0',
            other => {
                return Err(ProtocolError::InvalidRow(format!(
                    "{other:?} is not a digit 1-9"
                )));
            }
        }
        count += 1;
    }

    if count != BOARD_SIZE {
        return Err(ProtocolError::InvalidRow(format!(
            "expected {BOARD_SIZE} digits, got {count}"
        )));
    }
    Ok(row)
}

/// A board as sent to clients: the grid followed by the row currently
/// being played.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub grid: Board,
    /// 1-based row in play; 10 once the board is complete.
    pub current_row: u8,
}
