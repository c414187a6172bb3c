// src/book/frequency.rs

use crate::book::{pair_key, position_key, GameFilters, GameRecord};
use serde::{Deserialize, Serialize};
use shakmaty::{Chess, Move, Position};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tracing::warn;

/// Visit counts mined from human games: one table keyed by position, one by
/// (position, move) pair. Counts only ever grow; monthly batches merge by
/// addition.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FrequencyDatabase {
    positions: HashMap<u64, u64>,
    moves: HashMap<u64, u64>,
}

impl FrequencyDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay each game passing the filters, counting every position and
    /// (position, move) along its mainline. A single game may only introduce
    /// ONE never-before-seen position; once it does, the rest of that game is
    /// dropped. Well-trodden lines still deepen over many games while the
    /// long tail of unique positions stays out of memory.
    pub fn ingest<I>(&mut self, games: I, filters: &GameFilters) -> u64
    where
        I: IntoIterator<Item = GameRecord>,
    {
        let mut ingested = 0;
        for game in games {
            if !filters.passes(&game) {
                continue;
            }
            ingested += 1;
            if ingested % 1000 == 0 {
                print!("\r{ingested} games processed");
                let _ = io::stdout().flush();
            }
            let mut pos = Chess::default();
            for san_plus in &game.moves {
                let m = match san_plus.san.to_move(&pos) {
                    Ok(m) => m,
                    // Malformed movetext: keep what this game contributed so
                    // far, skip its remaining moves.
                    Err(_) => break,
                };
                let key = position_key(&pos);
                let count = self.positions.entry(key).or_insert(0);
                *count += 1;
                let first_visit = *count == 1;
                *self.moves.entry(pair_key(key, &m)).or_insert(0) += 1;
                if first_visit {
                    break;
                }
                pos.play_unchecked(m);
            }
        }
        ingested
    }

    pub fn board_count(&self, pos: &Chess) -> u64 {
        self.positions.get(&position_key(pos)).copied().unwrap_or(0)
    }

    pub fn move_count(&self, pos: &Chess, m: &Move) -> u64 {
        self.moves
            .get(&pair_key(position_key(pos), m))
            .copied()
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Pointwise addition of both tables. Commutative and associative, so
    /// monthly batches can be accumulated in any order.
    pub fn merge(&mut self, other: &FrequencyDatabase) {
        for (key, count) in &other.positions {
            *self.positions.entry(*key).or_insert(0) += count;
        }
        for (key, count) in &other.moves {
            *self.moves.entry(*key).or_insert(0) += count;
        }
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string(self)?;
        fs::write(path, json)
    }

    /// Load a saved database and merge it additively into this one. Loading
    /// the same file twice double-counts; callers track what they have
    /// already applied.
    pub fn load_merge(&mut self, path: &Path) -> io::Result<()> {
        let json = fs::read_to_string(path)?;
        match serde_json::from_str::<FrequencyDatabase>(&json) {
            Ok(other) => {
                self.merge(&other);
                Ok(())
            }
            Err(e) => {
                warn!("corrupt frequency database at {}: {e}", path.display());
                Err(io::Error::from(e))
            }
        }
    }
}
