// src/search/mod.rs

pub mod pv_tree;

use crate::book::frequency::FrequencyDatabase;
use crate::book::position_key;
use crate::oracle::Oracle;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, Color, Move, Position};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

pub fn move_uci(m: &Move) -> String {
    m.to_uci(CastlingMode::Standard).to_string()
}

pub fn uci_to_move(pos: &Chess, uci: &str) -> Option<Move> {
    uci.parse::<UciMove>().ok().and_then(|u| u.to_move(pos).ok())
}

/// Per-position search state. `Open` marks a position on the active
/// recursion stack; re-entering one means the line repeated the position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Entry {
    Open,
    Resolved { mv: Option<String>, score: f64 },
}

/// Memoization table keyed by position. Moves are stored in UCI form so the
/// table can be serialized and re-resolved against the position later.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EvalTree {
    table: HashMap<u64, Entry>,
}

impl EvalTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn probe(&self, key: u64) -> Option<&Entry> {
        self.table.get(&key)
    }

    pub fn store(&mut self, key: u64, entry: Entry) {
        self.table.insert(key, entry);
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string(self)?;
        fs::write(path, json)
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let json = fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(io::Error::from)
    }
}

/// Expectimax over the human position graph: the analyzed side picks the
/// move maximizing its expectation, the opponent answers with the empirical
/// human distribution (Laplace-smoothed), and positions without enough human
/// data are scored by the oracle.
pub struct Expectimax<'a, O: Oracle> {
    oracle: &'a mut O,
    database: &'a FrequencyDatabase,
    color: Color,
    threshold: u64,
    pub etree: EvalTree,
}

impl<'a, O: Oracle> Expectimax<'a, O> {
    pub fn new(
        oracle: &'a mut O,
        database: &'a FrequencyDatabase,
        color: Color,
        threshold: u64,
    ) -> Self {
        Self {
            oracle,
            database,
            color,
            threshold,
            etree: EvalTree::new(),
        }
    }

    pub fn evals(&self) -> u64 {
        self.oracle.evals()
    }

    /// Walk the graph top-down from the initial position, filling the
    /// memoization table. When the analyzed side is Black the root is White's
    /// choice, so the top level averages over the human distribution instead
    /// of maximizing, and stores a moveless synthetic entry.
    pub fn run(&mut self) -> Result<()> {
        let root = Chess::default();
        if self.color == Color::White {
            self.search_position(&root)?;
        } else {
            let mut score = 0.0;
            for (p, m) in self.most_common(&root) {
                let mut next = root.clone();
                next.play_unchecked(m);
                score += p * self.search_position(&next)?;
            }
            self.etree
                .store(position_key(&root), Entry::Resolved { mv: None, score });
        }
        // the progress line uses \r, keep the last one visible
        println!();
        Ok(())
    }

    /// Score `board` for the side to move there (the analyzed side). Every
    /// resolved position lands in the memoization table exactly once, apart
    /// from repetition cycles, which are settled on the spot by a direct
    /// oracle evaluation.
    fn search_position(&mut self, board: &Chess) -> Result<f64> {
        let root_key = position_key(board);
        match self.etree.probe(root_key) {
            Some(Entry::Resolved { score, .. }) => return Ok(*score),
            Some(Entry::Open) => {
                let eval = self.oracle.evaluate(board)?;
                self.etree.store(
                    root_key,
                    Entry::Resolved {
                        mv: eval.mv.as_ref().map(move_uci),
                        score: eval.score,
                    },
                );
                return Ok(eval.score);
            }
            None => self.etree.store(root_key, Entry::Open),
        }

        if self.database.board_count(board) < self.threshold {
            let eval = self.oracle.evaluate(board)?;
            self.etree.store(
                root_key,
                Entry::Resolved {
                    mv: eval.mv.as_ref().map(move_uci),
                    score: eval.score,
                },
            );
            return Ok(eval.score);
        }

        print!("\r{} evaluations...", self.oracle.evals());
        let _ = io::stdout().flush();

        let mut best_move = None;
        let mut best_score = -1.0f64;
        for m in board.legal_moves() {
            let mut after = board.clone();
            after.play_unchecked(m);
            let replies = after.legal_moves();
            let score = if self.database.board_count(&after) < self.threshold
                || replies.is_empty()
            {
                // The evaluation after our move is from the opponent's
                // perspective, so negate it. A finished game has no replies
                // to average over and takes the same path.
                -self.oracle.evaluate(&after)?.score
            } else {
                let mut num = 0.0;
                let mut denom = 0.0;
                for reply in replies {
                    let mut next = after.clone();
                    next.play_unchecked(reply);
                    let val = self.search_position(&next)?;
                    // Laplace smoothing: one phantom visit per legal reply,
                    // so unseen replies still carry weight.
                    let weight = (self.database.move_count(&after, &reply) + 1) as f64;
                    num += val * weight;
                    denom += weight;
                }
                num / denom
            };
            // Non-strict: a later move matching the best score replaces it.
            if score >= best_score {
                best_move = Some(m);
                best_score = score;
            }
        }

        self.etree.store(
            root_key,
            Entry::Resolved {
                mv: best_move.as_ref().map(move_uci),
                score: best_score,
            },
        );
        Ok(best_score)
    }

    /// Human reply distribution at `board`: legal moves with a nonzero count,
    /// normalized over those counts, most popular first.
    pub fn most_common(&self, board: &Chess) -> Vec<(f64, Move)> {
        let mut counted = Vec::new();
        let mut total = 0u64;
        for m in board.legal_moves() {
            let cnt = self.database.move_count(board, &m);
            if cnt != 0 {
                total += cnt;
                counted.push((cnt, m));
            }
        }
        let mut res: Vec<(f64, Move)> = counted
            .into_iter()
            .map(|(cnt, m)| (cnt as f64 / total as f64, m))
            .collect();
        res.sort_by(|a, b| b.0.total_cmp(&a.0));
        res
    }
}
