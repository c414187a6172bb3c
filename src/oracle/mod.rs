// src/oracle/mod.rs

pub mod uci;

use anyhow::Result;
use shakmaty::{Chess, Move};

/// An engine's native score for the side to move.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RawScore {
    Cp(i32),
    Mate(i32),
}

impl RawScore {
    /// Signed expectation in [-1, 1] for the side to move. Centipawns go
    /// through the logistic win-probability model; a mate score saturates.
    pub fn expectation(self) -> f64 {
        match self {
            RawScore::Cp(cp) => {
                let win_prob = 1.0 / (1.0 + 10f64.powf(-f64::from(cp) / 400.0));
                2.0 * win_prob - 1.0
            }
            RawScore::Mate(n) if n > 0 => 1.0,
            RawScore::Mate(_) => -1.0,
        }
    }
}

/// One evaluation: the engine's preferred reply (none on terminal positions)
/// and its expectation for the side to move.
#[derive(Clone, Debug)]
pub struct Evaluation {
    pub mv: Option<Move>,
    pub score: f64,
}

/// Position evaluator consulted at search leaves. Implementations are
/// long-lived and count their calls for progress reporting; they never cache,
/// caching is the search's job.
pub trait Oracle {
    fn evaluate(&mut self, pos: &Chess) -> Result<Evaluation>;

    /// Total evaluations performed so far.
    fn evals(&self) -> u64;
}
