// src/book/mod.rs

pub mod frequency;
pub mod pgn;

use pgn_reader::SanPlus;
use shakmaty::zobrist::{Zobrist64, ZobristHash};
use shakmaty::{Chess, EnPassantMode, Move};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Canonical fingerprint of a position. Transpositions (same placement, side
/// to move, castling and en-passant rights via different move orders) share a
/// key.
pub fn position_key(pos: &Chess) -> u64 {
    let z: Zobrist64 = pos.zobrist_hash(EnPassantMode::Legal);
    z.0
}

/// Key for a (position, move) pair, for the move-count table. Hashes the
/// move's primitive coordinates so persisted keys stay stable across library
/// upgrades.
pub fn pair_key(pos_key: u64, m: &Move) -> u64 {
    let mut hasher = DefaultHasher::new();
    pos_key.hash(&mut hasher);
    m.from().map(|s| s as u8).hash(&mut hasher);
    (m.to() as u8).hash(&mut hasher);
    m.promotion().map(|r| r as u8).hash(&mut hasher);
    m.is_en_passant().hash(&mut hasher);
    hasher.finish()
}

/// One parsed game from the corpus: the headers the filters care about plus
/// the mainline moves. Elo fields stay raw strings since the corpus contains
/// "?" and empty values.
#[derive(Debug, Clone, Default)]
pub struct GameRecord {
    pub white_elo: String,
    pub black_elo: String,
    pub time_control: String,
    pub moves: Vec<SanPlus>,
}

/// Metadata predicates applied before a game is counted.
#[derive(Debug, Clone)]
pub struct GameFilters {
    pub min_rating: u32,
    pub max_rating: u32,
    pub min_tc_secs: u32,
    pub max_tc_secs: u32,
}

impl GameFilters {
    pub fn passes(&self, game: &GameRecord) -> bool {
        let (Ok(welo), Ok(belo)) = (
            game.white_elo.parse::<u32>(),
            game.black_elo.parse::<u32>(),
        ) else {
            return false;
        };
        if !(self.min_rating..=self.max_rating).contains(&welo)
            || !(self.min_rating..=self.max_rating).contains(&belo)
        {
            return false;
        }
        // Correspondence and other odd time controls have no '+' and are
        // filtered out the same way rating-less games are.
        let Some((base, incr)) = game.time_control.split_once('+') else {
            return false;
        };
        let (Ok(base), Ok(incr)) = (base.parse::<u32>(), incr.parse::<u32>()) else {
            return false;
        };
        let secs = base + crate::constants::TC_INCREMENT_MOVES * incr;
        (self.min_tc_secs..=self.max_tc_secs).contains(&secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shakmaty::{uci::UciMove, Position};

    fn play_uci(pos: &Chess, uci: &str) -> (Chess, Move) {
        let m = uci
            .parse::<UciMove>()
            .unwrap()
            .to_move(pos)
            .unwrap();
        let mut next = pos.clone();
        next.play_unchecked(m);
        (next, m)
    }

    #[test]
    fn test_transpositions_share_a_key() {
        // 1. Nf3 d5 2. d4 and 1. d4 d5 2. Nf3 reach the same position.
        let root = Chess::default();
        let (a, _) = play_uci(&root, "g1f3");
        let (a, _) = play_uci(&a, "d7d5");
        let (a, _) = play_uci(&a, "d2d4");

        let (b, _) = play_uci(&root, "d2d4");
        let (b, _) = play_uci(&b, "d7d5");
        let (b, _) = play_uci(&b, "g1f3");

        assert_eq!(position_key(&a), position_key(&b));
        assert_ne!(position_key(&a), position_key(&root));
    }

    #[test]
    fn test_pair_keys_distinguish_moves() {
        let root = Chess::default();
        let key = position_key(&root);
        let (_, e4) = play_uci(&root, "e2e4");
        let (_, d4) = play_uci(&root, "d2d4");
        assert_ne!(pair_key(key, &e4), pair_key(key, &d4));
        assert_eq!(pair_key(key, &e4), pair_key(key, &e4));
    }

    fn record(welo: &str, belo: &str, tc: &str) -> GameRecord {
        GameRecord {
            white_elo: welo.to_string(),
            black_elo: belo.to_string(),
            time_control: tc.to_string(),
            moves: Vec::new(),
        }
    }

    #[test]
    fn test_filters_accept_and_reject() {
        let filters = GameFilters {
            min_rating: 1500,
            max_rating: 2500,
            min_tc_secs: 180,
            max_tc_secs: 3600,
        };
        assert!(filters.passes(&record("1800", "1750", "300+2")));
        // 300 + 40 * 2 = 380 seconds
        assert!(!filters.passes(&record("1400", "1750", "300+2"))); // white too low
        assert!(!filters.passes(&record("1800", "2600", "300+2"))); // black too high
        assert!(!filters.passes(&record("?", "1750", "300+2"))); // non-digit elo
        assert!(!filters.passes(&record("1800", "1750", "-"))); // odd time control
        assert!(!filters.passes(&record("1800", "1750", "60+1"))); // too fast
    }
}
