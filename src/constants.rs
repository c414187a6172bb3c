// Corpus ingestion
pub const DEFAULT_MAX_GAMES: u64 = 1_000_000;
pub const DEFAULT_MIN_RATING: u32 = 0;
pub const DEFAULT_MAX_RATING: u32 = 10_000;
pub const DEFAULT_MIN_TC_SECS: u32 = 0;
pub const DEFAULT_MAX_TC_SECS: u32 = 10_000;
// Assumed game length when converting a "base+increment" time control to
// total thinking seconds (lichess convention: base + 40 * increment).
pub const TC_INCREMENT_MOVES: u32 = 40;

// Expectimax
pub const DEFAULT_VISIT_THRESHOLD: u64 = 100;
pub const DEFAULT_TREE_SIZE: usize = 50;

// Oracle
pub const DEFAULT_MOVETIME_MS: u64 = 50;
pub const ENGINE_STARTUP_TIMEOUT_SECS: u64 = 10;
// Extra slack on top of `go movetime` before an evaluation counts as hung.
pub const EVAL_GRACE_MS: u64 = 5_000;
