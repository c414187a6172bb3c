// src/main.rs

mod book;
mod constants;
mod oracle;
mod search;

use crate::book::frequency::FrequencyDatabase;
use crate::book::pgn::GameStream;
use crate::book::GameFilters;
use crate::oracle::uci::UciOracle;
use crate::search::{EvalTree, Expectimax};
use anyhow::{bail, Context, Result};
use clap::Parser;
use shakmaty::Color;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Start year of the corpus walk
    year: u32,

    /// Start month of the corpus walk
    month: u32,

    /// Directory containing the monthly lichess archives (.pgn or .pgn.gz)
    #[arg(long, default_value = ".")]
    archive_dir: PathBuf,

    /// Path to the UCI engine used as the evaluation oracle
    #[arg(long)]
    engine: String,

    /// Maximum number of games to use from each month
    #[arg(long, default_value_t = constants::DEFAULT_MAX_GAMES)]
    games: u64,

    /// Minimum visits on a position before it is expanded
    #[arg(long, default_value_t = constants::DEFAULT_VISIT_THRESHOLD)]
    threshold: u64,

    /// Milliseconds the oracle spends on each leaf evaluation
    #[arg(long, default_value_t = constants::DEFAULT_MOVETIME_MS)]
    ms: u64,

    /// Threads for the oracle engine (defaults to all logical cores)
    #[arg(long)]
    threads: Option<u32>,

    /// Number of nodes to include in the printed pv tree
    #[arg(long, default_value_t = constants::DEFAULT_TREE_SIZE)]
    tree_size: usize,

    /// Side from which to analyze: white or black
    #[arg(long, default_value = "white")]
    color: String,

    /// Lowest rating for players
    #[arg(long, default_value_t = constants::DEFAULT_MIN_RATING)]
    min_rating: u32,

    /// Highest rating for players
    #[arg(long, default_value_t = constants::DEFAULT_MAX_RATING)]
    max_rating: u32,

    /// Shortest time control (in seconds) to include
    #[arg(long, default_value_t = constants::DEFAULT_MIN_TC_SECS)]
    min_tc: u32,

    /// Longest time control (in seconds) to include
    #[arg(long, default_value_t = constants::DEFAULT_MAX_TC_SECS)]
    max_tc: u32,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let color = match args.color.as_str() {
        "white" => Color::White,
        "black" => Color::Black,
        other => bail!("unknown color '{other}', expected white or black"),
    };

    // One database accumulates across months; each month's counts are also
    // checkpointed separately so a crash never costs finished work.
    let mut database = FrequencyDatabase::new();
    let (mut year, mut month) = (args.year, args.month);
    loop {
        if !process_month(year, month, &mut database, color, &args)? {
            break;
        }
        month += 1;
        if month > 12 {
            month = 1;
            year += 1;
        }
    }
    Ok(())
}

/// Run the three stages for one month: accumulate counts, search, report.
/// Each stage persists its output before the next begins. Returns false once
/// no further archive (or checkpoint) exists.
fn process_month(
    year: u32,
    month: u32,
    database: &mut FrequencyDatabase,
    color: Color,
    args: &Args,
) -> Result<bool> {
    let htree_path = PathBuf::from(format!("htree_{year}_{month}.json"));
    let etree_path = PathBuf::from(format!("etree_{}_{year}_{month}.json", args.color));

    if htree_path.is_file() {
        info!("loading human tree from {}", htree_path.display());
        database
            .load_merge(&htree_path)
            .with_context(|| format!("failed to load {}", htree_path.display()))?;
    } else {
        let archive = GameStream::archive_path(&args.archive_dir, year, month);
        if !archive.is_file() {
            info!(
                "no archive for {year}-{month:02} at {}, stopping",
                archive.display()
            );
            return Ok(false);
        }
        // Redoing the human tree invalidates any engine tree built on it.
        if etree_path.is_file() {
            info!("removing stale {}", etree_path.display());
            fs::remove_file(&etree_path)?;
        }
        info!("building human tree from {}", archive.display());
        let filters = GameFilters {
            min_rating: args.min_rating,
            max_rating: args.max_rating,
            min_tc_secs: args.min_tc,
            max_tc_secs: args.max_tc,
        };
        let games = GameStream::open(&archive)?.take(args.games as usize);
        let ingested = database.ingest(games, &filters);
        println!();
        info!("{ingested} games processed, {} positions known", database.len());
        database.save(&htree_path)?;
    }

    let threads = args.threads.unwrap_or_else(|| num_cpus::get() as u32);
    let mut oracle = UciOracle::new(&args.engine, Duration::from_millis(args.ms), threads);
    let mut searcher = Expectimax::new(&mut oracle, database, color, args.threshold);

    if etree_path.is_file() {
        info!("loading engine tree from {}", etree_path.display());
        searcher.etree = EvalTree::load(&etree_path)?;
    } else {
        info!("building engine tree for {}", args.color);
        searcher.run()?;
        info!(
            "{} oracle evaluations, {} positions resolved",
            searcher.evals(),
            searcher.etree.len()
        );
        searcher.etree.save(&etree_path)?;
    }

    info!("pv tree for {year}-{month:02}:");
    let tree = searcher.make_pv_tree(args.tree_size);
    print!("{}", tree.render_text(color));
    println!("{}", tree.render_annotated());
    Ok(true)
}
