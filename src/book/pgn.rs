// src/book/pgn.rs

use crate::book::GameRecord;
use flate2::read::GzDecoder;
use pgn_reader::{RawTag, Reader, SanPlus, Skip, Visitor};
use std::fs::File;
use std::io::{self, Read};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Collects the headers the filters need plus the mainline moves of one game.
/// Variations are skipped at the parser level.
#[derive(Default)]
struct RecordVisitor {
    record: GameRecord,
}

impl Visitor for RecordVisitor {
    type Tags = ();
    type Movetext = ();
    type Output = GameRecord;

    fn begin_tags(&mut self) -> ControlFlow<Self::Output, Self::Tags> {
        self.record = GameRecord::default();
        ControlFlow::Continue(())
    }

    fn tag(&mut self, _tags: &mut Self::Tags, key: &[u8], value: RawTag<'_>) -> ControlFlow<Self::Output> {
        match key {
            b"WhiteElo" => self.record.white_elo = value.decode_utf8_lossy().into_owned(),
            b"BlackElo" => self.record.black_elo = value.decode_utf8_lossy().into_owned(),
            b"TimeControl" => self.record.time_control = value.decode_utf8_lossy().into_owned(),
            _ => {}
        }
        ControlFlow::Continue(())
    }

    fn begin_movetext(&mut self, _tags: Self::Tags) -> ControlFlow<Self::Output, Self::Movetext> {
        ControlFlow::Continue(())
    }

    fn san(&mut self, _movetext: &mut Self::Movetext, san_plus: SanPlus) -> ControlFlow<Self::Output> {
        self.record.moves.push(san_plus);
        ControlFlow::Continue(())
    }

    fn begin_variation(&mut self, _movetext: &mut Self::Movetext) -> ControlFlow<Self::Output, Skip> {
        ControlFlow::Continue(Skip(true))
    }

    fn end_game(&mut self, _movetext: Self::Movetext) -> Self::Output {
        std::mem::take(&mut self.record)
    }
}

/// Lazy stream of games from a local monthly archive, plain or gzipped.
/// A transport error mid-archive ends the stream instead of failing it;
/// whatever was already yielded stands.
pub struct GameStream {
    reader: Reader<Box<dyn Read>>,
    visitor: RecordVisitor,
    path: PathBuf,
    done: bool,
}

impl GameStream {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let read: Box<dyn Read> = if path.extension().and_then(|s| s.to_str()) == Some("gz") {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Ok(Self {
            reader: Reader::new(read),
            visitor: RecordVisitor::default(),
            path: path.to_path_buf(),
            done: false,
        })
    }

    /// Archive file name for a monthly batch, following the lichess naming
    /// scheme. The gzipped variant is preferred when both exist.
    pub fn archive_path(dir: &Path, year: u32, month: u32) -> PathBuf {
        let base = dir.join(format!(
            "lichess_db_standard_rated_{year:04}-{month:02}.pgn"
        ));
        let gz = base.with_extension("pgn.gz");
        if gz.is_file() {
            gz
        } else {
            base
        }
    }
}

impl Iterator for GameStream {
    type Item = GameRecord;

    fn next(&mut self) -> Option<GameRecord> {
        if self.done {
            return None;
        }
        match self.reader.read_game(&mut self.visitor) {
            Ok(Some(record)) => Some(record),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                // Truncated or corrupt archive: treat as end of input and
                // keep everything read so far.
                warn!("corpus stream ended early at {}: {e}", self.path.display());
                self.done = true;
                None
            }
        }
    }
}
