// src/oracle/uci.rs

use crate::constants::{ENGINE_STARTUP_TIMEOUT_SECS, EVAL_GRACE_MS};
use crate::oracle::{Evaluation, Oracle, RawScore};
use anyhow::{anyhow, Context, Result};
use shakmaty::fen::Fen;
use shakmaty::uci::UciMove;
use shakmaty::{Chess, EnPassantMode, Move};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};
use tracing::warn;

struct UciChild {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Drop for UciChild {
    fn drop(&mut self) {
        let _ = self.write_line("quit");
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl UciChild {
    fn spawn(engine_path: &str, threads: u32) -> Result<Self> {
        let mut child = Command::new(engine_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("failed to start engine: {engine_path}"))?;

        let stdin = child.stdin.take().ok_or_else(|| anyhow!("no stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("no stdout"))?;
        let mut this = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        };

        this.write_line("uci")?;
        this.wait_for("uciok", Duration::from_secs(ENGINE_STARTUP_TIMEOUT_SECS))?;
        this.write_line(&format!("setoption name Threads value {threads}"))?;
        this.write_line("isready")?;
        this.wait_for("readyok", Duration::from_secs(ENGINE_STARTUP_TIMEOUT_SECS))?;
        Ok(this)
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        self.stdin
            .write_all(line.as_bytes())
            .context("failed to write to engine stdin")?;
        self.stdin
            .write_all(b"\n")
            .context("failed to write newline to engine stdin")?;
        self.stdin.flush().ok();
        Ok(())
    }

    fn read_line_with_timeout(&mut self, timeout: Duration) -> Result<Option<String>> {
        let start = Instant::now();
        loop {
            if self.stdout.fill_buf()?.is_empty() && start.elapsed() >= timeout {
                return Ok(None);
            }
            let mut buf = String::new();
            let read = self.stdout.read_line(&mut buf)?;
            if read == 0 {
                return Ok(None);
            }
            if buf.trim().is_empty() {
                continue;
            }
            return Ok(Some(buf.trim_end_matches(['\r', '\n']).to_string()));
        }
    }

    fn wait_for(&mut self, token: &str, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        loop {
            if let Some(line) = self.read_line_with_timeout(Duration::from_millis(1000))? {
                if line.contains(token) {
                    return Ok(());
                }
            }
            if start.elapsed() > timeout {
                return Err(anyhow!("timeout waiting for {token}"));
            }
        }
    }
}

/// Score and principal move pulled out of one `info` line.
fn parse_info_line(line: &str) -> Option<(Option<RawScore>, Option<String>)> {
    if !line.starts_with("info ") {
        return None;
    }
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let mut score = None;
    let mut pv_move = None;
    let mut i = 1;
    while i < tokens.len() {
        match tokens[i] {
            "score" => {
                if i + 2 < tokens.len() {
                    match tokens[i + 1] {
                        "cp" => {
                            if let Ok(v) = tokens[i + 2].parse::<i32>() {
                                score = Some(RawScore::Cp(v));
                            }
                        }
                        "mate" => {
                            if let Ok(v) = tokens[i + 2].parse::<i32>() {
                                score = Some(RawScore::Mate(v));
                            }
                        }
                        _ => {}
                    }
                    i += 3;
                } else {
                    break;
                }
            }
            "pv" => {
                pv_move = tokens.get(i + 1).map(|s| s.to_string());
                break;
            }
            _ => {
                i += 1;
            }
        }
    }
    Some((score, pv_move))
}

/// One long-lived UCI engine per analysis session. Each call sets the
/// position by FEN, searches for a fixed movetime and reports the principal
/// move plus the score converted to a signed expectation.
pub struct UciOracle {
    engine_path: String,
    movetime: Duration,
    threads: u32,
    child: Option<UciChild>,
    evals: u64,
}

impl UciOracle {
    pub fn new(engine_path: &str, movetime: Duration, threads: u32) -> Self {
        Self {
            engine_path: engine_path.to_string(),
            movetime,
            threads,
            child: None,
            evals: 0,
        }
    }

    fn child(&mut self) -> Result<&mut UciChild> {
        if self.child.is_none() {
            self.child = Some(UciChild::spawn(&self.engine_path, self.threads)?);
        }
        Ok(self.child.as_mut().unwrap())
    }

    fn evaluate_once(&mut self, pos: &Chess) -> Result<Evaluation> {
        let fen = Fen::from_position(pos, EnPassantMode::Legal);
        let movetime = self.movetime;
        let deadline = movetime + Duration::from_millis(EVAL_GRACE_MS);
        let engine = self.child()?;

        engine.write_line(&format!("position fen {fen}"))?;
        engine.write_line(&format!("go movetime {}", movetime.as_millis()))?;

        let start = Instant::now();
        let mut score = None;
        let mut pv_move = None;
        let mut best_token = None;
        loop {
            match engine.read_line_with_timeout(Duration::from_millis(1000))? {
                Some(line) => {
                    if let Some((s, pv)) = parse_info_line(&line) {
                        if s.is_some() {
                            score = s;
                        }
                        if pv.is_some() {
                            pv_move = pv;
                        }
                    } else if let Some(rest) = line.strip_prefix("bestmove ") {
                        best_token = rest.split_whitespace().next().map(|s| s.to_string());
                        break;
                    }
                }
                None => {
                    if start.elapsed() > deadline {
                        return Err(anyhow!("engine did not produce bestmove in time"));
                    }
                }
            }
        }

        let score = score.ok_or_else(|| anyhow!("engine reported no score for {fen}"))?;
        let mv = resolve_move(pos, pv_move.as_deref().or(best_token.as_deref()));
        Ok(Evaluation {
            mv,
            score: score.expectation(),
        })
    }
}

fn resolve_move(pos: &Chess, token: Option<&str>) -> Option<Move> {
    let token = token?;
    // Engines answer "bestmove (none)" on mated and stalemated positions.
    if token == "(none)" || token == "0000" {
        return None;
    }
    token
        .parse::<UciMove>()
        .ok()
        .and_then(|uci| uci.to_move(pos).ok())
}

impl Oracle for UciOracle {
    fn evaluate(&mut self, pos: &Chess) -> Result<Evaluation> {
        self.evals += 1;
        match self.evaluate_once(pos) {
            Ok(eval) => Ok(eval),
            Err(e) => {
                // One respawn-and-retry, then the failure is fatal to the run.
                warn!("engine evaluation failed ({e}), restarting engine");
                self.child = None;
                self.evaluate_once(pos)
                    .context("engine evaluation failed after restart")
            }
        }
    }

    fn evals(&self) -> u64 {
        self.evals
    }
}
