// src/search/pv_tree.rs

use crate::book::position_key;
use crate::oracle::Oracle;
use crate::search::{uci_to_move, Entry, Expectimax};
use rand::Rng;
use shakmaty::san::San;
use shakmaty::{Chess, Color, Move, Position};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// One displayed node: an engine layer carries the search score and the
/// chosen move (no move on the synthetic root), a human layer carries the
/// move's empirical probability.
#[derive(Clone, Debug)]
pub struct PvNode {
    pub value: f64,
    pub mv: Option<Move>,
    pub children: Vec<usize>,
}

/// Arena-backed forest of the most probable continuations, rebuilt on demand
/// from the memoization table.
#[derive(Clone, Debug, Default)]
pub struct PvTree {
    pub nodes: Vec<PvNode>,
    pub roots: Vec<usize>,
}

impl PvTree {
    fn attach(&mut self, parent: Option<usize>, node: PvNode) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(node);
        match parent {
            Some(p) => self.nodes[p].children.push(idx),
            None => self.roots.push(idx),
        }
        idx
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Indented-text rendering: engine layers as "san. Score: s", human
    /// layers as "san (p)", branch bars where a level has siblings.
    pub fn render_text(&self, color: Color) -> String {
        let mut out = String::new();
        self.render_text_nodes(&self.roots, &Chess::default(), color, "", false, &mut out);
        out
    }

    fn render_text_nodes(
        &self,
        ids: &[usize],
        board: &Chess,
        color: Color,
        indent: &str,
        has_siblings: bool,
        out: &mut String,
    ) {
        for &id in ids {
            let node = &self.nodes[id];
            let mut next = board.clone();
            match node.mv {
                None => out.push_str(&format!("{indent} Score: {:.2}\n", node.value)),
                Some(m) => {
                    let san = San::from_move(board, m);
                    if board.turn() == color {
                        out.push_str(&format!("{indent} {san}. Score: {:.2}\n", node.value));
                    } else {
                        out.push_str(&format!("{indent} {san} ({:.2})\n", node.value));
                    }
                    next.play_unchecked(m);
                }
            }
            let subindent = format!("{indent}{}", if has_siblings { " | " } else { "   " });
            self.render_text_nodes(
                &node.children,
                &next,
                color,
                &subindent,
                node.children.len() > 1,
                out,
            );
        }
    }

    /// Annotated movetext: SAN with `{ … }` value comments and parenthesized
    /// variations, pasteable into a PGN viewer. Black moves always restate
    /// the move number since every move is followed by a comment.
    pub fn render_annotated(&self) -> String {
        let mut out = String::new();
        self.annotate_line(&self.roots, &Chess::default(), &mut out);
        out.trim_end().to_string()
    }

    fn annotate_line(&self, ids: &[usize], board: &Chess, out: &mut String) {
        let Some((&first, alts)) = ids.split_first() else {
            return;
        };
        let node = &self.nodes[first];
        let mut next = board.clone();
        match node.mv {
            None => out.push_str(&format!("{{ {:.2} }} ", node.value)),
            Some(m) => {
                let san = San::from_move(board, m);
                let dots = if board.turn() == Color::White { "." } else { "..." };
                out.push_str(&format!(
                    "{}{dots} {san} {{ {:.2} }} ",
                    board.fullmoves(),
                    node.value
                ));
                next.play_unchecked(m);
            }
        }
        for &alt in alts {
            out.push_str("( ");
            self.annotate_line(std::slice::from_ref(&alt), board, out);
            out.push_str(") ");
        }
        self.annotate_line(&node.children, &next, out);
    }
}

/// Frontier entry: a human continuation not yet materialized, keyed by the
/// cumulative -log probability of its path so the heap pops the most likely
/// line first. The random tiebreak keeps equal-probability branches from
/// collapsing into one deterministic order.
struct Candidate {
    mlogp: f64,
    tiebreak: u64,
    prob: f64,
    mv: Move,
    board: Chess,
    parent: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.mlogp
            .total_cmp(&other.mlogp)
            .then(self.tiebreak.cmp(&other.tiebreak))
    }
}

impl<O: Oracle> Expectimax<'_, O> {
    /// Materialize up to `n` of the globally most probable continuations from
    /// the memoization table, alternating engine-chosen moves with
    /// human-distributed replies.
    pub fn make_pv_tree(&self, n: usize) -> PvTree {
        let mut tree = PvTree::default();
        if n == 0 {
            return tree;
        }
        let mut heap = BinaryHeap::new();
        let mut rng = rand::thread_rng();
        self.push_frontier(&mut heap, &mut tree, None, 0.0, &Chess::default(), &mut rng);

        let mut remaining = n;
        while remaining != 0 {
            let Some(Reverse(cand)) = heap.pop() else {
                break;
            };
            let idx = tree.attach(
                Some(cand.parent),
                PvNode {
                    value: cand.prob,
                    mv: Some(cand.mv),
                    children: Vec::new(),
                },
            );
            self.push_frontier(&mut heap, &mut tree, Some(idx), cand.mlogp, &cand.board, &mut rng);
            remaining -= 1;
        }
        tree
    }

    /// Materialize the search's reply at `board` (when resolved) and put its
    /// human-weighted continuations on the frontier. Positions the search
    /// never resolved end their branch here.
    fn push_frontier(
        &self,
        heap: &mut BinaryHeap<Reverse<Candidate>>,
        tree: &mut PvTree,
        parent: Option<usize>,
        mlogp: f64,
        board: &Chess,
        rng: &mut impl Rng,
    ) {
        let Some(Entry::Resolved { mv, score }) = self.etree.probe(position_key(board)) else {
            return;
        };
        let mv = mv.as_deref().and_then(|uci| uci_to_move(board, uci));
        let idx = tree.attach(
            parent,
            PvNode {
                value: *score,
                mv,
                children: Vec::new(),
            },
        );
        let mut board = board.clone();
        // The synthetic root entry has no move of its own; its continuations
        // hang off the root position directly.
        if let Some(m) = mv {
            board.play_unchecked(m);
        }
        for (p, reply) in self.most_common(&board) {
            let mut after = board.clone();
            after.play_unchecked(reply);
            heap.push(Reverse(Candidate {
                mlogp: mlogp - p.ln(),
                tiebreak: rng.gen(),
                prob: p,
                mv: reply,
                board: after,
                parent: idx,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::tests::{database_with, played, StubOracle};
    use crate::search::{move_uci, EvalTree};

    #[test]
    fn test_zero_node_count_returns_empty_tree() {
        let root = Chess::default();
        let db = database_with(&[(&root, 100)], &[(&root, "e2e4", 100)]);
        let mut oracle = StubOracle::new(0.0, 0.5);
        let mut searcher = Expectimax::new(&mut oracle, &db, Color::White, 1);
        searcher.run().unwrap();

        assert!(searcher.make_pv_tree(0).is_empty());
    }

    #[test]
    fn test_pops_highest_probability_reply_first() {
        let root = Chess::default();
        let after_e4 = played(&["e2e4"]);
        let db = database_with(
            &[(&root, 100), (&after_e4, 100)],
            &[
                (&root, "e2e4", 100),
                (&after_e4, "e7e5", 70),
                (&after_e4, "c7c5", 30),
            ],
        );
        let mut oracle = StubOracle::new(0.1, 0.9);
        let mut searcher = Expectimax::new(&mut oracle, &db, Color::White, 100);
        searcher.run().unwrap();

        let tree = searcher.make_pv_tree(1);
        assert_eq!(tree.roots.len(), 1);
        let top = &tree.nodes[tree.roots[0]];
        assert_eq!(top.mv.as_ref().map(move_uci).as_deref(), Some("e2e4"));
        // One pop: the 70% reply materializes, the 30% one stays on the
        // frontier.
        assert_eq!(top.children.len(), 1);
        let reply = &tree.nodes[top.children[0]];
        assert_eq!(reply.mv.as_ref().map(move_uci).as_deref(), Some("e7e5"));
        assert!((reply.value - 0.7).abs() < 1e-9);

        let tree = searcher.make_pv_tree(2);
        let top = &tree.nodes[tree.roots[0]];
        assert_eq!(top.children.len(), 2);
        let ucis: Vec<_> = top
            .children
            .iter()
            .map(|&c| tree.nodes[c].mv.as_ref().map(move_uci).unwrap())
            .collect();
        assert_eq!(ucis, vec!["e7e5".to_string(), "c7c5".to_string()]);
    }

    #[test]
    fn test_exhaustive_extraction_visits_each_reachable_entry_once() {
        // Only the 1. e4 e5 line carries human data, so the alternation rule
        // reaches exactly two resolved entries: the root and the leaf after
        // 1. e4 e5. The other nineteen leaves sit behind frequency-zero
        // replies and stay out of the tree however many nodes are requested.
        let root = Chess::default();
        let after_e4 = played(&["e2e4"]);
        let db = database_with(
            &[(&root, 100), (&after_e4, 100)],
            &[(&root, "e2e4", 100), (&after_e4, "e7e5", 38)],
        );
        let mut oracle = StubOracle::new(0.0, 0.9);
        let mut searcher = Expectimax::new(&mut oracle, &db, Color::White, 100);
        searcher.run().unwrap();

        let tree = searcher.make_pv_tree(1_000);
        // Root engine node + the e5 human node + the leaf engine node.
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn test_unresolved_position_stops_the_branch_silently() {
        let root = Chess::default();
        let after_e4 = played(&["e2e4"]);
        let db = database_with(&[], &[(&after_e4, "e7e5", 10)]);
        let mut oracle = StubOracle::new(0.0, 0.0);
        let mut searcher = Expectimax::new(&mut oracle, &db, Color::White, 1);
        // Hand-built table: the root is resolved, the position after 1. e4 e5
        // never was.
        searcher.etree.store(
            position_key(&root),
            Entry::Resolved {
                mv: Some("e2e4".to_string()),
                score: 0.43,
            },
        );

        let tree = searcher.make_pv_tree(10);
        assert_eq!(tree.len(), 2);
        let reply = &tree.nodes[tree.nodes[tree.roots[0]].children[0]];
        assert_eq!(reply.mv.as_ref().map(move_uci).as_deref(), Some("e7e5"));
        assert!(reply.children.is_empty());
    }

    fn two_reply_fixture() -> (EvalTree, crate::book::frequency::FrequencyDatabase) {
        let root = Chess::default();
        let after_e4 = played(&["e2e4"]);
        let after_e4e5 = played(&["e2e4", "e7e5"]);
        let db = database_with(
            &[],
            &[
                (&after_e4, "e7e5", 70),
                (&after_e4, "c7c5", 30),
            ],
        );
        let mut etree = EvalTree::new();
        etree.store(
            position_key(&root),
            Entry::Resolved {
                mv: Some("e2e4".to_string()),
                score: 0.43,
            },
        );
        etree.store(
            position_key(&after_e4e5),
            Entry::Resolved {
                mv: Some("g1f3".to_string()),
                score: 0.37,
            },
        );
        (etree, db)
    }

    #[test]
    fn test_text_rendering_marks_layers_and_siblings() {
        let (etree, db) = two_reply_fixture();
        let mut oracle = StubOracle::new(0.0, 0.0);
        let mut searcher = Expectimax::new(&mut oracle, &db, Color::White, 1);
        searcher.etree = etree;

        let tree = searcher.make_pv_tree(5);
        let text = tree.render_text(Color::White);

        assert!(text.contains("e4. Score: 0.43"));
        assert!(text.contains("e5 (0.70)"));
        assert!(text.contains("c5 (0.30)"));
        assert!(text.contains("Nf3. Score: 0.37"));
        // The reply layer has two siblings, so its subtrees carry branch bars.
        assert!(text.contains(" | "));
    }

    #[test]
    fn test_annotated_rendering_numbers_moves_and_parenthesizes_variations() {
        let (etree, db) = two_reply_fixture();
        let mut oracle = StubOracle::new(0.0, 0.0);
        let mut searcher = Expectimax::new(&mut oracle, &db, Color::White, 1);
        searcher.etree = etree;

        let tree = searcher.make_pv_tree(5);
        let movetext = tree.render_annotated();

        assert!(movetext.starts_with("1. e4 { 0.43 }"));
        assert!(movetext.contains("1... e5 { 0.70 }"));
        assert!(movetext.contains("( 1... c5 { 0.30 } )"));
        assert!(movetext.contains("2. Nf3 { 0.37 }"));
    }
}
