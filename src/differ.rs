//! Greedy, similarity-guided edit-script computation over two trees.
//!
//! The differ keeps one LIFO frontier per tree, each seeded with a root.
//! The frontier holds the unconsumed portion of its tree in left-to-right
//! order at whatever depths matching has descended to so far. Every step
//! compares the two frontier tops under a bounded lookahead
//! ([`MAX_SEARCH_LENGTH`] entries, plus one probe level into children)
//! and either skips identical subtrees, refines a side into its children,
//! or records an insert/delete/replace. Small lookahead keeps the whole
//! thing near-linear — this is an approximation, not a tree-edit-distance
//! solver.
//!
//! Output is a sequence of [`ChangeRecord`]s in ascending old-document
//! order, adjacent records coalesced, which the [`reducer`](crate::reducer)
//! shrinks into minimal text ranges.

use std::collections::HashSet;

use tracing::debug;

use crate::error::{Error, Result};
use crate::reducer::{self, TreeChange};
use crate::tree::{NodeKey, NodeOrToken, SyntaxTree, TextSpan};

/// Lookahead cap for the best-match search and the one-level child probe.
pub(crate) const MAX_SEARCH_LENGTH: usize = 8;

/// Compute the edit script transforming `before`'s text into `after`'s.
///
/// Identical trees (shared root) yield an empty script. An absent `before`
/// yields a single whole-tree insertion; an absent `after` violates the
/// input contract. Ranges come back ascending and non-overlapping, without
/// materialized text.
pub fn compute_diff(
    before: Option<&SyntaxTree>,
    after: Option<&SyntaxTree>,
) -> Result<Vec<TreeChange>> {
    compute_diff_impl(before, after, false)
}

/// Same as [`compute_diff`], additionally materializing each change's
/// replacement text so the script can be applied to the old text.
pub fn compute_diff_with_text(
    before: Option<&SyntaxTree>,
    after: Option<&SyntaxTree>,
) -> Result<Vec<TreeChange>> {
    compute_diff_impl(before, after, true)
}

fn compute_diff_impl(
    before: Option<&SyntaxTree>,
    after: Option<&SyntaxTree>,
    include_text: bool,
) -> Result<Vec<TreeChange>> {
    match (before, after) {
        (None, None) => Ok(Vec::new()),
        (Some(b), Some(a)) if b.same_root(a) => Ok(Vec::new()),
        (None, Some(a)) => Ok(vec![TreeChange::from_tree(a, include_text)]),
        (Some(_), None) => Err(Error::InvalidArgument(
            "diff requires a new tree when an old tree is given",
        )),
        (Some(b), Some(a)) => {
            let records = compute_change_records(&b.root(), &a.root());
            Ok(reducer::reduce(records, include_text))
        }
    }
}

/// Raw edit scripts for the merger: node-level records, unreduced.
pub(crate) fn compute_change_records(
    old_root: &NodeOrToken,
    new_root: &NodeOrToken,
) -> Vec<ChangeRecord> {
    SyntaxDiffer::new(old_root, new_root).run()
}

/// One raw edit: a text range over the old document plus the subtrees
/// removed from it and inserted into it. Either side may be empty (pure
/// insert/delete) but not both.
#[derive(Debug, Clone)]
pub(crate) struct ChangeRecord {
    pub span: TextSpan,
    pub new_length: usize,
    pub removed: Vec<NodeOrToken>,
    pub inserted: Vec<NodeOrToken>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiffOperation {
    SkipBoth,
    ReduceOld,
    ReduceNew,
    ReduceBoth,
    InsertNew,
    DeleteOld,
    ReplaceOldWithNew,
}

#[derive(Debug, Clone, Copy)]
struct DiffAction {
    op: DiffOperation,
    count: usize,
}

#[derive(Debug, Clone, Copy)]
struct BestMatch {
    index: usize,
    similarity: usize,
}

/// Working sets for similarity scoring, owned by one differ invocation and
/// cleared between calls. Never shared.
#[derive(Default)]
struct SimilarityScratch {
    node_keys: HashSet<NodeKey>,
    token_texts: HashSet<String>,
}

struct SyntaxDiffer {
    /// Unconsumed old frontier, top at the end.
    old_nodes: Vec<NodeOrToken>,
    /// Unconsumed new frontier, top at the end.
    new_nodes: Vec<NodeOrToken>,
    scratch: SimilarityScratch,
    changes: Vec<ChangeRecord>,
    /// End of the old root's span, the insert position once the old
    /// frontier is exhausted.
    old_end: usize,
}

impl SyntaxDiffer {
    fn new(old_root: &NodeOrToken, new_root: &NodeOrToken) -> Self {
        Self {
            old_nodes: vec![old_root.clone()],
            new_nodes: vec![new_root.clone()],
            scratch: SimilarityScratch::default(),
            changes: Vec::new(),
            old_end: old_root.full_span().end(),
        }
    }

    fn run(mut self) -> Vec<ChangeRecord> {
        loop {
            if self.new_nodes.is_empty() {
                // remaining old entries were deleted
                let count = self.old_nodes.len();
                if count > 0 {
                    self.delete_old(count);
                }
                break;
            }
            if self.old_nodes.is_empty() {
                // remaining new entries were inserted
                let count = self.new_nodes.len();
                if count > 0 {
                    self.insert_new(count);
                }
                break;
            }

            let action = self.next_action();
            match action.op {
                DiffOperation::SkipBoth => {
                    pop_n(&mut self.old_nodes, action.count);
                    pop_n(&mut self.new_nodes, action.count);
                }
                DiffOperation::ReduceOld => replace_top_with_children(&mut self.old_nodes),
                DiffOperation::ReduceNew => replace_top_with_children(&mut self.new_nodes),
                DiffOperation::ReduceBoth => {
                    replace_top_with_children(&mut self.old_nodes);
                    replace_top_with_children(&mut self.new_nodes);
                }
                DiffOperation::InsertNew => self.insert_new(action.count),
                DiffOperation::DeleteOld => self.delete_old(action.count),
                DiffOperation::ReplaceOldWithNew => self.replace_old_with_new(),
            }
        }

        debug!(changes = self.changes.len(), "computed tree edit script");
        self.changes
    }

    fn next_action(&mut self) -> DiffAction {
        let old_top = peek_at(&self.old_nodes, 0).clone();
        let new_top = peek_at(&self.new_nodes, 0).clone();
        let old_is_token = old_top.is_token();
        let new_is_token = new_top.is_token();

        let old_in_new = find_best_match(&self.new_nodes, &old_top, 0, &mut self.scratch);
        let new_in_old = find_best_match(&self.old_nodes, &new_top, 0, &mut self.scratch);

        match (old_in_new, new_in_old) {
            (Some(oin), Some(nio)) if oin.index == 0 && nio.index == 0 => {
                // mutually nearest
                if old_top.key() == new_top.key() {
                    DiffAction { op: DiffOperation::SkipBoth, count: 1 }
                } else if !old_is_token && !new_is_token {
                    DiffAction { op: DiffOperation::ReduceBoth, count: 1 }
                } else {
                    DiffAction { op: DiffOperation::ReplaceOldWithNew, count: 1 }
                }
            }
            // old-side match is at least as good (equal-similarity ties
            // deliberately land here)
            (Some(oin), nio) if nio.is_none_or(|n| oin.similarity >= n.similarity) => {
                if oin.index > 0 {
                    // the old top reappears later in the new list, which
                    // suggests nodes were inserted before it — unless the
                    // old top also matches a later sibling of its own, in
                    // which case the real story is a move within the list
                    let in_own = find_best_match(&self.old_nodes, &old_top, 1, &mut self.scratch);
                    let has_similar_sibling =
                        in_own.is_some_and(|m| m.index >= 1 && m.similarity >= oin.similarity);
                    if !has_similar_sibling {
                        return DiffAction { op: DiffOperation::InsertNew, count: oin.index };
                    }
                }
                if !new_is_token {
                    if old_top.kind() == new_top.kind() {
                        DiffAction { op: DiffOperation::ReduceBoth, count: 1 }
                    } else {
                        DiffAction { op: DiffOperation::ReduceNew, count: 1 }
                    }
                } else {
                    DiffAction { op: DiffOperation::ReplaceOldWithNew, count: 1 }
                }
            }
            (_, Some(nio)) => {
                if nio.index > 0 {
                    DiffAction { op: DiffOperation::DeleteOld, count: nio.index }
                } else if !old_is_token {
                    if old_top.kind() == new_top.kind() {
                        DiffAction { op: DiffOperation::ReduceBoth, count: 1 }
                    } else {
                        DiffAction { op: DiffOperation::ReduceOld, count: 1 }
                    }
                } else {
                    DiffAction { op: DiffOperation::ReplaceOldWithNew, count: 1 }
                }
            }
            (_, None) => {
                // no directional match at all; a high raw similarity still
                // justifies descending into both
                if !old_is_token && !new_is_token {
                    let sim = get_similarity(&old_top, &new_top, &mut self.scratch);
                    if sim >= old_top.full_len().max(new_top.full_len()) {
                        return DiffAction { op: DiffOperation::ReduceBoth, count: 1 };
                    }
                }
                DiffAction { op: DiffOperation::ReplaceOldWithNew, count: 1 }
            }
        }
    }

    fn insert_new(&mut self, count: usize) {
        let new_span = span_of_first(&self.new_nodes, count);
        let inserted = copy_first(&self.new_nodes, count);
        pop_n(&mut self.new_nodes, count);
        let start = self
            .old_nodes
            .last()
            .map_or(self.old_end, |top| top.position());
        self.record_change(ChangeRecord {
            span: TextSpan::new(start, 0),
            new_length: new_span.len,
            removed: Vec::new(),
            inserted,
        });
    }

    fn delete_old(&mut self, count: usize) {
        let old_span = span_of_first(&self.old_nodes, count);
        let removed = copy_first(&self.old_nodes, count);
        pop_n(&mut self.old_nodes, count);
        self.record_change(ChangeRecord {
            span: old_span,
            new_length: 0,
            removed,
            inserted: Vec::new(),
        });
    }

    fn replace_old_with_new(&mut self) {
        let removed = copy_first(&self.old_nodes, 1);
        pop_n(&mut self.old_nodes, 1);
        let inserted = copy_first(&self.new_nodes, 1);
        pop_n(&mut self.new_nodes, 1);
        let span = removed[0].full_span();
        let new_length = inserted[0].full_len();
        self.record_change(ChangeRecord {
            span,
            new_length,
            removed,
            inserted,
        });
    }

    fn record_change(&mut self, change: ChangeRecord) {
        if let Some(last) = self.changes.last_mut() {
            if last.span.end() == change.span.start {
                // adjacent edits collapse into one record
                last.span = TextSpan::new(last.span.start, last.span.len + change.span.len);
                last.new_length += change.new_length;
                last.removed.extend(change.removed);
                last.inserted.extend(change.inserted);
                return;
            }
            debug_assert!(change.span.start >= last.span.end());
        }
        self.changes.push(change);
    }
}

/// Entry `index` positions from the top of the frontier.
fn peek_at(stack: &[NodeOrToken], index: usize) -> &NodeOrToken {
    &stack[stack.len() - 1 - index]
}

fn pop_n(stack: &mut Vec<NodeOrToken>, count: usize) {
    stack.truncate(stack.len() - count);
}

/// The first `count` frontier entries in document order.
fn copy_first(stack: &[NodeOrToken], count: usize) -> Vec<NodeOrToken> {
    stack[stack.len() - count..].iter().rev().cloned().collect()
}

/// Text covered by the first `count` frontier entries; the frontier is
/// contiguous in document order, so this is one span.
fn span_of_first(stack: &[NodeOrToken], count: usize) -> TextSpan {
    let first = peek_at(stack, 0);
    let last = peek_at(stack, count - 1);
    TextSpan::new(first.position(), last.full_span().end() - first.position())
}

/// Pop the top entry and push its non-zero-length children in its place,
/// first child on top. Refines granularity without recording a change.
fn replace_top_with_children(stack: &mut Vec<NodeOrToken>) {
    let Some(top) = stack.pop() else {
        return;
    };
    let children: Vec<_> = top.children().collect();
    for child in children.into_iter().rev() {
        stack.push(child);
    }
}

/// Scan at most [`MAX_SEARCH_LENGTH`] frontier entries for the best
/// approximate match of `target`, starting `start_index` entries from the
/// top. Identity wins outright; kind-similar entries are scored by
/// [`get_similarity`]; dissimilar entries are probed one level into their
/// children to catch a node that moved a level up or down.
fn find_best_match(
    stack: &[NodeOrToken],
    target: &NodeOrToken,
    start_index: usize,
    scratch: &mut SimilarityScratch,
) -> Option<BestMatch> {
    let mut best: Option<BestMatch> = None;

    for (i, entry) in stack.iter().rev().take(MAX_SEARCH_LENGTH).enumerate() {
        if i < start_index {
            continue;
        }
        if entry.key() == target.key() {
            let sim = target.full_len();
            if best.is_none_or(|b| sim > b.similarity) {
                return Some(BestMatch { index: i, similarity: sim });
            }
        } else if entry.kind() == target.kind() {
            let sim = get_similarity(entry, target, scratch);

            // a full-span score can come from trivia alone; confirm with
            // the exact text before treating a token as an outright match
            if sim == target.full_len()
                && target.is_token()
                && entry.full_text() == target.full_text()
            {
                return Some(BestMatch { index: i, similarity: sim });
            }
            if best.is_none_or(|b| sim > b.similarity) {
                best = Some(BestMatch { index: i, similarity: sim });
            }
        } else {
            // probe one level into this entry's children
            for child in entry.children().take(MAX_SEARCH_LENGTH) {
                if child.key() == target.key() {
                    return Some(BestMatch { index: i, similarity: target.full_len() });
                }
                if child.kind() == target.kind() {
                    let sim = get_similarity(&child, target, scratch);
                    if best.is_none_or(|b| sim > b.similarity) {
                        best = Some(BestMatch { index: i, similarity: sim });
                    }
                }
            }
        }
    }

    best
}

/// Heuristic weight of shared content: the character count covered by
/// nodes, tokens, and trivia the two sides have in common.
///
/// For tokens: matching main text plus trivia entries whose identity is
/// shared between the two trivia sets. For interior nodes: child subtrees
/// shared by identity, plus token children with identical text even
/// without identity.
fn get_similarity(a: &NodeOrToken, b: &NodeOrToken, scratch: &mut SimilarityScratch) -> usize {
    scratch.node_keys.clear();
    scratch.token_texts.clear();
    let mut w = 0;

    if a.is_token() && b.is_token() {
        let text_a = a.token_text().unwrap_or("");
        let text_b = b.token_text().unwrap_or("");
        if text_a == text_b {
            w += text_a.len();
        }

        for tr in a.leading_trivia().iter().chain(a.trailing_trivia()) {
            scratch.node_keys.insert(NodeKey::of_trivia(tr));
        }
        for tr in b.leading_trivia().iter().chain(b.trailing_trivia()) {
            if scratch.node_keys.contains(&NodeKey::of_trivia(tr)) {
                w += tr.len();
            }
        }
    } else {
        for child in a.children() {
            scratch.node_keys.insert(child.key());
            if let Some(text) = child.token_text() {
                scratch.token_texts.insert(text.to_string());
            }
        }
        for child in b.children() {
            if scratch.node_keys.contains(&child.key()) {
                w += child.full_len();
            } else if let Some(text) = child.token_text() {
                if scratch.token_texts.contains(text) {
                    w += text.len();
                }
            }
        }
    }

    w
}
