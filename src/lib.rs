//! # syntax-merge
//!
//! Structural diffing and three-way merging of syntax trees, for tools
//! that need semantic-aware comparison of parsed source — refactoring
//! engines, merge drivers, incremental front ends — rather than
//! line-based text diff.
//!
//! ## Approach
//!
//! 1. **Differ** — a greedy, similarity-guided walk over two trees using
//!    one LIFO frontier per side and a bounded lookahead (8 entries, one
//!    probe level into children). Identity between shared green nodes is
//!    an O(1) "unchanged" proof; kind-similar nodes are scored by shared
//!    child and trivia content. Near-linear, with no optimality claim —
//!    this is not a tree-edit-distance solver.
//!
//! 2. **Change reduction** — each replace-type record is shrunk to the
//!    minimal character range by trimming common leading/trailing runs,
//!    and dropped outright when nothing remains.
//!
//! 3. **Merger** — base→mine and base→theirs edit scripts drive node
//!    selection, re-parenting with cycle breaking, diff3-style sibling
//!    ordering, and property reconciliation, producing one merged tree or
//!    a reported conflict under [`Resolution::Fail`].
//!
//! Guarantees: untouched code stays untouched, a single-sided change is
//! preserved, an identical change on both sides lands exactly once, and a
//! genuine conflict resolves per [`Resolution`].
//!
//! The tree model is deliberately minimal: immutable green elements
//! shared across revisions, with trivia on tokens and an optional label
//! on nodes. A host parser builds trees once and derives revisions by
//! reusing unchanged subtrees.
//!
//! ## Example
//!
//! ```rust
//! use syntax_merge::{
//!     apply_changes, compute_diff_with_text, merge_trees, node, token, Resolution, SyntaxKind,
//!     SyntaxTree,
//! };
//!
//! const FILE: SyntaxKind = SyntaxKind(0);
//! const WORD: SyntaxKind = SyntaxKind(1);
//!
//! let greeting = token(WORD, "hello ");
//! let base = SyntaxTree::new(node(FILE, vec![greeting.clone(), token(WORD, "world")]));
//! let mine = SyntaxTree::new(node(FILE, vec![greeting.clone(), token(WORD, "tree")]));
//!
//! // the edit script rebuilds the new text from the old
//! let changes = compute_diff_with_text(Some(&base), Some(&mine)).unwrap();
//! assert_eq!(apply_changes(&base.text(), &changes).unwrap(), mine.text());
//!
//! // an untouched "theirs" means mine wins wholesale
//! let theirs = SyntaxTree::new(base.root_green().clone());
//! let merged = merge_trees(Some(&base), Some(&mine), Some(&theirs), Resolution::Mine).unwrap();
//! assert_eq!(merged.text(), "hello tree");
//! ```

pub mod differ;
pub mod error;
pub mod merger;
pub mod ordering;
pub mod reducer;
pub mod tree;

// Re-export the primary public API
pub use differ::{compute_diff, compute_diff_with_text};
pub use error::{Error, Result};
pub use merger::{Resolution, merge_trees, try_merge_trees};
pub use reducer::{TreeChange, apply_changes};
pub use tree::{
    GreenElement, GreenTrivia, NodeKey, NodeOrToken, SyntaxKind, SyntaxTree, TextSpan,
    labeled_node, node, token, token_with_trivia, trivia,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_types_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SyntaxTree>();
        assert_send_sync::<NodeOrToken>();
        assert_send_sync::<GreenElement>();
        assert_send_sync::<TreeChange>();
        assert_send_sync::<Error>();
    }
}
