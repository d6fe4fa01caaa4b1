//! Post-processing of raw change records into minimal text changes.
//!
//! A replace-type record often rewrites more text than actually changed:
//! the differ works at node granularity, so a one-character edit inside a
//! token comes back as the whole token. The reducer trims the common
//! leading and trailing character runs off each replace, drops records
//! that turn out to be no-ops at text granularity, and materializes
//! replacement text only when the caller asked for it.

use crate::differ::ChangeRecord;
use crate::error::{Error, Result};
use crate::tree::{NodeOrToken, SyntaxTree, TextSpan};

/// A reduced, text-level change over the old document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeChange {
    /// Range replaced in the old document.
    pub span: TextSpan,
    /// Byte length of the replacement.
    pub new_length: usize,
    /// Replacement text, present when requested from the entry point.
    pub new_text: Option<String>,
}

impl TreeChange {
    /// Whole-tree insertion at position zero, for diffs with no old tree.
    pub(crate) fn from_tree(tree: &SyntaxTree, include_text: bool) -> TreeChange {
        TreeChange {
            span: TextSpan::new(0, 0),
            new_length: tree.full_len(),
            new_text: include_text.then(|| tree.text()),
        }
    }
}

/// Shrink each replace-type record to its minimal range; pure inserts and
/// deletes pass through untouched (there is nothing to trim against).
pub(crate) fn reduce(records: Vec<ChangeRecord>, include_text: bool) -> Vec<TreeChange> {
    let mut out = Vec::with_capacity(records.len());

    for record in records {
        if record.span.len > 0 && record.new_length > 0 {
            let old_text = concat_text(&record.removed);
            let new_text = concat_text(&record.inserted);
            debug_assert_eq!(new_text.len(), record.new_length);

            let (leading, trailing) = common_edge_lengths(&old_text, &new_text);
            let span = TextSpan::new(record.span.start + leading, record.span.len - leading - trailing);
            let new_length = record.new_length - leading - trailing;

            // a no-op rediscovered at text granularity
            if span.len == 0 && new_length == 0 {
                continue;
            }

            let new_text = include_text
                .then(|| new_text[leading..new_text.len() - trailing].to_string());
            out.push(TreeChange { span, new_length, new_text });
        } else {
            out.push(TreeChange {
                span: record.span,
                new_length: record.new_length,
                new_text: include_text.then(|| concat_text(&record.inserted)),
            });
        }
    }

    out
}

/// Splice a reduced edit script into `old_text`. The script must carry
/// materialized text, i.e. come from
/// [`compute_diff_with_text`](crate::differ::compute_diff_with_text).
pub fn apply_changes(old_text: &str, changes: &[TreeChange]) -> Result<String> {
    let mut out = String::with_capacity(old_text.len());
    let mut cursor = 0;

    for change in changes {
        let Some(new_text) = change.new_text.as_deref() else {
            return Err(Error::InvalidArgument(
                "change has no materialized text to apply",
            ));
        };
        if change.span.start < cursor || change.span.end() > old_text.len() {
            return Err(Error::InvalidArgument(
                "change ranges must be ascending and within the old text",
            ));
        }
        out.push_str(&old_text[cursor..change.span.start]);
        out.push_str(new_text);
        cursor = change.span.end();
    }

    out.push_str(&old_text[cursor..]);
    Ok(out)
}

fn concat_text(nodes: &[NodeOrToken]) -> String {
    let mut out = String::new();
    for node in nodes {
        node.write_full_text(&mut out);
    }
    out
}

/// Byte lengths of the longest common leading and trailing character runs.
/// Counted in whole characters so the cut points stay on UTF-8 boundaries,
/// and never overlapping on either string.
fn common_edge_lengths(old: &str, new: &str) -> (usize, usize) {
    let mut leading = 0;
    for (a, b) in old.chars().zip(new.chars()) {
        if a != b {
            break;
        }
        leading += a.len_utf8();
    }

    let old_rest = &old[leading..];
    let new_rest = &new[leading..];
    let mut trailing = 0;
    for (a, b) in old_rest.chars().rev().zip(new_rest.chars().rev()) {
        if a != b {
            break;
        }
        trailing += a.len_utf8();
    }

    (leading, trailing)
}
