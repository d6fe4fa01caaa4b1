//! Three-way merge of an ordered sibling sequence.
//!
//! A diff3-style list merge: diff the base ordering against each side's
//! ordering, then walk the two op streams over the base in lockstep.
//! Children whose relative order is unchanged on both sides keep the base
//! order; a child repositioned by only one side lands where that side put
//! it, anchored to its unchanged neighbors; a child both sides moved to
//! different anchors is a conflict for the resolution policy to settle.
//!
//! The element type is only required to be a cheap, hashable key — the
//! merger feeds it canonical node identities.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use similar::{Algorithm, DiffOp, capture_diff_slices};

use crate::merger::Resolution;

/// A child both sides repositioned incompatibly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderConflict<K> {
    pub child: K,
}

/// Merge two revised orderings of `base`. All three sequences must contain
/// each element at most once.
pub fn merge_sibling_order<K>(
    base: &[K],
    mine: &[K],
    theirs: &[K],
    resolution: Resolution,
) -> Result<Vec<K>, OrderConflict<K>>
where
    K: Copy + Eq + Hash + Ord,
{
    let ops_mine = capture_diff_slices(Algorithm::Myers, base, mine);
    let ops_theirs = capture_diff_slices(Algorithm::Myers, base, theirs);

    let (kept_mine, mut ins_mine) = decompose(&ops_mine, base.len(), mine);
    let (kept_theirs, mut ins_theirs) = decompose(&ops_theirs, base.len(), theirs);

    // elements repositioned (or introduced) by both sides: an equal anchor
    // is agreement, emitted once; different anchors are a conflict
    let anchors_theirs: HashMap<K, usize> = ins_theirs
        .iter()
        .flat_map(|(&anchor, items)| items.iter().map(move |&k| (k, anchor)))
        .collect();

    let mut drop_from_mine: HashSet<K> = HashSet::new();
    let mut drop_from_theirs: HashSet<K> = HashSet::new();

    for anchor in 0..=base.len() {
        let Some(items) = ins_mine.get(&anchor) else {
            continue;
        };
        for &k in items {
            let Some(&their_anchor) = anchors_theirs.get(&k) else {
                continue;
            };
            if their_anchor == anchor {
                drop_from_theirs.insert(k);
            } else {
                match resolution {
                    Resolution::Fail => return Err(OrderConflict { child: k }),
                    Resolution::Mine => {
                        drop_from_theirs.insert(k);
                    }
                    Resolution::Theirs => {
                        drop_from_mine.insert(k);
                    }
                }
            }
        }
    }

    for items in ins_mine.values_mut() {
        items.retain(|k| !drop_from_mine.contains(k));
    }
    for items in ins_theirs.values_mut() {
        items.retain(|k| !drop_from_theirs.contains(k));
    }

    // walk the base; at each gap emit mine's insertions, then theirs'
    let mut merged = Vec::new();
    let mut emitted: HashSet<K> = HashSet::new();
    for i in 0..=base.len() {
        if let Some(items) = ins_mine.get(&i) {
            for &k in items {
                if emitted.insert(k) {
                    merged.push(k);
                }
            }
        }
        if let Some(items) = ins_theirs.get(&i) {
            for &k in items {
                if emitted.insert(k) {
                    merged.push(k);
                }
            }
        }
        if i < base.len() && kept_mine[i] && kept_theirs[i] {
            let k = base[i];
            if emitted.insert(k) {
                merged.push(k);
            }
        }
    }

    Ok(merged)
}

/// Split a diff into per-base-index keep flags and insertions keyed by the
/// base index they anchor before.
fn decompose<K: Copy>(
    ops: &[DiffOp],
    base_len: usize,
    revised: &[K],
) -> (Vec<bool>, HashMap<usize, Vec<K>>) {
    let mut kept = vec![false; base_len];
    let mut inserts: HashMap<usize, Vec<K>> = HashMap::new();

    for op in ops {
        match *op {
            DiffOp::Equal { old_index, len, .. } => {
                for flag in &mut kept[old_index..old_index + len] {
                    *flag = true;
                }
            }
            DiffOp::Delete { .. } => {}
            DiffOp::Insert { old_index, new_index, new_len } => {
                inserts
                    .entry(old_index)
                    .or_default()
                    .extend(&revised[new_index..new_index + new_len]);
            }
            DiffOp::Replace { old_index, new_index, new_len, .. } => {
                inserts
                    .entry(old_index)
                    .or_default()
                    .extend(&revised[new_index..new_index + new_len]);
            }
        }
    }

    (kept, inserts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merge(
        base: &[i32],
        mine: &[i32],
        theirs: &[i32],
        resolution: Resolution,
    ) -> Result<Vec<i32>, OrderConflict<i32>> {
        merge_sibling_order(base, mine, theirs, resolution)
    }

    #[test]
    fn unchanged_order_stays() {
        let seq = [1, 2, 3];
        assert_eq!(merge(&seq, &seq, &seq, Resolution::Fail).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn single_side_reorder_wins() {
        assert_eq!(
            merge(&[1, 2, 3], &[3, 1, 2], &[1, 2, 3], Resolution::Fail).unwrap(),
            vec![3, 1, 2]
        );
        assert_eq!(
            merge(&[1, 2, 3], &[1, 2, 3], &[2, 3, 1], Resolution::Fail).unwrap(),
            vec![2, 3, 1]
        );
    }

    #[test]
    fn concurrent_insertions_both_land_mine_first() {
        assert_eq!(
            merge(&[1], &[1, 2], &[1, 3], Resolution::Fail).unwrap(),
            vec![1, 2, 3]
        );
        assert_eq!(
            merge(&[1], &[2, 1], &[3, 1], Resolution::Fail).unwrap(),
            vec![2, 3, 1]
        );
    }

    #[test]
    fn agreed_move_emits_once() {
        assert_eq!(
            merge(&[1, 2, 3], &[3, 1, 2], &[3, 1, 2], Resolution::Fail).unwrap(),
            vec![3, 1, 2]
        );
    }

    #[test]
    fn agreed_insertion_emits_once() {
        assert_eq!(
            merge(&[1, 2], &[1, 9, 2], &[1, 9, 2], Resolution::Fail).unwrap(),
            vec![1, 9, 2]
        );
    }

    #[test]
    fn removal_by_one_side_wins() {
        assert_eq!(
            merge(&[1, 2, 3], &[1, 3], &[1, 2, 3], Resolution::Fail).unwrap(),
            vec![1, 3]
        );
    }

    #[test]
    fn incompatible_moves_follow_policy() {
        // mine moves 3 to the front, theirs moves it to the back
        let base = [1, 2, 3, 4, 5];
        let mine = [3, 1, 2, 4, 5];
        let theirs = [1, 2, 4, 5, 3];

        assert_eq!(
            merge(&base, &mine, &theirs, Resolution::Fail),
            Err(OrderConflict { child: 3 })
        );
        assert_eq!(
            merge(&base, &mine, &theirs, Resolution::Mine).unwrap(),
            vec![3, 1, 2, 4, 5]
        );
        assert_eq!(
            merge(&base, &mine, &theirs, Resolution::Theirs).unwrap(),
            vec![1, 2, 4, 5, 3]
        );
    }

    #[test]
    fn disjoint_moves_both_apply() {
        // mine sends 1 to the back, theirs pulls 4 forward
        let base = [1, 2, 3, 4];
        let mine = [2, 3, 4, 1];
        let theirs = [1, 4, 2, 3];
        assert_eq!(
            merge(&base, &mine, &theirs, Resolution::Fail).unwrap(),
            vec![4, 2, 3, 1]
        );
    }

    #[test]
    fn empty_base_interleaves_additions() {
        assert_eq!(
            merge(&[], &[1, 2], &[3], Resolution::Fail).unwrap(),
            vec![1, 2, 3]
        );
    }
}
