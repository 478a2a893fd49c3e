//! Applying a transaction's buffered `PendingOp` log to a freshly-read
//! supervalue (spec §4.2.1 "Pending-op replay").

use dtree_error::DtResult;
use dtree_generic::{Bound, Key};

use crate::cell::Cell;
use crate::pending_op::{PendingOp, PendingOpKind};
use crate::supervalue::SuperValue;

/// Apply `ops` to `node` in FIFO order, exactly as spec §4.2.1 describes:
/// - `add`: binary search for the key; replace in place if present, else
///   insert at the insertion point.
/// - `delrange`: clip `[index1, index2]` to the node's bounds per the
///   interval type, and delete the (possibly empty) range.
/// - `attrset`: write `Attrs[attrid]`, failing with `attr-out-of-range` if
///   out of bounds.
pub fn apply_pending_ops(node: &mut SuperValue, ops: &[PendingOp]) -> DtResult<()> {
    for op in ops {
        match &op.kind {
            PendingOpKind::Add(cell) => apply_add(node, cell.clone()),
            PendingOpKind::DelRange {
                interval_type,
                cell1,
                cell2,
            } => apply_del_range(node, *interval_type, cell1.as_ref(), cell2.as_ref()),
            PendingOpKind::AttrSet { attrid, value } => {
                node.set_attr(*attrid, *value)?;
            }
        }
    }

    Ok(())
}

fn apply_add(node: &mut SuperValue, cell: Cell) {
    let collator = node.collator();
    let (index, matched) = collator.bisect_left(
        &node.cells().iter().map(|c| c.key.clone()).collect::<Vec<Key>>(),
        &cell.key,
        false,
    );

    if matched {
        node.replace_cell(index, cell);
    } else {
        node.insert_cell(index, cell);
    }
}

fn apply_del_range(
    node: &mut SuperValue,
    interval_type: dtree_generic::IntervalType,
    cell1: Option<&Key>,
    cell2: Option<&Key>,
) {
    let keys: Vec<Key> = node.cells().iter().map(|c| c.key.clone()).collect();
    let collator = node.collator();

    let index1 = match interval_type.left_bound() {
        Bound::Infinite => 0,
        Bound::Closed => {
            let key = cell1.expect("closed left bound requires cell1");
            collator.bisect_left(&keys, key, false).0
        }
        Bound::Open => {
            let key = cell1.expect("open left bound requires cell1");
            let (index, matched) = collator.bisect_left(&keys, key, false);
            if matched {
                index + 1
            } else {
                index
            }
        }
    };

    let index2 = match interval_type.right_bound() {
        Bound::Infinite => keys.len(),
        Bound::Closed => {
            let key = cell2.expect("closed right bound requires cell2");
            let (index, matched) = collator.bisect_left(&keys, key, false);
            if matched {
                index + 1
            } else {
                index
            }
        }
        Bound::Open => {
            let key = cell2.expect("open right bound requires cell2");
            collator.bisect_left(&keys, key, false).0
        }
    };

    if index1 < index2 {
        node.delete_cell_range(index1, index2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtree_generic::{CellType, IntervalType};

    fn leaf_with(keys: &[i64]) -> SuperValue {
        let mut node = SuperValue::new_leaf(CellType::Int, None);
        for &k in keys {
            let collator = node.collator();
            let existing: Vec<Key> = node.cells().iter().map(|c| c.key.clone()).collect();
            let (index, _) = collator.bisect_left(&existing, &Key::Int(k), false);
            node.insert_cell(index, Cell::leaf(Key::Int(k)));
        }
        node
    }

    #[test]
    fn half_open_delrange_matches_scenario_6() {
        let mut node = leaf_with(&[1, 3, 5, 7]);
        let op = PendingOp::del_range(
            IntervalType::OpenClosed,
            Some(Key::Int(1)),
            Some(Key::Int(3)),
            0,
            None,
        );

        apply_pending_ops(&mut node, std::slice::from_ref(&op)).unwrap();

        let remaining: Vec<i64> = node.cells().iter().map(|c| c.key.as_int().unwrap()).collect();
        assert_eq!(remaining, vec![1, 5, 7]);
    }

    #[test]
    fn add_replaces_existing_key_in_place() {
        let mut node = leaf_with(&[1, 2, 3]);
        let op = PendingOp::add(Cell::leaf(Key::Int(2)), 0, None);
        apply_pending_ops(&mut node, std::slice::from_ref(&op)).unwrap();
        assert_eq!(node.ncells(), 3);
    }

    #[test]
    fn add_inserts_new_key_at_sorted_position() {
        let mut node = leaf_with(&[1, 3]);
        let op = PendingOp::add(Cell::leaf(Key::Int(2)), 0, None);
        apply_pending_ops(&mut node, std::slice::from_ref(&op)).unwrap();
        let keys: Vec<i64> = node.cells().iter().map(|c| c.key.as_int().unwrap()).collect();
        assert_eq!(keys, vec![1, 2, 3]);
    }
}
