//! Buffered mutations held by a transaction until a matching read
//! materializes the node, or until commit (spec §3, §4.2.1, §9).

use std::sync::Arc;

use dtree_generic::{IntervalType, Key, KeyInfo};

use crate::cell::Cell;

/// The three pending-operation shapes a transaction may buffer against a
/// coid, as a tagged union carrying owned composite-key bytes and a
/// shared `prki` (spec §9's design note).
#[derive(Clone)]
pub enum PendingOpKind {
    Add(Cell),
    DelRange {
        interval_type: IntervalType,
        cell1: Option<Key>,
        cell2: Option<Key>,
    },
    AttrSet {
        attrid: usize,
        value: u64,
    },
}

/// A single buffered operation, tagged with the subtransaction level that
/// installed it (spec §3's "Pending operation").
#[derive(Clone)]
pub struct PendingOp {
    pub kind: PendingOpKind,
    pub level: u32,
    pub prki: Option<Arc<KeyInfo>>,
}

impl PendingOp {
    pub fn add(cell: Cell, level: u32, prki: Option<Arc<KeyInfo>>) -> Self {
        Self {
            kind: PendingOpKind::Add(cell),
            level,
            prki,
        }
    }

    pub fn del_range(
        interval_type: IntervalType,
        cell1: Option<Key>,
        cell2: Option<Key>,
        level: u32,
        prki: Option<Arc<KeyInfo>>,
    ) -> Self {
        Self {
            kind: PendingOpKind::DelRange {
                interval_type,
                cell1,
                cell2,
            },
            level,
            prki,
        }
    }

    pub fn attr_set(attrid: usize, value: u64, level: u32) -> Self {
        Self {
            kind: PendingOpKind::AttrSet { attrid, value },
            level,
            prki: None,
        }
    }
}
