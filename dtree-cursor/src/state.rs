//! Cursor lifecycle state (spec §4.5).

use dtree_error::DtError;

/// `eState`: explicit tagged variant rather than ad-hoc booleans, matching
/// spec.md §9's design note ("Cursor state machine ... explicit tagged
/// variant; save/restore happens at well-defined rollback points").
#[derive(Debug)]
pub enum CursorState {
    /// Never seeked, or the tree was found empty.
    Invalid,
    /// `node[levelLeaf][nodeIndex[levelLeaf]]` is the current row.
    Valid,
    /// The row was located by a direct data-container read, bypassing the
    /// tree; no node stack is populated.
    Direct,
    /// A save/restore boundary captured the current key for re-seek.
    RequireSeek,
    /// A rollback tripped the cursor.
    Fault(DtError),
}

impl CursorState {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// The outcome of `seek`/`first`/`last`: where the cursor ended up
/// relative to the requested key.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SeekResult {
    /// The cursor sits exactly on the requested key.
    Match,
    /// The cursor sits on the smallest key greater than requested.
    After,
    /// The cursor sits on the largest key less than requested.
    Before,
    /// The tree holds no rows at all.
    Empty,
}
