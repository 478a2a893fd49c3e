//! Cell keys and the collation seam used to compare them (spec §3, §4.5.1).
//!
//! Composite-key comparison is delegated to an injected comparator rather
//! than implemented here: spec §1 places "the packed-record collation
//! library used to compare composite keys" out of scope for this crate.
//! `KeyInfo` carries only the metadata (sort order per column) a caller
//! needs to construct that comparator; `PackedKeyComparator` is the seam.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use collate::Collate;

/// Whether a tree stores 64-bit integer keys or packed composite-key
/// blobs (spec §3 `CellType`).
#[derive(Copy, Clone, Eq, PartialEq, Debug, serde::Serialize, serde::Deserialize)]
pub enum CellType {
    Int = 0,
    Packed = 1,
}

/// A cell's key: a 64-bit integer for an intkey tree, or an opaque packed
/// byte string (produced by the out-of-scope packed-record library) for a
/// composite-key index.
#[derive(Clone, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Key {
    Int(i64),
    Packed(Bytes),
}

impl Key {
    pub fn cell_type(&self) -> CellType {
        match self {
            Self::Int(_) => CellType::Int,
            Self::Packed(_) => CellType::Packed,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Packed(_) => None,
        }
    }

    pub fn as_packed(&self) -> Option<&Bytes> {
        match self {
            Self::Packed(b) => Some(b),
            Self::Int(_) => None,
        }
    }

    /// Byte length as it would be stored in a cell's `pKey`/`nKey`, used
    /// for `CellsSize` bookkeeping.
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Int(_) => 0,
            Self::Packed(b) => b.len(),
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "Key::Int({})", n),
            Self::Packed(b) => write!(f, "Key::Packed({} bytes)", b.len()),
        }
    }
}

/// Ascending or descending collation for one column of a composite key.
#[derive(Copy, Clone, Eq, PartialEq, Debug, serde::Serialize, serde::Deserialize)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// The seam onto the out-of-scope packed-record collation library: given
/// two packed composite-key blobs and the column sort orders, produce
/// their collation order.
pub trait PackedKeyComparator: Send + Sync {
    fn compare(&self, left: &[u8], right: &[u8], sort_order: &[SortOrder]) -> Ordering;
}

/// A byte-lexicographic comparator that ignores per-column sort order.
/// Sufficient for tests and for callers that have not yet wired in the
/// real packed-record library; production deployments inject their own
/// `PackedKeyComparator`.
#[derive(Default)]
pub struct LexicographicComparator;

impl PackedKeyComparator for LexicographicComparator {
    fn compare(&self, left: &[u8], right: &[u8], _sort_order: &[SortOrder]) -> Ordering {
        left.cmp(right)
    }
}

/// Shared collation + sort-order information for a composite-key tree
/// (spec §3 `prki`). `None` for an intkey tree.
#[derive(Clone)]
pub struct KeyInfo {
    pub sort_order: Vec<SortOrder>,
    comparator: Arc<dyn PackedKeyComparator>,
}

impl KeyInfo {
    pub fn new(sort_order: Vec<SortOrder>, comparator: Arc<dyn PackedKeyComparator>) -> Self {
        Self {
            sort_order,
            comparator,
        }
    }

    pub fn lexicographic(columns: usize) -> Self {
        Self::new(
            vec![SortOrder::Asc; columns],
            Arc::new(LexicographicComparator::default()),
        )
    }
}

/// Collates `Key` values: integer keys compare directly, packed keys
/// delegate to the tree's `KeyInfo` comparator. This is the concrete
/// `Collate` implementation the cursor engine's binary search (§4.5.1)
/// and the global inner-node cache run against, in the same role
/// `tc_value::ValueCollator` plays for the teacher's `tc-btree`.
#[derive(Clone)]
pub struct KeyCollator {
    prki: Option<KeyInfo>,
}

impl KeyCollator {
    pub fn new(prki: Option<KeyInfo>) -> Self {
        Self { prki }
    }

    pub fn intkey() -> Self {
        Self { prki: None }
    }

    /// Binary search `keys` for `target`, returning `(insertion_index,
    /// matched)`. When `bias_right` is set the first probe starts at the
    /// top of the range, which is cheaper for the common append-only
    /// insert pattern (spec §4.5.1).
    pub fn bisect_left(&self, keys: &[Key], target: &Key, bias_right: bool) -> (usize, bool) {
        if keys.is_empty() {
            return (0, false);
        }

        if bias_right {
            let last = keys.len() - 1;
            match self.cmp(target, &keys[last]) {
                Ordering::Greater => return (keys.len(), false),
                Ordering::Equal => return (last, true),
                Ordering::Less => {}
            }
        }

        let mut lo = 0usize;
        let mut hi = keys.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.cmp(target, &keys[mid]) {
                Ordering::Less => hi = mid,
                Ordering::Greater => lo = mid + 1,
                Ordering::Equal => return (mid, true),
            }
        }

        (lo, false)
    }

    /// Compare two keys directly, e.g. to check fence-key invariants or
    /// sibling ordering (§4.5.2).
    pub fn compare_slice(&self, left: &Key, right: &Key) -> Ordering {
        self.cmp(left, right)
    }
}

impl Collate for KeyCollator {
    type Value = Key;

    fn cmp(&self, left: &Key, right: &Key) -> Ordering {
        match (left, right) {
            (Key::Int(a), Key::Int(b)) => a.cmp(b),
            (Key::Packed(a), Key::Packed(b)) => {
                let sort_order = self
                    .prki
                    .as_ref()
                    .map(|info| info.sort_order.as_slice())
                    .unwrap_or(&[]);
                let comparator = self
                    .prki
                    .as_ref()
                    .map(|info| info.comparator.clone());
                match comparator {
                    Some(cmp) => cmp.compare(a, b, sort_order),
                    None => a.cmp(b),
                }
            }
            // An intkey/packed mismatch is a schema error the caller should
            // have rejected before reaching comparison; order by type so a
            // debug build fails loudly in tests rather than panicking here.
            (Key::Int(_), Key::Packed(_)) => Ordering::Less,
            (Key::Packed(_), Key::Int(_)) => Ordering::Greater,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intkey_bisect_finds_exact_match() {
        let collator = KeyCollator::intkey();
        let keys: Vec<Key> = vec![1, 3, 5, 7].into_iter().map(Key::Int).collect();
        assert_eq!(collator.bisect_left(&keys, &Key::Int(5), false), (2, true));
        assert_eq!(collator.bisect_left(&keys, &Key::Int(4), false), (2, false));
        assert_eq!(collator.bisect_left(&keys, &Key::Int(8), false), (4, false));
    }

    #[test]
    fn packed_key_uses_injected_comparator() {
        let info = KeyInfo::lexicographic(1);
        let collator = KeyCollator::new(Some(info));
        let a = Key::Packed(Bytes::from_static(b"aaa"));
        let b = Key::Packed(Bytes::from_static(b"bbb"));
        assert_eq!(collator.compare_slice(&a, &b), Ordering::Less);
    }
}
