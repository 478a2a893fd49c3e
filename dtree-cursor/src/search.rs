//! Cell search (spec §4.5.1): a thin wrapper over `KeyCollator::bisect_left`
//! so cursor code reads `cell_search(node, key, bias_right)` at call sites
//! instead of reaching into the collator directly -- the collation itself
//! is already satisfied by `dtree_generic::KeyCollator` (the role spec.md
//! assigns to "the supplied keyinfo").

use dtree_btree::SuperValue;
use dtree_generic::Key;

/// Binary search `node`'s cells for `key`, returning `(index, matched)` in
/// `[0, Ncells]`. `bias_right` probes the top of the range first, cheaper
/// for the common append-only insert pattern.
pub fn cell_search(node: &SuperValue, key: &Key, bias_right: bool) -> (usize, bool) {
    let collator = node.collator();
    let keys: Vec<Key> = node.cells().iter().map(|c| c.key.clone()).collect();
    collator.bisect_left(&keys, key, bias_right)
}

/// True when `index` sits at a tree-global boundary this node cannot
/// resolve on its own: slot 0 with a live left sibling, or slot `Ncells`
/// with a live right sibling. A node that is *not* extreme at `index` is
/// authoritative for `key` on its own, real or not.
pub fn is_extreme(node: &SuperValue, index: usize) -> bool {
    (index == 0 && !node.is_leftmost()) || (index == node.ncells() && !node.is_rightmost())
}
