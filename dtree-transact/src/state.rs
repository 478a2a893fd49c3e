//! Transaction lifecycle state (spec §3 "Lifecycle") and the per-coid
//! cache entry shapes that back invariant (I1): a coid holds either a
//! materialized `TxCache` entry or a non-empty `PendingOps` list, never
//! both.

use dtree_btree::Valbuf;

/// `state in {valid, aborted, aborted-io-error}` plus the implicit
/// fourth state the spec's lifecycle table leaves unnamed: a transaction
/// that was never started, or whose commit/abort already cleared it.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TxState {
    Valid,
    Aborted,
    AbortedIoError,
    Invalid,
}

impl TxState {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// A `TxCache` entry: the materialized (possibly mutated) buffer, tagged
/// with the subtransaction level that most recently wrote it so
/// `abort_subtrans`/`release_subtrans` can find it again.
#[derive(Clone)]
pub struct CacheEntry {
    pub valbuf: Valbuf,
    pub level: u32,
    /// True once this transaction's own write touched the entry: used to
    /// decide at commit time whether this coid needs to be flushed at
    /// all (a read-only `TxCache` hit never needs a Write/FullWrite RPC).
    pub dirty: bool,
}

impl CacheEntry {
    pub fn read_only(valbuf: Valbuf, level: u32) -> Self {
        Self {
            valbuf,
            level,
            dirty: false,
        }
    }

    pub fn written(valbuf: Valbuf, level: u32) -> Self {
        Self {
            valbuf,
            level,
            dirty: true,
        }
    }
}
