//! A process-wide, timestamp-ordered cache of *inner* nodes only (spec
//! §4.3). Never holds leaves, never holds type-0 blobs.
//!
//! Grounded in the teacher's own `Map<K, V>` (a single `RwLock<HashMap>`,
//! see `src/internal/cache.rs`), generalized to several shards: the
//! teacher's single global lock would serialize every lookup across every
//! concurrently-running `Transaction` in the process (spec §5 lists the
//! inner-node cache as shared state across transactions), which is a
//! direct correctness-adjacent scaling requirement here, not a
//! speculative optimization.

use std::collections::HashMap;
use std::sync::RwLock;

use dtree_btree::Valbuf;
use dtree_generic::Coid;

const SHARD_COUNT: usize = 16;

fn shard_index(coid: &Coid) -> usize {
    // FNV-1a over the coid's two u64 components, good enough to spread
    // load without pulling in a hashing dependency the teacher doesn't
    // already use elsewhere for this purpose.
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in coid
        .cid
        .as_u64()
        .to_le_bytes()
        .iter()
        .chain(coid.oid.as_u64().to_le_bytes().iter())
    {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash as usize) % SHARD_COUNT
}

/// Best-effort, process-wide cache of inner supervalues. All correctness
/// relies on the authoritative traversal path in the cursor engine; this
/// cache may be stale, and callers must be prepared to discover that and
/// repair via `remove`.
pub struct NodeCache {
    shards: Vec<RwLock<HashMap<Coid, Valbuf>>>,
}

impl Default for NodeCache {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeCache {
    pub fn new() -> Self {
        let shards = (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect();
        Self { shards }
    }

    fn shard(&self, coid: &Coid) -> &RwLock<HashMap<Coid, Valbuf>> {
        &self.shards[shard_index(coid)]
    }

    /// Returns a shared, immutable handle to the cached node, or `None` on
    /// a miss. Callers must not mutate the returned buffer in place --
    /// apply copy-on-write before changing anything.
    pub fn lookup(&self, coid: &Coid) -> Option<Valbuf> {
        self.shard(coid).read().expect("node cache poisoned").get(coid).cloned()
    }

    /// Store a deep copy of `vb` if the entry is absent, or if the cached
    /// entry's `read_ts` is strictly older than `vb`'s -- monotone in
    /// `read_ts`, never regresses to a staler value.
    pub fn refresh(&self, vb: &Valbuf) {
        debug_assert!(vb.is_supervalue(), "the inner-node cache holds only supervalues");

        let coid = vb.coid();
        let mut shard = self.shard(&coid).write().expect("node cache poisoned");
        let stale = match shard.get(&coid) {
            Some(cached) => cached.read_ts() < vb.read_ts(),
            None => true,
        };

        if stale {
            shard.insert(coid, vb.deep_copy());
        }
    }

    /// Evict a cached entry, used when a downward walk discovers the
    /// cached child oid no longer points to a supervalue (spec §4.5
    /// "stale-cache recovery").
    pub fn remove(&self, coid: &Coid) {
        self.shard(coid).write().expect("node cache poisoned").remove(coid);
        log::debug!("evicted stale inner-node cache entry for {}", coid);
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().expect("node cache poisoned").len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtree_generic::{CellType, Cid, Oid, Timestamp};

    fn sample(coid: Coid, read_ts: Timestamp) -> Valbuf {
        let sv = dtree_btree::SuperValue::new_inner(CellType::Int, 1, None);
        Valbuf::supervalue(coid, Timestamp::set_new(), read_ts, sv)
    }

    #[test]
    fn refresh_is_monotone_in_read_ts() {
        let cache = NodeCache::new();
        let coid = Coid::new(Cid::new(1), Oid::from(2));

        let old = sample(coid, Timestamp::from_millis(100, 0));
        let new = sample(coid, Timestamp::from_millis(200, 0));

        cache.refresh(&new);
        cache.refresh(&old);

        let cached = cache.lookup(&coid).unwrap();
        assert_eq!(cached.read_ts(), Timestamp::from_millis(200, 0));
    }

    #[test]
    fn remove_evicts() {
        let cache = NodeCache::new();
        let coid = Coid::new(Cid::new(1), Oid::from(2));
        cache.refresh(&sample(coid, Timestamp::set_new()));
        assert!(cache.lookup(&coid).is_some());
        cache.remove(&coid);
        assert!(cache.lookup(&coid).is_none());
    }
}
