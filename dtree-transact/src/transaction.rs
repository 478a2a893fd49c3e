//! The distributed transaction object (spec §4.2): snapshot reads,
//! per-coid write/pending-op buffering, subtransaction levels, and the
//! two-phase (one-phase fast path) commit driver.
//!
//! Grounded in `host/src/txn/mod.rs`'s `Txn` (a request-scoped handle
//! threaded through every read/write) and `src/transaction/lock.rs`'s
//! `TxnLock` cache discipline, but generalized: per spec §5 a single
//! `Transaction` is "NOT thread-safe" (at most one caller at a time), so
//! there is no internal locking here -- only the *shared* singletons
//! (`NodeCache`, in a future iteration the throttle/rowid tables) need
//! their own synchronization, exactly as the teacher's `TxnLock`
//! synchronizes the shared filesystem layer while `Txn` itself assumes a
//! single in-flight caller. Every method that talks to the MVKVS is
//! `async`, matching `MvkvsClient`'s own surface rather than blocking on
//! an inner executor.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use dtree_btree::{apply_pending_ops, Cell, PendingOp, PendingOpKind, SuperValue, Valbuf};
use dtree_cache::NodeCache;
use dtree_client::{
    decode_node, encode_node, to_supervalue, CacheHints, ClusterDescriptor, CommitOutcome, CommitRequest,
    FeatureFlags, MvkvsClient, Piggyback, PrepareRequest, PrepareVote, ReadsetEntry, ServerId, SubTransAction,
    SubTransRequest, WireNodeSnapshot,
};
use dtree_error::{DtError, DtResult, StatusCode};
use dtree_generic::{Cid, Coid, IntervalType, Key, KeyInfo, Oid, Tid, Timestamp};

use crate::limits::{GAIA_WRITE_ON_PREPARE_MAX_BYTES, MAX_DEFERRED_START_TS_MS, MAX_READS_TO_TXCACHE};
use crate::state::{CacheEntry, TxState};
use crate::worklist::{SplitTask, WorkList};

/// A single still-unmaterialized pending mutation, plus the bit a
/// `Transaction` needs at flush time that the shared `dtree_btree::PendingOp`
/// shape doesn't carry (the listAdd "pre-check" flag is a property of
/// *this transaction's* call, not of the node being mutated).
#[derive(Clone)]
struct PendingEntry {
    op: PendingOp,
    check_range: bool,
}

/// `tryCommit`'s outcome, exactly the three terminal values spec §4.2's
/// table lists (a wire failure surfaces as `Err`, the idiomatic Rust
/// rendering of the table's fourth, "< 0", entry).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum CommitOutcomeCode {
    Committed = 0,
    VotedAbort = 1,
    PrepareError = 3,
}

/// Where a `vsuperget_with_origin` result actually came from: this is the
/// "nodetype" distinction the cursor engine's traversal needs (spec §4.5
/// `nodetype[i] in {approximate, real}`). A `TxCache` hit is "real" in the
/// same sense a fresh server read is -- it reflects this transaction's own
/// authoritative merged view, including its own pending writes -- whereas
/// a `GlobalCache` hit is the best-effort inner-node cache of spec §4.3,
/// which may be stale and is never trusted without the upward-repair walk.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum NodeOrigin {
    TxCache,
    GlobalCache,
    Server,
}

/// The distributed transaction object.
pub struct Transaction {
    tid: Tid,
    start_ts: Timestamp,
    deferred: bool,
    state: TxState,

    tx_cache: HashMap<Coid, CacheEntry>,
    pending_ops: HashMap<Coid, Vec<PendingEntry>>,
    reads_tx_cached: usize,

    /// The single buffered first write eligible for the prepare
    /// piggyback (spec §4.2 "Write piggy-back").
    piggyback: Option<(Coid, Bytes)>,
    first_write_issued: bool,
    /// Set as soon as any listAdd/listDelRange/attrSet call touches a
    /// coid, regardless of whether it went straight to `TxCache` or was
    /// buffered in `PendingOps`: a mutated supervalue can always be
    /// sitting in the global inner-node cache, so it rules out the
    /// one-phase-commit fast path exactly like a dirty `TxCache`
    /// supervalue entry would.
    touched_supervalue: bool,

    subtrans_level: u32,
    participants: HashSet<ServerId>,
    work_list: WorkList,
    readset: Option<HashMap<Coid, Timestamp>>,

    client: Arc<dyn MvkvsClient>,
    node_cache: Arc<NodeCache>,
    descriptor: ClusterDescriptor,
    flags: FeatureFlags,
}

impl Transaction {
    fn new_inner(
        tid: Tid,
        start_ts: Timestamp,
        deferred: bool,
        client: Arc<dyn MvkvsClient>,
        node_cache: Arc<NodeCache>,
        descriptor: ClusterDescriptor,
        flags: FeatureFlags,
    ) -> Self {
        Self {
            tid,
            start_ts,
            deferred,
            state: TxState::Valid,
            tx_cache: HashMap::new(),
            pending_ops: HashMap::new(),
            reads_tx_cached: 0,
            piggyback: None,
            first_write_issued: false,
            touched_supervalue: false,
            subtrans_level: 0,
            participants: HashSet::new(),
            work_list: WorkList::new(),
            readset: if flags.occ { Some(HashMap::new()) } else { None },
            client,
            node_cache,
            descriptor,
            flags,
        }
    }

    /// `start`: a fresh, valid transaction with `StartTs` taken from the
    /// local clock.
    pub fn start(
        tid: Tid,
        client: Arc<dyn MvkvsClient>,
        node_cache: Arc<NodeCache>,
        descriptor: ClusterDescriptor,
        flags: FeatureFlags,
    ) -> Self {
        Self::new_inner(tid, Timestamp::set_new(), false, client, node_cache, descriptor, flags)
    }

    /// `startDeferredTs`: `StartTs` is illegal until the first read
    /// establishes it from the server's `readTs` (spec §4.2 read path
    /// step 4).
    pub fn start_deferred_ts(
        tid: Tid,
        client: Arc<dyn MvkvsClient>,
        node_cache: Arc<NodeCache>,
        descriptor: ClusterDescriptor,
        flags: FeatureFlags,
    ) -> Self {
        Self::new_inner(
            tid,
            Timestamp::set_illegal(),
            true,
            client,
            node_cache,
            descriptor,
            flags,
        )
    }

    pub fn tid(&self) -> Tid {
        self.tid
    }

    pub fn start_ts(&self) -> Timestamp {
        self.start_ts
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn is_valid(&self) -> bool {
        self.state.is_valid()
    }

    fn check_valid(&self) -> DtResult<()> {
        if self.state.is_valid() {
            Ok(())
        } else {
            Err(DtError::transaction_ended(self.tid))
        }
    }

    /// The server owning `cid`'s container, or `None` for an ephemeral
    /// container (spec §4.7: local transactions never resolve a real
    /// server and never enter the 2PC participant set).
    fn server_for(&self, cid: Cid) -> Option<ServerId> {
        if cid.is_ephemeral() {
            return None;
        }
        self.descriptor.server_for(cid).ok().cloned()
    }

    fn note_participant(&mut self, cid: Cid) {
        if let Some(server) = self.server_for(cid) {
            self.participants.insert(server);
        }
    }

    /// Map a wire-level failure onto `aborted-io-error` per spec §7;
    /// every other error is returned untouched.
    fn map_io_failure<T>(&mut self, result: DtResult<T>) -> DtResult<T> {
        if let Err(ref e) = result {
            if e.code() == StatusCode::ServerTimeout {
                self.state = TxState::AbortedIoError;
            }
        }
        result
    }

    fn install_cache_hints(&self, hints: &CacheHints) {
        if !self.flags.client_consistent_cache {
            return;
        }
        for (coid, snapshot) in &hints.hints {
            if let Ok(vb) = decode_hint(*coid, snapshot) {
                if let Ok(sv) = vb.as_supervalue() {
                    if !sv.is_leaf() {
                        self.node_cache.refresh(&vb);
                    }
                }
            }
        }
    }

    // ---------------------------------------------------------------
    // Read path (spec §4.2 "Read path", 5 steps)
    // ---------------------------------------------------------------

    async fn read_path(
        &mut self,
        coid: Coid,
        want_super: bool,
        cell_hint: Option<Key>,
    ) -> DtResult<(Valbuf, NodeOrigin)> {
        self.read_path_inner(coid, want_super, cell_hint, false).await
    }

    /// As `read_path`, but step 2 (the process-wide cache) is skipped:
    /// used by the cursor engine's upward/downward real-walk (spec §4.5
    /// step 5-6), where a `GlobalCache` hit would defeat the whole point
    /// of re-fetching an authoritative node.
    async fn read_path_inner(
        &mut self,
        coid: Coid,
        want_super: bool,
        cell_hint: Option<Key>,
        force_real: bool,
    ) -> DtResult<(Valbuf, NodeOrigin)> {
        self.check_valid()?;

        // Step 1: TxCache hit.
        if let Some(entry) = self.tx_cache.get(&coid) {
            let type_ok = if want_super {
                entry.valbuf.is_supervalue()
            } else {
                entry.valbuf.is_blob()
            };
            if !type_ok {
                return Err(DtError::wrong_type(coid));
            }
            return Ok((entry.valbuf.clone(), NodeOrigin::TxCache));
        }

        // Step 2: the process-wide consistent (inner-node) cache, only
        // ever populated with supervalues.
        if want_super && self.flags.client_consistent_cache && !force_real {
            if let Some(cached) = self.node_cache.lookup(&coid) {
                let mut vb = cached.deep_copy();
                self.replay_pending(coid, &mut vb)?;
                self.maybe_install(coid, vb.clone(), false);
                return Ok((vb, NodeOrigin::GlobalCache));
            }
        }

        // Step 3: RPC to the owning server.
        let (read_ts, cache_hints, node_bytes, blob_bytes): (Timestamp, CacheHints, Option<Bytes>, Option<Bytes>) =
            if want_super {
                let reply = self.map_io_failure(self.client.full_read(self.tid, self.start_ts, coid, cell_hint).await)?;
                (reply.read_ts, reply.cache_hints, Some(reply.node_bytes), None)
            } else {
                let reply = self.map_io_failure(self.client.read(self.tid, self.start_ts, coid, 0).await)?;
                (reply.read_ts, reply.cache_hints, None, Some(reply.bytes))
            };
        self.install_cache_hints(&cache_hints);

        // Step 4: deferred StartTs clamping.
        if self.deferred {
            let clamp_boundary = Timestamp::set_old(MAX_DEFERRED_START_TS_MS);
            self.start_ts = if read_ts.cmp(&clamp_boundary) == std::cmp::Ordering::Less {
                clamp_boundary
            } else {
                read_ts
            };
            self.deferred = false;
        }

        if let Some(readset) = self.readset.as_mut() {
            readset.insert(coid, read_ts);
        }

        let mut vb = if let Some(bytes) = node_bytes {
            let (wire, _) = decode_node(&bytes)?;
            let sv = to_supervalue(&wire, None)?;
            Valbuf::supervalue(coid, Timestamp::set_illegal(), read_ts, sv)
        } else {
            Valbuf::blob(coid, Timestamp::set_illegal(), read_ts, blob_bytes.unwrap_or_default())
        };

        // Step 5: pending-op replay, then maybe install into TxCache.
        self.replay_pending(coid, &mut vb)?;
        self.maybe_install(coid, vb.clone(), true);

        Ok((vb, NodeOrigin::Server))
    }

    fn replay_pending(&mut self, coid: Coid, vb: &mut Valbuf) -> DtResult<()> {
        if let Some(entries) = self.pending_ops.remove(&coid) {
            if !entries.is_empty() {
                let sv = vb.supervalue_mut()?;
                let ops: Vec<PendingOp> = entries.into_iter().map(|e| e.op).collect();
                apply_pending_ops(sv, &ops)?;
            }
        }
        Ok(())
    }

    fn maybe_install(&mut self, coid: Coid, vb: Valbuf, counts_toward_limit: bool) {
        if self.reads_tx_cached < MAX_READS_TO_TXCACHE {
            self.tx_cache.insert(coid, CacheEntry::read_only(vb, self.subtrans_level));
            if counts_toward_limit {
                self.reads_tx_cached += 1;
            }
        }
    }

    /// `vget`: a type-0 snapshot of `coid`.
    pub async fn vget(&mut self, coid: Coid) -> DtResult<Bytes> {
        let (vb, _) = self.read_path(coid, false, None).await?;
        vb.as_blob().map(|b| b.clone())
    }

    /// `vsuperget`: a type-1 (supervalue) snapshot of `coid`. `cell` is an
    /// optional hint (e.g. for split-stat purposes); `prki` is unused here
    /// since collation metadata travels on the wire with the node itself,
    /// kept as a parameter to match the signature callers that already
    /// carry one expect.
    pub async fn vsuperget(
        &mut self,
        coid: Coid,
        cell: Option<Key>,
        _prki: Option<Arc<KeyInfo>>,
    ) -> DtResult<Valbuf> {
        let (vb, _) = self.read_path(coid, true, cell).await?;
        Ok(vb)
    }

    /// `vsuperget` plus the `nodetype` (spec §4.5) the cursor engine's
    /// traversal needs to decide whether a node can be trusted without
    /// an upward-repair walk.
    pub async fn vsuperget_with_origin(
        &mut self,
        coid: Coid,
        cell: Option<Key>,
        _prki: Option<Arc<KeyInfo>>,
    ) -> DtResult<(Valbuf, NodeOrigin)> {
        self.read_path(coid, true, cell).await
    }

    /// `vsuperget`, but never served from the global inner-node cache:
    /// either this transaction's own `TxCache` (still authoritative) or
    /// a fresh RPC. The cursor engine's upward/downward real-walk (spec
    /// §4.5 steps 5-6) uses this exclusively once it has decided a node
    /// needs re-verifying, since a `GlobalCache` hit there would just
    /// reproduce the staleness it is trying to repair.
    pub async fn vsuperget_real(&mut self, coid: Coid, cell: Option<Key>) -> DtResult<Valbuf> {
        let (vb, _) = self.read_path_inner(coid, true, cell, true).await?;
        Ok(vb)
    }

    /// A read-only peek at whatever `TxCache` currently holds for `coid`,
    /// without touching the global cache or the network. Used by the
    /// cursor engine's cache-only traversal (spec §4.5 Insert step 2),
    /// which must never let a guess at a leaf candidate perform a real
    /// read.
    pub fn peek_tx_cache(&self, coid: Coid) -> Option<Valbuf> {
        self.tx_cache.get(&coid).map(|entry| entry.valbuf.clone())
    }

    /// Replay this transaction's buffered pending ops for `coid` onto an
    /// already-fetched `Valbuf`, the same step `read_path` performs
    /// internally on every real read. Exposed so a caller that obtained
    /// `vb` by some other means (the cursor's own cache-only walk) still
    /// sees its own not-yet-flushed writes.
    pub fn apply_pending_ops_to(&mut self, coid: Coid, vb: &mut Valbuf) -> DtResult<()> {
        self.replay_pending(coid, vb)
    }

    /// The underlying MVKVS client, for callers (the cursor engine) that
    /// need to issue RPCs this struct doesn't otherwise surface, e.g.
    /// `get_rowid`.
    pub fn client(&self) -> &Arc<dyn MvkvsClient> {
        &self.client
    }

    /// The process-wide inner-node cache, for callers that maintain
    /// their own cache-or-real traversal policy distinct from
    /// `vsuperget`'s (the cursor's cache-only fast path, and the
    /// responsibility of refreshing the cache after a real inner-node
    /// fetch, which only the cursor -- knowing which coids are inner
    /// nodes -- can discharge).
    pub fn node_cache(&self) -> &Arc<NodeCache> {
        &self.node_cache
    }

    pub fn flags(&self) -> FeatureFlags {
        self.flags
    }

    pub fn descriptor(&self) -> &ClusterDescriptor {
        &self.descriptor
    }

    // ---------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------

    /// `write`: idempotently update `TxCache[coid]` as a type-0 buffer.
    /// The very first write of the transaction, if small enough, is
    /// buffered for the prepare piggyback instead of flushed immediately
    /// (spec §4.2 "Write piggy-back"); every subsequent write flushes at
    /// once via a direct `Write` RPC.
    pub async fn write(&mut self, coid: Coid, bytes: Bytes) -> DtResult<()> {
        self.check_valid()?;

        let vb = Valbuf::blob(coid, Timestamp::set_illegal(), Timestamp::set_illegal(), bytes.clone());
        self.tx_cache.insert(coid, CacheEntry::written(vb, self.subtrans_level));

        if !self.first_write_issued
            && self.piggyback.is_none()
            && self.flags.write_on_prepare
            && bytes.len() <= GAIA_WRITE_ON_PREPARE_MAX_BYTES
        {
            self.piggyback = Some((coid, bytes));
            self.first_write_issued = true;
            return Ok(());
        }

        self.first_write_issued = true;
        self.note_participant(coid.cid);
        let result = self.client.write(self.tid, coid, self.subtrans_level, bytes).await;
        self.map_io_failure(result).map(|_| ())
    }

    /// Write a brand-new supervalue straight to its owning server -- a
    /// node a split just allocated, never read from anywhere before --
    /// and materialize it into `TxCache` so this transaction's own later
    /// reads and pending-op replay see it immediately. Unlike `write`,
    /// this never buffers for the piggyback: a split's new sibling must
    /// exist before the cell pointing at it can be added anywhere.
    pub async fn create_supervalue(&mut self, coid: Coid, sv: SuperValue) -> DtResult<()> {
        self.check_valid()?;
        self.touched_supervalue = true;
        self.note_participant(coid.cid);

        let bytes = Bytes::from(encode_node(&sv));
        let result = self.client.full_write(self.tid, coid, self.subtrans_level, bytes).await;
        self.map_io_failure(result)?;

        let vb = Valbuf::supervalue(coid, Timestamp::set_new(), self.start_ts, sv);
        self.tx_cache.insert(coid, CacheEntry::read_only(vb, self.subtrans_level));
        Ok(())
    }

    /// `writev`: flush several blob writes in issue order.
    pub async fn writev(&mut self, writes: impl IntoIterator<Item = (Coid, Bytes)>) -> DtResult<()> {
        for (coid, bytes) in writes {
            self.write(coid, bytes).await?;
        }
        Ok(())
    }

    /// `put2(coid, bytes)`: a two-argument convenience alias for `write`.
    pub async fn put2(&mut self, coid: Coid, bytes: Bytes) -> DtResult<()> {
        self.write(coid, bytes).await
    }

    /// `put3(cid, rowid, bytes)`: the three-argument form used for an
    /// intkey row's data payload, resolving `(DATA_CID(cid), rowid)`.
    pub async fn put3(&mut self, cid: Cid, rowid: Oid, bytes: Bytes) -> DtResult<()> {
        self.write(Coid::data(cid, rowid), bytes).await
    }

    fn apply_or_buffer(&mut self, coid: Coid, op: PendingOp, check_range: bool) -> DtResult<()> {
        self.check_valid()?;
        self.touched_supervalue = true;

        if let Some(entry) = self.tx_cache.get_mut(&coid) {
            let sv = entry.valbuf.supervalue_mut()?;
            apply_pending_ops(sv, std::slice::from_ref(&op))?;
            entry.level = self.subtrans_level;
            entry.dirty = true;
        } else {
            self.pending_ops.entry(coid).or_default().push(PendingEntry { op, check_range });
        }

        Ok(())
    }

    /// `listAdd`: appends a pending add. If `coid` is already
    /// materialized in `TxCache`, the fast path applies immediately.
    /// `flags` bit 0 is the "pre-check in-range-and-unique" request,
    /// honored when this op is eventually flushed to the server.
    pub fn list_add(&mut self, coid: Coid, cell: Cell, prki: Option<Arc<KeyInfo>>, flags: u32) -> DtResult<()> {
        let check_range = flags & 1 != 0;
        let op = PendingOp::add(cell, self.subtrans_level, prki);
        self.apply_or_buffer(coid, op, check_range)
    }

    /// `listDelRange`.
    pub fn list_del_range(
        &mut self,
        coid: Coid,
        interval_type: IntervalType,
        cell1: Option<Key>,
        cell2: Option<Key>,
        prki: Option<Arc<KeyInfo>>,
    ) -> DtResult<()> {
        let op = PendingOp::del_range(interval_type, cell1, cell2, self.subtrans_level, prki);
        self.apply_or_buffer(coid, op, false)
    }

    /// `attrSet`.
    pub fn attr_set(&mut self, coid: Coid, attrid: usize, value: u64) -> DtResult<()> {
        let op = PendingOp::attr_set(attrid, value, self.subtrans_level);
        self.apply_or_buffer(coid, op, false)
    }

    // ---------------------------------------------------------------
    // Subtransactions (spec §4.2 "Subtransactions")
    // ---------------------------------------------------------------

    pub fn start_subtrans(&mut self, level: u32) -> DtResult<()> {
        self.check_valid()?;
        if level <= self.subtrans_level {
            return Err(DtError::bad_request(
                "subtransaction levels must be strictly increasing",
                level,
            ));
        }
        self.subtrans_level = level;
        Ok(())
    }

    async fn broadcast_subtrans(&mut self, level: u32, action: SubTransAction) -> DtResult<()> {
        let participants: Vec<ServerId> = self.participants.iter().cloned().collect();
        for server in participants {
            let req = SubTransRequest {
                tid: self.tid,
                level,
                action,
            };
            let result = self.client.sub_trans(&server, req).await;
            self.map_io_failure(result)?;
        }
        Ok(())
    }

    /// `abortSubtrans(level)`: locally drop every entry installed at or
    /// above `level`, then tell every participant to do the same.
    pub async fn abort_subtrans(&mut self, level: u32) -> DtResult<()> {
        self.check_valid()?;

        self.tx_cache.retain(|_, entry| entry.level < level);
        for entries in self.pending_ops.values_mut() {
            entries.retain(|entry| entry.op.level < level);
        }
        self.pending_ops.retain(|_, entries| !entries.is_empty());

        self.subtrans_level = level;
        self.broadcast_subtrans(level, SubTransAction::Discard).await
    }

    /// `releaseSubtrans(level)`: retag every entry at or above `level`
    /// down to `level`, then tell every participant to merge down.
    pub async fn release_subtrans(&mut self, level: u32) -> DtResult<()> {
        self.check_valid()?;

        for entry in self.tx_cache.values_mut() {
            if entry.level > level {
                entry.level = level;
            }
        }
        for entries in self.pending_ops.values_mut() {
            for entry in entries.iter_mut() {
                if entry.op.level > level {
                    entry.op.level = level;
                }
            }
        }

        self.subtrans_level = level;
        self.broadcast_subtrans(level, SubTransAction::MergeDown).await
    }

    // ---------------------------------------------------------------
    // Commit / abort (spec §4.2 "Commit protocol")
    // ---------------------------------------------------------------

    /// Flush every pending op that was never materialized into `TxCache`
    /// by issuing its corresponding RPC directly. Per this implementation's
    /// resolution of spec §9's open question (see DESIGN.md): pending ops
    /// are purely client-local until this point, so the server only ever
    /// learns about them here, right before `Prepare`.
    async fn flush_unmaterialized_pending_ops(&mut self) -> DtResult<()> {
        let pending = std::mem::take(&mut self.pending_ops);
        for (coid, entries) in pending {
            self.note_participant(coid.cid);
            for entry in entries {
                let check_range = entry.check_range;
                let level = entry.op.level;
                let result = match entry.op.kind {
                    PendingOpKind::Add(cell) => {
                        self.client
                            .list_add(self.tid, coid, level, check_range, self.start_ts, cell.key, cell.value)
                            .await
                            .map(|_| ())
                    }
                    PendingOpKind::DelRange {
                        interval_type,
                        cell1,
                        cell2,
                    } => self
                        .client
                        .list_del_range(self.tid, coid, level, interval_type, cell1, cell2)
                        .await
                        .map(|_| ()),
                    PendingOpKind::AttrSet { attrid, value } => self
                        .client
                        .attr_set(self.tid, coid, level, attrid, value)
                        .await
                        .map(|_| ()),
                };
                self.map_io_failure(result)?;
            }
        }
        Ok(())
    }

    /// Flush every dirty `TxCache` entry that hasn't already reached the
    /// server: supervalues go out via `FullWrite`. Blobs are handled by
    /// `write`'s own immediate-flush/piggyback logic and never marked
    /// dirty-but-unsent here.
    async fn flush_dirty_tx_cache(&mut self) -> DtResult<()> {
        let piggyback_coid = self.piggyback.as_ref().map(|(coid, _)| *coid);
        let dirty: Vec<Coid> = self
            .tx_cache
            .iter()
            .filter(|(coid, entry)| {
                entry.dirty && entry.valbuf.is_supervalue() && Some(*coid) != piggyback_coid.as_ref()
            })
            .map(|(coid, _)| *coid)
            .collect();

        for coid in dirty {
            self.note_participant(coid.cid);
            let (level, bytes) = {
                let entry = self.tx_cache.get(&coid).expect("just collected this key");
                let sv = entry.valbuf.as_supervalue().expect("filtered to supervalue entries");
                (entry.level, Bytes::from(encode_node(sv)))
            };
            let result = self.client.full_write(self.tid, coid, level, bytes).await;
            self.map_io_failure(result)?;
        }
        Ok(())
    }

    /// `auxprepare`: run prepare against every participant, decide the
    /// commit outcome, and report whether a one-phase commit already
    /// finalized the transaction on its single participant.
    async fn auxprepare(&mut self) -> DtResult<(Timestamp, CommitOutcomeCode, bool)> {
        let one_phase_eligible = self.participants.len() == 1 && !self.touched_supervalue;

        let piggyback: Vec<Piggyback> = match self.piggyback.clone() {
            Some((coid, bytes)) => {
                self.note_participant(coid.cid);
                vec![Piggyback { coid, bytes }]
            }
            None => Vec::new(),
        };

        let readset: Option<Vec<ReadsetEntry>> = self.readset.as_ref().map(|rs| {
            rs.iter()
                .map(|(coid, read_ts)| ReadsetEntry {
                    coid: *coid,
                    read_ts: *read_ts,
                })
                .collect()
        });

        if self.participants.is_empty() {
            // Either a purely local/ephemeral transaction, or one that
            // touched nothing participant-bearing: nothing to vote on.
            return Ok((Timestamp::set_new(), CommitOutcomeCode::Committed, true));
        }

        // A prepare reply that never arrives (wire failure) or arrives with
        // a non-ok status is neither a commit vote nor an abort vote: per
        // spec §4.2/§6 it decides the whole commit as `PrepareError` (wire
        // code 3), distinct from a true wire-level error (<0) that would
        // leave the transaction's outcome unknown rather than decided.
        let participants: Vec<ServerId> = self.participants.iter().cloned().collect();
        let mut votes = Vec::with_capacity(participants.len());
        let mut prepare_error = false;
        for server in participants {
            let req = PrepareRequest {
                tid: self.tid,
                start_ts: self.start_ts,
                onephasecommit: one_phase_eligible,
                piggyback: piggyback.clone(),
                readset: readset.clone(),
            };
            match self.client.prepare(&server, req).await {
                Ok(reply) if StatusCode::from_i8(reply.status) == StatusCode::Ok => {
                    self.install_cache_hints(&reply.cache_hints);
                    votes.push(reply);
                }
                Ok(reply) => {
                    log::warn!("malformed prepare reply from {}: status {}", server, StatusCode::from_i8(reply.status));
                    prepare_error = true;
                }
                Err(e) => {
                    log::warn!("lost prepare reply from {}: {}", server, e);
                    prepare_error = true;
                }
            }
        }

        if prepare_error {
            return Ok((Timestamp::set_illegal(), CommitOutcomeCode::PrepareError, false));
        }

        if votes.iter().any(|v| v.vote == PrepareVote::No) {
            return Ok((Timestamp::set_illegal(), CommitOutcomeCode::VotedAbort, false));
        }

        let mincommitts = votes
            .iter()
            .map(|v| v.mincommitts)
            .max_by(|a, b| a.cmp(b))
            .unwrap_or_else(Timestamp::set_new);
        let committs = mincommitts.add_epsilon_biased(self.tid.worker_hash());

        Ok((committs, CommitOutcomeCode::Committed, one_phase_eligible))
    }

    /// `tryCommit`: runs the full 2PC protocol and returns the outcome
    /// code. Clears the transaction's maps and moves it to `Invalid` on
    /// any terminal outcome (committed or voted-abort), matching §3's
    /// "On commit or abort it clears both maps and moves to invalid."
    pub async fn try_commit(&mut self) -> DtResult<CommitOutcomeCode> {
        self.check_valid()?;

        self.flush_unmaterialized_pending_ops().await?;
        self.flush_dirty_tx_cache().await?;

        let (committs, decision, already_committed) = self.auxprepare().await?;

        let result = match decision {
            CommitOutcomeCode::Committed => {
                if already_committed {
                    Ok(())
                } else {
                    committs.catchup().await;
                    self.send_commit_to_all(CommitRequest {
                        tid: self.tid,
                        committs,
                        outcome: CommitOutcome::Commit,
                    })
                    .await
                }
            }
            CommitOutcomeCode::VotedAbort => {
                self.send_commit_to_all(CommitRequest {
                    tid: self.tid,
                    committs: Timestamp::set_illegal(),
                    outcome: CommitOutcome::Abort,
                })
                .await
            }
            CommitOutcomeCode::PrepareError => Ok(()),
        };

        self.finish(decision);
        result.map(|_| decision)
    }

    async fn send_commit_to_all(&mut self, req: CommitRequest) -> DtResult<()> {
        let participants: Vec<ServerId> = self.participants.iter().cloned().collect();
        let mut max_waitingts: Option<Timestamp> = None;
        for server in participants {
            let result = self.client.commit(&server, req.clone()).await;
            let reply = self.map_io_failure(result)?;
            if !reply.waitingts.is_illegal() {
                max_waitingts = Some(match max_waitingts {
                    Some(current) if current.cmp(&reply.waitingts) == std::cmp::Ordering::Greater => current,
                    _ => reply.waitingts,
                });
            }
        }
        if let Some(ts) = max_waitingts {
            ts.catchup().await;
        }
        Ok(())
    }

    /// `abort`: send Abort to every participant and invalidate the
    /// transaction. Idempotent (spec §5).
    pub async fn abort(&mut self) -> DtResult<()> {
        if !self.state.is_valid() {
            return Ok(());
        }
        let req = CommitRequest {
            tid: self.tid,
            committs: Timestamp::set_illegal(),
            outcome: CommitOutcome::AbortWithoutPrepare,
        };
        let result = self.send_commit_to_all(req).await;
        self.finish(CommitOutcomeCode::VotedAbort);
        result
    }

    fn finish(&mut self, decision: CommitOutcomeCode) {
        self.tx_cache.clear();
        self.pending_ops.clear();
        self.piggyback = None;
        self.state = match decision {
            CommitOutcomeCode::Committed => TxState::Invalid,
            CommitOutcomeCode::VotedAbort | CommitOutcomeCode::PrepareError => {
                if self.state == TxState::AbortedIoError {
                    TxState::AbortedIoError
                } else {
                    TxState::Aborted
                }
            }
        };
    }

    /// Enqueue a commit-time split task (spec §4.5 "Commit-time split
    /// dispatch"); the cursor engine calls this when a mutation's reply
    /// reports the node now exceeds the split thresholds.
    pub fn enqueue_split(&mut self, coid: Coid, ncells: u32, cells_size: u64) {
        self.work_list.enqueue(SplitTask {
            coid,
            ncells,
            cells_size,
        });
    }

    /// Drain the commit-time split work list, for a caller (the cursor
    /// engine's split dispatcher) to act on after a successful commit.
    pub fn drain_work_list(&mut self) -> Vec<SplitTask> {
        self.work_list.drain()
    }
}

fn decode_hint(coid: Coid, snapshot: &WireNodeSnapshot) -> DtResult<Valbuf> {
    let (wire, _) = decode_node(&snapshot.node_bytes)?;
    let sv = to_supervalue(&wire, None)?;
    Ok(Valbuf::supervalue(coid, snapshot.commit_ts, snapshot.read_ts, sv))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtree_btree::SuperValue;
    use dtree_client::local::FakeServer;
    use dtree_generic::{CellType, Key};

    fn descriptor() -> ClusterDescriptor {
        ClusterDescriptor::parse(
            r#"
            [[servers]]
            cid_start = 0
            cid_end = 100000
            server = "only-server:7000"
            "#,
        )
        .unwrap()
    }

    fn new_txn(client: Arc<dyn MvkvsClient>) -> Transaction {
        Transaction::start(
            Tid::new(1, 1, 1),
            client,
            Arc::new(NodeCache::new()),
            descriptor(),
            FeatureFlags::default(),
        )
    }

    #[tokio::test]
    async fn scenario_1_insert_then_commit_then_read_back() {
        let server: Arc<dyn MvkvsClient> = Arc::new(FakeServer::new());
        let cid = Cid::new(0x10);
        let root = Coid::root(cid);

        let seed = SuperValue::new_leaf(CellType::Int, None);
        server
            .full_write(Tid::new(1, 1, 1), root, 0, Bytes::from(encode_node(&seed)))
            .await
            .unwrap();

        let mut t1 = new_txn(server.clone());
        t1.list_add(root, Cell::leaf(Key::Int(42)), None, 0).unwrap();
        t1.put3(cid, Oid::from(42), Bytes::from_static(b"hello")).await.unwrap();
        let outcome = t1.try_commit().await.unwrap();
        assert_eq!(outcome, CommitOutcomeCode::Committed);

        let mut t2 = new_txn(server.clone());
        let value = t2.vget(Coid::data(cid, Oid::from(42))).await.unwrap();
        assert_eq!(value, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn scenario_4_subtrans_abort_discards_later_level_only() {
        let server: Arc<dyn MvkvsClient> = Arc::new(FakeServer::new());
        let cid = Cid::new(0x20);
        let root = Coid::root(cid);
        let seed = SuperValue::new_leaf(CellType::Int, None);
        server
            .full_write(Tid::new(2, 2, 2), root, 0, Bytes::from(encode_node(&seed)))
            .await
            .unwrap();

        let mut t = new_txn(server.clone());
        t.list_add(root, Cell::leaf(Key::Int(1)), None, 0).unwrap();
        t.start_subtrans(2).unwrap();
        t.list_add(root, Cell::leaf(Key::Int(2)), None, 0).unwrap();
        t.list_add(root, Cell::leaf(Key::Int(3)), None, 0).unwrap();
        t.abort_subtrans(2).await.unwrap();
        let outcome = t.try_commit().await.unwrap();
        assert_eq!(outcome, CommitOutcomeCode::Committed);

        let mut reader = new_txn(server.clone());
        let vb = reader.vsuperget(root, None, None).await.unwrap();
        let sv = vb.as_supervalue().unwrap();
        let keys: Vec<i64> = sv.cells().iter().map(|c| c.key.as_int().unwrap()).collect();
        assert_eq!(keys, vec![1]);
    }

    #[tokio::test]
    async fn scenario_6_half_open_range_delete() {
        let server: Arc<dyn MvkvsClient> = Arc::new(FakeServer::new());
        let cid = Cid::new(0x30);
        let root = Coid::root(cid);
        let mut seed = SuperValue::new_leaf(CellType::Int, None);
        for (i, k) in [1i64, 3, 5, 7].into_iter().enumerate() {
            seed.insert_cell(i, Cell::leaf(Key::Int(k)));
        }
        server
            .full_write(Tid::new(3, 3, 3), root, 0, Bytes::from(encode_node(&seed)))
            .await
            .unwrap();

        let mut t = new_txn(server.clone());
        t.list_del_range(root, IntervalType::OpenClosed, Some(Key::Int(1)), Some(Key::Int(3)), None)
            .unwrap();
        assert_eq!(t.try_commit().await.unwrap(), CommitOutcomeCode::Committed);

        let mut reader = new_txn(server.clone());
        let vb = reader.vsuperget(root, None, None).await.unwrap();
        let keys: Vec<i64> = vb
            .as_supervalue()
            .unwrap()
            .cells()
            .iter()
            .map(|c| c.key.as_int().unwrap())
            .collect();
        assert_eq!(keys, vec![1, 5, 7]);
    }

    #[tokio::test]
    async fn read_my_own_write_before_commit() {
        let server: Arc<dyn MvkvsClient> = Arc::new(FakeServer::new());
        let cid = Cid::new(0x40);
        let coid = Coid::data(cid, Oid::from(1));

        let mut t = new_txn(server.clone());
        t.write(coid, Bytes::from_static(b"value")).await.unwrap();
        let readback = t.vget(coid).await.unwrap();
        assert_eq!(readback, Bytes::from_static(b"value"));
    }

    #[tokio::test]
    async fn operations_after_commit_are_transaction_ended() {
        let server: Arc<dyn MvkvsClient> = Arc::new(FakeServer::new());
        let mut t = new_txn(server);
        t.try_commit().await.unwrap();
        let err = t.vget(Coid::new(Cid::new(1), Oid::from(1))).await.unwrap_err();
        assert_eq!(err.code(), StatusCode::TransactionEnded);
    }
}
