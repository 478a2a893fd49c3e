//! The DTree cursor engine (spec §4.5): `Seek`/`First`/`Last`/`Next`/`Prev`,
//! `Insert`/`Delete`, and the cache-or-real traversal with its stale-cache
//! recovery walk.
//!
//! Grounded in `host/btree/src/file.rs`'s `BTreeFile` cursor (the same
//! seek-then-walk-siblings shape, node-stack-as-`Vec` representation, and
//! split/underflow handling on mutation), generalized from a single local
//! file to a tree whose inner nodes may be read from three different
//! places (this transaction's own writes, the process-wide cache, or a
//! fresh server read) rather than always from disk.

use std::sync::Arc;

use bytes::Bytes;
use dtree_btree::{attr, Cell, SuperValue};
use dtree_error::{DtError, DtResult};
use dtree_generic::{Cid, Coid, IntervalType, Key, KeyInfo, Oid};
use dtree_transact::{NodeOrigin, Transaction};

use crate::constants::{DTREE_MAX_LEVELS, DTREE_SPLIT_SIZE, DTREE_SPLIT_SIZE_BYTES};
use crate::search::{cell_search, is_extreme};
use crate::state::{CursorState, SeekResult};

/// One level of the cursor's node/nodetype/nodeIndex stack (spec §4.5).
struct Frame {
    coid: Coid,
    valbuf: dtree_btree::Valbuf,
    origin: NodeOrigin,
    index: usize,
    matched: bool,
}

/// A single DTree traversal, bound to one `Transaction` for its lifetime.
///
/// Not `Send`/`Sync`-constrained beyond what `Transaction` itself allows:
/// per spec §5 a cursor, like its transaction, has at most one caller at a
/// time.
pub struct Cursor<'t> {
    tx: &'t mut Transaction,
    root_cid: Cid,
    keyinfo: Option<Arc<KeyInfo>>,
    intkey: bool,
    frames: Vec<Frame>,
    state: CursorState,
    direct_int_key: Option<i64>,
    saved_key: Option<Key>,
}

impl<'t> Cursor<'t> {
    pub fn new(tx: &'t mut Transaction, root_cid: Cid, intkey: bool, keyinfo: Option<Arc<KeyInfo>>) -> Self {
        Self {
            tx,
            root_cid,
            keyinfo,
            intkey,
            frames: Vec::new(),
            state: CursorState::Invalid,
            direct_int_key: None,
            saved_key: None,
        }
    }

    /// The key the cursor currently sits on.
    pub fn current_key(&self) -> DtResult<Key> {
        match &self.state {
            CursorState::Direct => self
                .direct_int_key
                .map(Key::Int)
                .ok_or_else(|| DtError::internal("direct cursor has no int key recorded")),
            CursorState::Valid => {
                let frame = self
                    .frames
                    .last()
                    .ok_or_else(|| DtError::internal("valid cursor has no leaf frame"))?;
                let sv = frame.valbuf.as_supervalue()?;
                Ok(sv.key_at(frame.index).clone())
            }
            CursorState::Invalid => Err(DtError::internal("cursor has not been seeked")),
            CursorState::RequireSeek => Err(DtError::internal("cursor position was saved but not yet restored")),
            CursorState::Fault(e) => Err(e.clone()),
        }
    }

    /// Capture the current key and drop the node stack, per spec.md's
    /// "save/restore happens at well-defined rollback points, not
    /// ad-hoc" design note. Call this before a subtransaction
    /// abort/release that may invalidate nodes this cursor has cached in
    /// its frames; `restore_position` re-seeks from the captured key
    /// afterwards.
    pub fn save_position(&mut self) -> DtResult<()> {
        let key = self.current_key()?;
        self.frames.clear();
        self.direct_int_key = None;
        self.saved_key = Some(key);
        self.state = CursorState::RequireSeek;
        Ok(())
    }

    /// Re-seek to the key captured by `save_position`. Errors if there is
    /// no saved position to restore.
    pub async fn restore_position(&mut self) -> DtResult<SeekResult> {
        let key = self
            .saved_key
            .take()
            .ok_or_else(|| DtError::internal("no saved cursor position to restore"))?;
        self.seek(key).await
    }

    pub fn state(&self) -> &CursorState {
        &self.state
    }

    fn push_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
        if self.frames.len() > DTREE_MAX_LEVELS {
            panic!(
                "dtree depth exceeded DTREE_MAX_LEVELS ({}): cache poisoning",
                DTREE_MAX_LEVELS
            );
        }
    }

    // -----------------------------------------------------------------
    // Seek (spec §4.5 "Seek / MovetoUnpacked", 7 steps)
    // -----------------------------------------------------------------

    /// Position the cursor at `key`, or as close to it as the tree allows.
    pub async fn seek(&mut self, key: Key) -> DtResult<SeekResult> {
        self.direct_int_key = None;
        self.saved_key = None;

        // Step 2: direct seek, integer-key tables only -- skip the tree
        // entirely and probe the row's data object. Gated behind a feature
        // flag ("when enabled" per spec §4.5 step 2): a cursor about to
        // mutate should land in `Valid` with a populated frame stack
        // rather than `Direct`, since insert/delete need the leaf's cell
        // index and sibling pointers, not just the row's existence.
        if self.intkey && self.tx.flags().direct_seek {
            if let Key::Int(n) = key {
                let data_coid = Coid::data(self.root_cid, Oid::from(n as u64));
                match self.tx.vget(data_coid).await {
                    // A zero-length payload is `delete`'s tombstone
                    // (`write_payload`/`delete` never remove the data
                    // object outright, only empty it); treat it the same
                    // as a row that was never there.
                    Ok(bytes) if !bytes.is_empty() => {
                        self.frames.clear();
                        self.direct_int_key = Some(n);
                        self.state = CursorState::Direct;
                        return Ok(SeekResult::Match);
                    }
                    Ok(_) => {}
                    Err(e) if e.code() == dtree_error::StatusCode::CellOutOfRange => {}
                    Err(e) => return Err(e),
                }
            }
        }

        self.traverse_cache_or_real(&key).await?;
        self.resolve_from_frames(&key).await
    }

    /// Steps 3-4: a cache-or-real downward walk from the root, recording
    /// every level's `nodetype` so `resolve_from_frames` can decide
    /// whether the leaf it lands on is trustworthy.
    async fn traverse_cache_or_real(&mut self, key: &Key) -> DtResult<()> {
        self.frames.clear();
        let mut coid = Coid::root(self.root_cid);

        loop {
            let (vb, origin) = self
                .tx
                .vsuperget_with_origin(coid, Some(key.clone()), self.keyinfo.clone())
                .await?;
            let sv = vb.as_supervalue()?;
            let (index, matched) = cell_search(sv, key, false);
            let is_leaf = sv.is_leaf();
            let next_coid = if is_leaf {
                None
            } else {
                Some(Coid::new(self.root_cid, sv.child_at(index)))
            };

            self.push_frame(Frame {
                coid,
                valbuf: vb,
                origin,
                index,
                matched,
            });

            match next_coid {
                None => return Ok(()),
                Some(next) => coid = next,
            }
        }
    }

    /// Steps 5-7: decide whether the leaf the downward walk landed on is
    /// trustworthy; if not, repair upward then re-walk downward for real
    /// until it is.
    async fn resolve_from_frames(&mut self, key: &Key) -> DtResult<SeekResult> {
        loop {
            let leaf = self.frames.last().expect("traversal always leaves a leaf frame");
            let sv = leaf.valbuf.as_supervalue()?;

            if sv.ncells() == 0 && sv.is_leftmost() && sv.is_rightmost() {
                self.frames.clear();
                self.state = CursorState::Invalid;
                return Ok(SeekResult::Empty);
            }

            let is_real = matches!(leaf.origin, NodeOrigin::TxCache | NodeOrigin::Server);
            let trustworthy = leaf.matched || !is_extreme(sv, leaf.index);

            if is_real && trustworthy {
                let (result, index, state) = leaf_decision(sv, leaf.index, leaf.matched);
                self.frames.last_mut().expect("leaf frame").index = index;
                self.state = state;
                return Ok(result);
            }

            self.repair_and_redescend(key).await?;
            if matches!(self.state, CursorState::Invalid) {
                return Ok(SeekResult::Empty);
            }
        }
    }

    /// Upward-repair-then-downward-real-walk (spec §4.5 steps 5-6): climb
    /// to the highest ancestor that is not itself extreme at the index the
    /// first pass chose, force a real read there, then real-read every
    /// level back down to a fresh leaf.
    async fn repair_and_redescend(&mut self, key: &Key) -> DtResult<()> {
        let mut level = self.frames.len().saturating_sub(2);
        while level > 0 {
            let sv = self.frames[level].valbuf.as_supervalue()?;
            if !is_extreme(sv, self.frames[level].index) {
                break;
            }
            level -= 1;
        }
        self.frames.truncate(level + 1);

        loop {
            {
                let frame = self.frames.last().expect("at least one frame");
                if !matches!(frame.origin, NodeOrigin::TxCache | NodeOrigin::Server) {
                    let coid = frame.coid;
                    let vb = self.tx.vsuperget_real(coid, Some(key.clone())).await?;
                    let sv = vb.as_supervalue()?;
                    let (index, matched) = cell_search(sv, key, false);
                    *self.frames.last_mut().expect("at least one frame") = Frame {
                        coid,
                        valbuf: vb,
                        origin: NodeOrigin::Server,
                        index,
                        matched,
                    };
                }
            }

            let frame = self.frames.last().expect("at least one frame");
            let sv = frame.valbuf.as_supervalue()?;
            if sv.is_leaf() {
                return Ok(());
            }

            let coid = Coid::new(self.root_cid, sv.child_at(frame.index));
            let vb = self.tx.vsuperget_real(coid, Some(key.clone())).await?;

            match vb.as_supervalue() {
                Ok(sv_child) => {
                    let (index, matched) = cell_search(sv_child, key, false);
                    self.push_frame(Frame {
                        coid,
                        valbuf: vb,
                        origin: NodeOrigin::Server,
                        index,
                        matched,
                    });
                }
                Err(_) => {
                    // The node this parent's index pointed at isn't a
                    // supervalue: the parent's own child pointer was
                    // stale. Evict it, back up one more level, and force
                    // a fresh real read there before trying again.
                    log::warn!(
                        "stale inner-node cache entry feeding into {}: not a supervalue, backing up",
                        coid
                    );
                    let parent_coid = self.frames.last().expect("at least one frame").coid;
                    self.tx.node_cache().remove(&parent_coid);
                    self.frames.pop();
                    if self.frames.is_empty() {
                        self.state = CursorState::Invalid;
                        return Ok(());
                    }
                    self.frames.last_mut().expect("just checked non-empty").origin = NodeOrigin::GlobalCache;
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // First / Last (spec §4.5 "First/Last")
    // -----------------------------------------------------------------

    pub async fn first(&mut self) -> DtResult<SeekResult> {
        self.extreme_seek(true).await
    }

    pub async fn last(&mut self) -> DtResult<SeekResult> {
        self.extreme_seek(false).await
    }

    async fn extreme_seek(&mut self, leftmost: bool) -> DtResult<SeekResult> {
        self.frames.clear();
        self.direct_int_key = None;
        let mut coid = Coid::root(self.root_cid);

        loop {
            let vb = self.tx.vsuperget_real(coid, None).await?;
            let (is_leaf, ok_edge, ncells, sibling_ptr, next_coid) = {
                let sv = vb.as_supervalue()?;
                let index = if leftmost { 0 } else { sv.last_index() };
                let ok_edge = if leftmost { sv.is_leftmost() } else { sv.is_rightmost() };
                let sibling_ptr = if leftmost { sv.leftptr() } else { sv.rightptr() };
                let next_coid = if sv.is_leaf() {
                    None
                } else {
                    Some(Coid::new(self.root_cid, sv.child_at(index)))
                };
                (sv.is_leaf(), ok_edge, sv.ncells(), sibling_ptr, next_coid)
            };

            self.push_frame(Frame {
                coid,
                valbuf: vb,
                origin: NodeOrigin::Server,
                index: if leftmost { 0 } else { ncells },
                matched: false,
            });

            if !is_leaf {
                coid = next_coid.expect("non-leaf has a child");
                continue;
            }

            if !ok_edge {
                // Not the tree's true extreme leaf (a stale inner node
                // sent us here): follow the leaf's own sibling chain.
                self.frames.pop();
                coid = Coid::new(self.root_cid, sibling_ptr);
                continue;
            }

            if ncells == 0 {
                self.frames.clear();
                self.state = CursorState::Invalid;
                return Ok(SeekResult::Empty);
            }

            let idx = if leftmost { 0 } else { ncells - 1 };
            self.frames.last_mut().expect("just pushed").index = idx;
            self.state = CursorState::Valid;
            return Ok(SeekResult::Match);
        }
    }

    // -----------------------------------------------------------------
    // Next / Prev (spec §4.5 "Next/Prev")
    // -----------------------------------------------------------------

    pub async fn next(&mut self) -> DtResult<SeekResult> {
        self.step(true).await
    }

    pub async fn prev(&mut self) -> DtResult<SeekResult> {
        self.step(false).await
    }

    async fn step(&mut self, forward: bool) -> DtResult<SeekResult> {
        if !self.state.is_valid() {
            return Err(DtError::bad_request("cursor is not positioned", "next/prev"));
        }

        let sibling = {
            let leaf = self.frames.last_mut().expect("valid cursor has a leaf frame");
            let sv = leaf.valbuf.as_supervalue()?;
            let ncells = sv.ncells();

            if forward && leaf.index + 1 < ncells {
                leaf.index += 1;
                None
            } else if !forward && leaf.index > 0 {
                leaf.index -= 1;
                None
            } else {
                Some(if forward { sv.rightptr() } else { sv.leftptr() })
            }
        };

        let sibling = match sibling {
            None => return Ok(SeekResult::Match),
            Some(s) => s,
        };

        if sibling.as_u64() == 0 {
            self.state = CursorState::Invalid;
            return Ok(SeekResult::Empty);
        }

        let sibling_coid = Coid::new(self.root_cid, sibling);
        let vb = self.tx.vsuperget_real(sibling_coid, None).await?;
        let new_ncells = vb.as_supervalue()?.ncells();
        let new_index = if forward { 0 } else { new_ncells.saturating_sub(1) };

        *self.frames.last_mut().expect("leaf frame") = Frame {
            coid: sibling_coid,
            valbuf: vb,
            origin: NodeOrigin::Server,
            index: new_index,
            matched: false,
        };

        if new_ncells == 0 {
            self.state = CursorState::Invalid;
            return Ok(SeekResult::Empty);
        }

        self.state = CursorState::Valid;
        Ok(SeekResult::Match)
    }

    // -----------------------------------------------------------------
    // Insert (spec §4.5 "Insert")
    // -----------------------------------------------------------------

    /// Insert `key` with row payload `value`. A key already present just
    /// gets its payload overwritten.
    pub async fn insert(&mut self, key: Key, value: Bytes) -> DtResult<()> {
        let seek_result = self.seek(key.clone()).await?;
        if matches!(seek_result, SeekResult::Match) && matches!(self.state, CursorState::Valid | CursorState::Direct) {
            return self.write_payload(&key, value).await;
        }

        let dest = if self.tx.flags().optimistic_insert {
            self.optimistic_leaf_candidate(&key)
        } else {
            None
        };

        let dest_coid = match dest {
            Some(coid) => coid,
            None => match self.frames.last() {
                Some(frame) => frame.coid,
                // An empty tree has no frames (the root leaf was empty),
                // but it is still the only place to insert into.
                None => Coid::root(self.root_cid),
            },
        };

        self.tx.list_add(dest_coid, Cell::leaf(key.clone()), self.keyinfo.clone(), 0)?;
        self.maybe_enqueue_split(dest_coid);

        self.state = CursorState::Invalid;
        self.frames.clear();
        self.write_payload(&key, value).await
    }

    /// Optimistic insert fast path (spec §4.5 Insert step 2): walk
    /// whatever inner nodes this transaction or the process-wide cache
    /// already has, without performing a single read. Succeeds only when
    /// every level along the way resolves to a non-extreme index, which
    /// is trustworthy regardless of how stale the underlying node is.
    fn optimistic_leaf_candidate(&self, key: &Key) -> Option<Coid> {
        let mut coid = Coid::root(self.root_cid);
        loop {
            let vb = self.tx.peek_tx_cache(coid).or_else(|| self.tx.node_cache().lookup(&coid))?;
            let sv = vb.as_supervalue().ok()?;
            let (index, matched) = cell_search(sv, key, false);
            if matched {
                return None;
            }
            if is_extreme(sv, index) {
                return None;
            }
            if sv.is_leaf() {
                return Some(coid);
            }
            coid = Coid::new(self.root_cid, sv.child_at(index));
        }
    }

    fn maybe_enqueue_split(&mut self, coid: Coid) {
        if let Some(vb) = self.tx.peek_tx_cache(coid) {
            if let Ok(sv) = vb.as_supervalue() {
                let ncells = sv.ncells() as u32;
                let cells_size = sv.cells_size();
                if ncells >= DTREE_SPLIT_SIZE || cells_size >= DTREE_SPLIT_SIZE_BYTES {
                    self.tx.enqueue_split(coid, ncells, cells_size);
                }
            }
        }
    }

    async fn write_payload(&mut self, key: &Key, value: Bytes) -> DtResult<()> {
        if !self.intkey {
            return Ok(());
        }
        if let Key::Int(n) = key {
            let data_coid = Coid::data(self.root_cid, Oid::from(*n as u64));
            self.tx.write(data_coid, value).await
        } else {
            Ok(())
        }
    }

    /// A `Direct` cursor knows its key exists but has no leaf frame: delete
    /// (unlike the read-only direct-seek fast path) needs the leaf's cell
    /// index and sibling pointers, so force a real tree descent onto the
    /// same key before mutating.
    async fn resolve_direct_to_leaf(&mut self) -> DtResult<()> {
        let key = self.current_key()?;
        self.traverse_cache_or_real(&key).await?;
        match self.resolve_from_frames(&key).await? {
            SeekResult::Match => Ok(()),
            _ => Err(DtError::internal(
                "direct-seek row vanished from the tree before delete could locate it",
            )),
        }
    }

    // -----------------------------------------------------------------
    // Delete (spec §4.5 "Delete")
    // -----------------------------------------------------------------

    /// Delete the row the cursor currently sits on.
    pub async fn delete(&mut self) -> DtResult<()> {
        if matches!(self.state, CursorState::Direct) {
            self.resolve_direct_to_leaf().await?;
        }

        if !self.state.is_valid() {
            return Err(DtError::bad_request("cursor is not positioned for delete", "delete"));
        }

        let (coid, victim_key, is_intkey, was_only_cell) = {
            let leaf = self.frames.last().expect("valid cursor has a leaf frame");
            let sv = leaf.valbuf.as_supervalue()?;
            if leaf.index >= sv.ncells() {
                return Err(DtError::bad_request("cursor is not positioned on a row", "delete"));
            }
            (leaf.coid, sv.key_at(leaf.index).clone(), sv.is_intkey(), sv.ncells() == 1)
        };

        if is_intkey {
            if let Key::Int(n) = &victim_key {
                let data_coid = Coid::data(self.root_cid, Oid::from(*n as u64));
                self.tx.write(data_coid, Bytes::new()).await?;
            }
        }

        self.tx.list_del_range(
            coid,
            IntervalType::ClosedClosed,
            Some(victim_key.clone()),
            Some(victim_key.clone()),
            self.keyinfo.clone(),
        )?;

        if was_only_cell {
            self.collapse_empty_leaf(coid, victim_key).await?;
        }

        self.state = CursorState::Invalid;
        self.frames.clear();
        Ok(())
    }

    /// DtFindRealLevelPath: re-run the downward real-walk to re-derive the
    /// authoritative ancestor chain for `coid`, used by
    /// `collapse_empty_leaf` to find the leaf's siblings without trusting
    /// any cached pointer.
    async fn dt_find_real_level_path(&mut self, leftptr: Oid, rightptr: Oid) -> DtResult<()> {
        if leftptr.as_u64() != 0 {
            let coid = Coid::new(self.root_cid, leftptr);
            self.tx.vsuperget_real(coid, None).await?;
        }
        if rightptr.as_u64() != 0 {
            let coid = Coid::new(self.root_cid, rightptr);
            self.tx.vsuperget_real(coid, None).await?;
        }
        Ok(())
    }

    /// DtRefreshCursor: the cache was too confused for
    /// `DtFindRealLevelPath` to locate a neighbor by its stale pointer
    /// alone; fall back to a full reseek on a key still known to be in
    /// range, which re-derives the authoritative ancestor chain from the
    /// root down.
    async fn dt_refresh_cursor(&mut self, guide_key: Key) -> DtResult<()> {
        self.seek(guide_key).await.map(|_| ())
    }

    /// An emptied leaf stitches its two neighbors' `LEFTPTR`/`RIGHTPTR`
    /// together so the sibling chain skips it; the now-childless slot in
    /// the parent is left for the splitter/compactor to reclaim (spec
    /// §4.5 Delete, "node becomes empty").
    async fn collapse_empty_leaf(&mut self, coid: Coid, guide_key: Key) -> DtResult<()> {
        let (leftptr, rightptr) = {
            let leaf = self.frames.last().expect("valid cursor has a leaf frame");
            let sv = leaf.valbuf.as_supervalue()?;
            (sv.leftptr(), sv.rightptr())
        };

        if let Err(e) = self.dt_find_real_level_path(leftptr, rightptr).await {
            log::warn!(
                "DtFindRealLevelPath failed locating neighbors of {}: {}, falling back to DtRefreshCursor",
                coid,
                e
            );
            self.dt_refresh_cursor(guide_key).await?;
        }

        if leftptr.as_u64() != 0 {
            let left_coid = Coid::new(self.root_cid, leftptr);
            self.tx.attr_set(left_coid, attr::RIGHTPTR, rightptr.as_u64())?;
        }
        if rightptr.as_u64() != 0 {
            let right_coid = Coid::new(self.root_cid, rightptr);
            self.tx.attr_set(right_coid, attr::LEFTPTR, leftptr.as_u64())?;
        }

        Ok(())
    }
}

/// The four leaf-decision sub-cases spec §4.5 Seek's step 7 describes,
/// unified: exact match, real+non-extreme middle, real+leftmost at index
/// 0, real+rightmost at index `Ncells` (including the empty-leaf case,
/// handled one level up in `resolve_from_frames`).
fn leaf_decision(sv: &SuperValue, index: usize, matched: bool) -> (SeekResult, usize, CursorState) {
    if matched {
        return (SeekResult::Match, index, CursorState::Valid);
    }
    if index == 0 && sv.is_leftmost() {
        return (SeekResult::After, 0, CursorState::Valid);
    }
    if index == sv.ncells() && sv.is_rightmost() {
        // Right-extremal leaf, every key less than the sought key: the
        // literal reading of spec.md's Seek step 1 (see DESIGN.md).
        return (SeekResult::Before, index - 1, CursorState::Valid);
    }
    (SeekResult::After, index, CursorState::Valid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtree_btree::CellType;
    use dtree_cache::NodeCache;
    use dtree_client::local::FakeServer;
    use dtree_client::{encode_node, ClusterDescriptor, FeatureFlags, MvkvsClient};
    use dtree_generic::Tid;

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

    async fn seeded_txn(client: Arc<dyn MvkvsClient>, cid: Cid) -> Transaction {
        let root = Coid::root(cid);
        let seed = SuperValue::new_leaf(CellType::Int, None);
        client
            .full_write(Tid::new(9, 9, 9), root, 0, Bytes::from(encode_node(&seed)))
            .await
            .unwrap();
        Transaction::start(
            Tid::new(9, 9, 9),
            client,
            Arc::new(NodeCache::new()),
            descriptor(),
            FeatureFlags::default(),
        )
    }

    #[tokio::test]
    async fn seek_on_empty_tree_is_empty() {
        let server: Arc<dyn MvkvsClient> = Arc::new(FakeServer::new());
        let cid = Cid::new(0x100);
        let mut tx = seeded_txn(server, cid).await;
        let mut cursor = Cursor::new(&mut tx, cid, true, None);
        let result = cursor.seek(Key::Int(5)).await.unwrap();
        assert_eq!(result, SeekResult::Empty);
    }

    #[tokio::test]
    async fn insert_then_seek_finds_row() {
        let server: Arc<dyn MvkvsClient> = Arc::new(FakeServer::new());
        let cid = Cid::new(0x101);
        let mut tx = seeded_txn(server, cid).await;
        let mut cursor = Cursor::new(&mut tx, cid, true, None);
        cursor.insert(Key::Int(7), Bytes::from_static(b"seven")).await.unwrap();

        let result = cursor.seek(Key::Int(7)).await.unwrap();
        assert_eq!(result, SeekResult::Match);
    }

    #[tokio::test]
    async fn first_and_last_bracket_the_rows() {
        let server: Arc<dyn MvkvsClient> = Arc::new(FakeServer::new());
        let cid = Cid::new(0x102);
        let mut tx = seeded_txn(server, cid).await;
        {
            let mut cursor = Cursor::new(&mut tx, cid, true, None);
            for n in [3i64, 1, 5, 2, 4] {
                cursor.insert(Key::Int(n), Bytes::from(n.to_string())).await.unwrap();
            }
        }

        let mut cursor = Cursor::new(&mut tx, cid, true, None);
        assert_eq!(cursor.first().await.unwrap(), SeekResult::Match);
        assert_eq!(cursor.direct_int_key, None);

        let mut next_keys = Vec::new();
        loop {
            let leaf = cursor.frames.last().unwrap();
            let sv = leaf.valbuf.as_supervalue().unwrap();
            next_keys.push(sv.key_at(leaf.index).as_int().unwrap());
            if cursor.next().await.unwrap() != SeekResult::Match {
                break;
            }
        }
        assert_eq!(next_keys, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn delete_then_seek_reports_not_found() {
        let server: Arc<dyn MvkvsClient> = Arc::new(FakeServer::new());
        let cid = Cid::new(0x103);
        let mut tx = seeded_txn(server, cid).await;
        let mut cursor = Cursor::new(&mut tx, cid, true, None);
        cursor.insert(Key::Int(1), Bytes::from_static(b"one")).await.unwrap();
        cursor.insert(Key::Int(2), Bytes::from_static(b"two")).await.unwrap();

        cursor.seek(Key::Int(1)).await.unwrap();
        cursor.delete().await.unwrap();

        let result = cursor.seek(Key::Int(1)).await.unwrap();
        assert_ne!(result, SeekResult::Match);
    }

    #[tokio::test]
    async fn save_and_restore_position_reseeks_the_same_row() {
        let server: Arc<dyn MvkvsClient> = Arc::new(FakeServer::new());
        let cid = Cid::new(0x104);
        let mut tx = seeded_txn(server, cid).await;
        let mut cursor = Cursor::new(&mut tx, cid, true, None);
        cursor.insert(Key::Int(3), Bytes::from_static(b"three")).await.unwrap();
        cursor.insert(Key::Int(8), Bytes::from_static(b"eight")).await.unwrap();

        cursor.seek(Key::Int(8)).await.unwrap();
        cursor.save_position().unwrap();
        assert!(matches!(cursor.state(), CursorState::RequireSeek));
        assert!(cursor.frames.is_empty());

        let result = cursor.restore_position().await.unwrap();
        assert_eq!(result, SeekResult::Match);
        assert_eq!(cursor.current_key().unwrap(), Key::Int(8));
    }

    #[tokio::test]
    async fn restore_without_save_is_an_error() {
        let server: Arc<dyn MvkvsClient> = Arc::new(FakeServer::new());
        let cid = Cid::new(0x105);
        let mut tx = seeded_txn(server, cid).await;
        let mut cursor = Cursor::new(&mut tx, cid, true, None);
        assert!(cursor.restore_position().await.is_err());
    }
}
