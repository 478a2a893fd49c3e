//! Commit-time split dispatch and the client-side split-location
//! algorithm (spec §4.5 tail, `DTREE_SPLIT_LOCATION = client`).
//!
//! Grounded in `host/btree/src/file.rs`'s `BTreeFile::split_child` (read
//! child, compute midpoint, allocate new node id, move the upper half of
//! cells, write both blocks, update the parent) but operating through the
//! MVKVS RPC surface instead of a local file, and driven from
//! `Transaction::drain_work_list` rather than a recursive insert call.

use std::sync::Arc;

use dtree_btree::{attr, Cell, SuperValue};
use dtree_error::DtResult;
use dtree_generic::{Cid, CellType, Coid, IntervalType, Key, KeyInfo, Oid};
use dtree_transact::{Transaction, DTREE_SPLIT_CLIENT_MAX_RETRIES, SPLIT_CLIENT_RETRY_BACKOFF};

use crate::search::cell_search;
use crate::throttle::RowidAllocator;

/// Where, in an inner node, a child oid was found: a regular cell's
/// value, or the node's `LASTPTR` slot.
enum ParentSlot {
    Cell(Key),
    LastPtr,
}

/// Drains `tx`'s commit-time split work list and physically rewrites
/// each oversize node, retrying transient failures.
pub struct SplitDispatcher {
    rowids: RowidAllocator,
}

impl Default for SplitDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl SplitDispatcher {
    pub fn new() -> Self {
        Self {
            rowids: RowidAllocator::new(),
        }
    }

    /// Split every node `tx`'s work list names, in the order they were
    /// enqueued. Intended to run after a successful commit, in a fresh
    /// transaction of its own (splitting is an independent structural
    /// change, not part of the mutation that triggered it).
    pub async fn dispatch_all(&self, tx: &mut Transaction, root_cid: Cid, keyinfo: Option<Arc<KeyInfo>>) -> DtResult<()> {
        let tasks = tx.drain_work_list();
        for task in tasks {
            self.split_with_retry(tx, root_cid, keyinfo.clone(), task.coid).await?;
        }
        Ok(())
    }

    async fn split_with_retry(
        &self,
        tx: &mut Transaction,
        root_cid: Cid,
        keyinfo: Option<Arc<KeyInfo>>,
        coid: Coid,
    ) -> DtResult<()> {
        let mut attempt = 0;
        loop {
            match self.split_once(tx, root_cid, keyinfo.clone(), coid).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < DTREE_SPLIT_CLIENT_MAX_RETRIES => {
                    attempt += 1;
                    log::debug!(
                        "btree::split_child retry {}/{} on {}: {}",
                        attempt,
                        DTREE_SPLIT_CLIENT_MAX_RETRIES,
                        coid,
                        e
                    );
                    tokio::time::sleep(SPLIT_CLIENT_RETRY_BACKOFF).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn split_once(&self, tx: &mut Transaction, root_cid: Cid, keyinfo: Option<Arc<KeyInfo>>, coid: Coid) -> DtResult<()> {
        let vb = tx.vsuperget_real(coid, None).await?;
        let sv = vb.as_supervalue()?.clone();

        if sv.ncells() < 2 {
            // Another mutation already shrank this node since the split
            // was enqueued; nothing to do.
            return Ok(());
        }

        let mid = sv.ncells() / 2;
        let is_leaf = sv.is_leaf();
        let cell_type = sv.cell_type();
        let promoted_key = sv.key_at(mid).clone();
        let is_root = coid == Coid::root(root_cid);

        let left_coid = if is_root {
            let moved_oid = Oid::from(self.rowids.next(tx.client().as_ref(), root_cid, None).await?);
            Coid::new(root_cid, moved_oid)
        } else {
            coid
        };

        let right_start = if is_leaf { mid } else { mid + 1 };
        let mut right = new_node(is_leaf, cell_type, sv.height(), keyinfo.clone());
        for cell in &sv.cells()[right_start..] {
            right.insert_cell(right.ncells(), cell.clone());
        }
        right.set_lastptr(sv.lastptr());
        right.set_leftptr(left_coid.oid);
        right.set_rightptr(sv.rightptr());

        let new_oid = Oid::from(self.rowids.next(tx.client().as_ref(), root_cid, None).await?);
        let new_coid = Coid::new(root_cid, new_oid);
        tx.create_supervalue(new_coid, right).await?;

        if sv.rightptr().as_u64() != 0 {
            let old_right_coid = Coid::new(root_cid, sv.rightptr());
            tx.attr_set(old_right_coid, attr::LEFTPTR, new_oid.as_u64())?;
        }

        if is_root {
            let mut left = new_node(is_leaf, cell_type, sv.height(), keyinfo.clone());
            for cell in &sv.cells()[..mid] {
                left.insert_cell(left.ncells(), cell.clone());
            }
            left.set_leftptr(sv.leftptr());
            left.set_rightptr(new_oid);
            if is_leaf {
                left.set_lastptr(sv.lastptr());
            } else {
                left.set_lastptr(sv.cells()[mid].value);
            }
            tx.create_supervalue(left_coid, left).await?;

            let mut new_root = SuperValue::new_inner(cell_type, sv.height() + 1, keyinfo);
            new_root.insert_cell(0, Cell::new(promoted_key, left_coid.oid));
            new_root.set_lastptr(new_oid);
            tx.create_supervalue(Coid::root(root_cid), new_root).await?;
            return Ok(());
        }

        tx.list_del_range(
            coid,
            IntervalType::ClosedInfinite,
            Some(sv.key_at(mid).clone()),
            None,
            keyinfo.clone(),
        )?;
        if !is_leaf {
            tx.attr_set(coid, attr::LASTPTR, sv.cells()[mid].value.as_u64())?;
        }
        tx.attr_set(coid, attr::RIGHTPTR, new_oid.as_u64())?;

        self.splice_into_parent(tx, root_cid, keyinfo, coid, promoted_key, new_oid).await
    }

    /// Re-derive `old_coid`'s parent with a real downward walk guided by
    /// `promoted_key` (still inside `old_coid`'s pre-split range), then
    /// retarget the slot that used to point at `old_coid` to the new
    /// sibling and splice in a fresh cell for `old_coid` itself.
    async fn splice_into_parent(
        &self,
        tx: &mut Transaction,
        root_cid: Cid,
        keyinfo: Option<Arc<KeyInfo>>,
        old_coid: Coid,
        promoted_key: Key,
        new_oid: Oid,
    ) -> DtResult<()> {
        let parent = find_parent(tx, root_cid, &promoted_key, old_coid).await?;
        let (parent_coid, slot) = match parent {
            Some(found) => found,
            None => {
                log::warn!(
                    "split dispatcher could not locate the parent of {}; leaving the new sibling \
                     unlinked for a later reseek to repair",
                    old_coid
                );
                return Ok(());
            }
        };

        match slot {
            ParentSlot::Cell(key) => {
                tx.list_del_range(
                    parent_coid,
                    IntervalType::ClosedClosed,
                    Some(key.clone()),
                    Some(key),
                    keyinfo.clone(),
                )?;
                tx.list_add(parent_coid, Cell::new(promoted_key.clone(), new_oid), keyinfo.clone(), 0)?;
            }
            ParentSlot::LastPtr => {
                tx.attr_set(parent_coid, attr::LASTPTR, new_oid.as_u64())?;
            }
        }

        tx.list_add(parent_coid, Cell::new(promoted_key, old_coid.oid), keyinfo, 0)
    }
}

fn new_node(is_leaf: bool, cell_type: CellType, height: u64, keyinfo: Option<Arc<KeyInfo>>) -> SuperValue {
    if is_leaf {
        SuperValue::new_leaf(cell_type, keyinfo)
    } else {
        SuperValue::new_inner(cell_type, height, keyinfo)
    }
}

async fn find_parent(
    tx: &mut Transaction,
    root_cid: Cid,
    guide_key: &Key,
    target: Coid,
) -> DtResult<Option<(Coid, ParentSlot)>> {
    let mut coid = Coid::root(root_cid);
    if coid == target {
        return Ok(None);
    }

    loop {
        let vb = tx.vsuperget_real(coid, None).await?;
        let sv = vb.as_supervalue()?;
        if sv.is_leaf() {
            return Ok(None);
        }

        let (index, _) = cell_search(sv, guide_key, false);
        let child = sv.child_at(index);

        if child == target.oid {
            let slot = if index == sv.ncells() {
                ParentSlot::LastPtr
            } else {
                ParentSlot::Cell(sv.key_at(index).clone())
            };
            return Ok(Some((coid, slot)));
        }

        coid = Coid::new(root_cid, child);
    }
}
