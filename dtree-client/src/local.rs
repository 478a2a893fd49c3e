//! The local transaction variant (spec §4.7): the same `MvkvsClient`
//! surface, but every stub dispatches to an in-process fake server
//! instead of issuing an RPC. Used for ephemeral tables (SQL temp
//! tables). Because there is never a real wire here, `FakeServer` is the
//! one place in this crate allowed to touch an ephemeral `Cid` -- the
//! network path (`RpcMvkvsClient`) refuses them categorically.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use dtree_error::{DtError, DtResult, StatusCode};
use dtree_generic::{Cid, Coid, IntervalType, Key, Oid, Tid, Timestamp};

use crate::client::MvkvsClient;
use crate::rpc::*;
use crate::transport::ServerId;
use crate::wire::{decode_node, encode_node, to_supervalue};

struct StoredEntry {
    bytes: Bytes,
    commit_ts: Timestamp,
}

/// An in-process stand-in for a storage server. Single `Mutex` rather
/// than per-coid locking: local transactions are not expected to see
/// meaningful concurrency, and this mirrors the teacher's own `Map<K,
/// V>` (`src/internal/cache.rs`) in preferring one lock over a sharded
/// one when contention isn't the concern.
pub struct FakeServer {
    store: Mutex<HashMap<Coid, StoredEntry>>,
    rowids: Mutex<HashMap<Cid, u64>>,
}

impl Default for FakeServer {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeServer {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(HashMap::new()),
            rowids: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, coid: Coid) -> DtResult<Bytes> {
        self.store
            .lock()
            .expect("fake server store poisoned")
            .get(&coid)
            .map(|entry| entry.bytes.clone())
            .ok_or_else(|| DtError::cell_out_of_range(coid))
    }

    fn put(&self, coid: Coid, bytes: Bytes) {
        self.store.lock().expect("fake server store poisoned").insert(
            coid,
            StoredEntry {
                bytes,
                commit_ts: Timestamp::set_new(),
            },
        );
    }
}

fn ok_reply_status() -> i8 {
    StatusCode::Ok.as_i8()
}

#[async_trait]
impl MvkvsClient for FakeServer {
    async fn read(&self, _tid: Tid, _start_ts: Timestamp, coid: Coid, _len_hint: u32) -> DtResult<ReadReply> {
        let bytes = self.get(coid)?;
        Ok(ReadReply {
            status: ok_reply_status(),
            read_ts: Timestamp::set_new(),
            bytes,
            cache_hints: CacheHints::default(),
        })
    }

    async fn write(&self, _tid: Tid, coid: Coid, _level: u32, bytes: Bytes) -> DtResult<WriteReply> {
        self.put(coid, bytes);
        Ok(WriteReply {
            status: ok_reply_status(),
            cache_hints: CacheHints::default(),
        })
    }

    async fn full_read(
        &self,
        _tid: Tid,
        _start_ts: Timestamp,
        coid: Coid,
        _cell: Option<Key>,
    ) -> DtResult<FullReadReply> {
        let node_bytes = self.get(coid)?;
        Ok(FullReadReply {
            status: ok_reply_status(),
            read_ts: Timestamp::set_new(),
            node_bytes,
            cache_hints: CacheHints::default(),
        })
    }

    async fn full_write(&self, _tid: Tid, coid: Coid, _level: u32, node_bytes: Bytes) -> DtResult<FullWriteReply> {
        self.put(coid, node_bytes);
        Ok(FullWriteReply {
            status: ok_reply_status(),
            cache_hints: CacheHints::default(),
        })
    }

    async fn list_add(
        &self,
        _tid: Tid,
        coid: Coid,
        _level: u32,
        _check_range: bool,
        _start_ts: Timestamp,
        cell: Key,
        child_oid: Oid,
    ) -> DtResult<ListAddReply> {
        let node_bytes = self.get(coid)?;
        let (wire, _) = decode_node(&node_bytes)?;
        let mut sv = to_supervalue(&wire, None)?;

        let collator = sv.collator();
        let (pos, matched) = collator.bisect_left(
            &sv.cells().iter().map(|c| c.key.clone()).collect::<Vec<_>>(),
            &cell,
            false,
        );
        let new_cell = dtree_btree::Cell::new(cell, child_oid);
        if matched {
            sv.replace_cell(pos, new_cell);
        } else {
            sv.insert_cell(pos, new_cell);
        }

        self.put(coid, Bytes::from(encode_node(&sv)));
        Ok(ListAddReply {
            status: ok_reply_status(),
            split_decided: None,
            cache_hints: CacheHints::default(),
        })
    }

    async fn list_del_range(
        &self,
        _tid: Tid,
        coid: Coid,
        _level: u32,
        interval_type: IntervalType,
        cell1: Option<Key>,
        cell2: Option<Key>,
    ) -> DtResult<ListDelRangeReply> {
        let node_bytes = self.get(coid)?;
        let (wire, _) = decode_node(&node_bytes)?;
        let mut sv = to_supervalue(&wire, None)?;

        let keys: Vec<Key> = sv.cells().iter().map(|c| c.key.clone()).collect();
        let collator = sv.collator();

        let start = match (interval_type.left_bound(), &cell1) {
            (dtree_generic::Bound::Infinite, _) | (_, None) => 0,
            (dtree_generic::Bound::Closed, Some(key)) => collator.bisect_left(&keys, key, false).0,
            (dtree_generic::Bound::Open, Some(key)) => {
                let (pos, matched) = collator.bisect_left(&keys, key, false);
                if matched {
                    pos + 1
                } else {
                    pos
                }
            }
        };

        let end = match (interval_type.right_bound(), &cell2) {
            (dtree_generic::Bound::Infinite, _) | (_, None) => keys.len(),
            (dtree_generic::Bound::Open, Some(key)) => collator.bisect_left(&keys, key, false).0,
            (dtree_generic::Bound::Closed, Some(key)) => {
                let (pos, matched) = collator.bisect_left(&keys, key, false);
                if matched {
                    pos + 1
                } else {
                    pos
                }
            }
        };

        if start < end {
            sv.delete_cell_range(start, end);
        }

        self.put(coid, Bytes::from(encode_node(&sv)));
        Ok(ListDelRangeReply {
            status: ok_reply_status(),
            cache_hints: CacheHints::default(),
        })
    }

    async fn attr_set(
        &self,
        _tid: Tid,
        coid: Coid,
        _level: u32,
        attrid: usize,
        attrvalue: u64,
    ) -> DtResult<AttrSetReply> {
        let node_bytes = self.get(coid)?;
        let (wire, _) = decode_node(&node_bytes)?;
        let mut sv = to_supervalue(&wire, None)?;
        sv.set_attr(attrid, attrvalue)?;
        self.put(coid, Bytes::from(encode_node(&sv)));
        Ok(AttrSetReply { status: ok_reply_status() })
    }

    async fn prepare(&self, _server: &ServerId, _req: PrepareRequest) -> DtResult<PrepareReply> {
        Ok(PrepareReply {
            status: ok_reply_status(),
            vote: PrepareVote::Yes,
            mincommitts: Timestamp::set_new(),
            cache_hints: CacheHints::default(),
        })
    }

    async fn commit(&self, _server: &ServerId, _req: CommitRequest) -> DtResult<CommitReply> {
        Ok(CommitReply {
            status: ok_reply_status(),
            waitingts: Timestamp::set_illegal(),
        })
    }

    async fn sub_trans(&self, _server: &ServerId, _req: SubTransRequest) -> DtResult<SubTransReply> {
        Ok(SubTransReply { status: ok_reply_status() })
    }

    async fn get_rowid(&self, cid: Cid, hint: Option<u64>) -> DtResult<GetRowidReply> {
        let mut rowids = self.rowids.lock().expect("fake server rowid table poisoned");
        let counter = rowids.entry(cid).or_insert_with(|| hint.unwrap_or(0));
        *counter += 1;
        Ok(GetRowidReply {
            status: ok_reply_status(),
            rowid: *counter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtree_btree::SuperValue;
    use dtree_generic::CellType;

    fn leaf_with(keys: &[i64]) -> Bytes {
        let mut sv = SuperValue::new_leaf(CellType::Int, None);
        for (i, k) in keys.iter().enumerate() {
            sv.insert_cell(i, dtree_btree::Cell::leaf(Key::Int(*k)));
        }
        Bytes::from(encode_node(&sv))
    }

    #[tokio::test]
    async fn write_then_read_roundtrips() {
        let server = FakeServer::new();
        let tid = Tid::new(1, 1, 1);
        let coid = Coid::new(Cid::new(Cid::EPHEMERAL_BIT), Oid::from(0));

        server
            .write(tid, coid, 0, Bytes::from_static(b"payload"))
            .await
            .unwrap();
        let reply = server.read(tid, Timestamp::set_new(), coid, 0).await.unwrap();
        assert_eq!(reply.bytes, Bytes::from_static(b"payload"));
    }

    #[tokio::test]
    async fn list_add_inserts_in_sorted_position() {
        let server = FakeServer::new();
        let tid = Tid::new(1, 1, 1);
        let coid = Coid::new(Cid::new(Cid::EPHEMERAL_BIT), Oid::from(0));
        server.full_write(tid, coid, 0, leaf_with(&[1, 3, 7])).await.unwrap();

        server
            .list_add(tid, coid, 0, false, Timestamp::set_new(), Key::Int(5), Oid::ROOT)
            .await
            .unwrap();

        let reply = server.full_read(tid, Timestamp::set_new(), coid, None).await.unwrap();
        let (wire, _) = decode_node(&reply.node_bytes).unwrap();
        let keys: Vec<i64> = wire.cells.iter().map(|c| c.nkey).collect();
        assert_eq!(keys, vec![1, 3, 5, 7]);
    }

    #[tokio::test]
    async fn list_del_range_half_open_matches_spec_scenario() {
        let server = FakeServer::new();
        let tid = Tid::new(1, 1, 1);
        let coid = Coid::new(Cid::new(Cid::EPHEMERAL_BIT), Oid::from(0));
        server
            .full_write(tid, coid, 0, leaf_with(&[1, 3, 5, 7]))
            .await
            .unwrap();

        server
            .list_del_range(
                tid,
                coid,
                0,
                IntervalType::OpenClosed,
                Some(Key::Int(1)),
                Some(Key::Int(3)),
            )
            .await
            .unwrap();

        let reply = server.full_read(tid, Timestamp::set_new(), coid, None).await.unwrap();
        let (wire, _) = decode_node(&reply.node_bytes).unwrap();
        let keys: Vec<i64> = wire.cells.iter().map(|c| c.nkey).collect();
        assert_eq!(keys, vec![1, 5, 7]);
    }

    #[tokio::test]
    async fn get_rowid_is_monotonic_per_cid() {
        let server = FakeServer::new();
        let cid = Cid::new(Cid::EPHEMERAL_BIT);
        let a = server.get_rowid(cid, None).await.unwrap().rowid;
        let b = server.get_rowid(cid, None).await.unwrap().rowid;
        assert!(b > a);
    }
}
