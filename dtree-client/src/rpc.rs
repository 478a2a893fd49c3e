//! Request/reply structs for every RPC in the storage surface (spec §4.4),
//! field-for-field as the table lists them. Marshalling of the node
//! payload itself lives in `wire`; these structs carry the payload plus
//! the surrounding transaction/versioning fields, and derive `Serialize`/
//! `Deserialize` so a `RpcTransport` can move them as an opaque envelope
//! (spec.md §1 places the wire framing itself out of scope).

use bytes::Bytes;
use dtree_generic::{Coid, IntervalType, Key, Tid, Timestamp};

/// Cache hints a server may return alongside any reply: an opportunistic
/// snapshot of a node the client didn't ask for, used to warm the global
/// inner-node cache (spec §4.3). `node_bytes` is the bit-exact wire
/// encoding of `wire::encode_node`, decoded by the caller before
/// installing it into `NodeCache`.
#[derive(Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct CacheHints {
    pub hints: Vec<(Coid, WireNodeSnapshot)>,
}

/// A self-contained node snapshot suitable for seeding the cache: the
/// encoded payload plus the versioning metadata `Valbuf` needs.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct WireNodeSnapshot {
    pub node_bytes: Bytes,
    pub commit_ts: Timestamp,
    pub read_ts: Timestamp,
}

#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct ReadRequest {
    pub tid: Tid,
    pub start_ts: Timestamp,
    pub coid: Coid,
    pub len_hint: u32,
}

#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct ReadReply {
    pub status: i8,
    pub read_ts: Timestamp,
    pub bytes: Bytes,
    pub cache_hints: CacheHints,
}

#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct WriteRequest {
    pub tid: Tid,
    pub coid: Coid,
    pub level: u32,
    pub bytes: Bytes,
}

#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct WriteReply {
    pub status: i8,
    pub cache_hints: CacheHints,
}

#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct FullReadRequest {
    pub tid: Tid,
    pub start_ts: Timestamp,
    pub coid: Coid,
    /// Present for an optimistic, single-cell seek (spec §4.5's "direct"
    /// path): restrict the read to the cell that would contain this key.
    pub cell: Option<Key>,
}

#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct FullReadReply {
    pub status: i8,
    pub read_ts: Timestamp,
    /// Bit-exact node payload per spec §6, produced by `wire::encode_node`.
    /// Empty when `status != Ok`.
    pub node_bytes: Bytes,
    pub cache_hints: CacheHints,
}

#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct FullWriteRequest {
    pub tid: Tid,
    pub coid: Coid,
    pub level: u32,
    /// Bit-exact node payload per spec §6, produced by `wire::encode_node`.
    pub node_bytes: Bytes,
}

#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct FullWriteReply {
    pub status: i8,
    pub cache_hints: CacheHints,
}

#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct ListAddRequest {
    pub tid: Tid,
    pub coid: Coid,
    pub level: u32,
    /// Set when the caller wants the server to check the cell actually
    /// belongs in this node before inserting (the "optimistic listAdd"
    /// path of §4.5 / §7's recovery policy).
    pub check_range: bool,
    pub start_ts: Timestamp,
    pub cell: Key,
    pub child_oid: dtree_generic::Oid,
}

#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct ListAddReply {
    pub status: i8,
    /// Cell count and byte size after the insert, present only when the
    /// server decided a split is needed and computed it before replying.
    pub split_decided: Option<(u32, u64)>,
    pub cache_hints: CacheHints,
}

#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct ListDelRangeRequest {
    pub tid: Tid,
    pub coid: Coid,
    pub level: u32,
    pub interval_type: IntervalType,
    pub cell1: Option<Key>,
    pub cell2: Option<Key>,
}

#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct ListDelRangeReply {
    pub status: i8,
    pub cache_hints: CacheHints,
}

#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct AttrSetRequest {
    pub tid: Tid,
    pub coid: Coid,
    pub level: u32,
    pub attrid: usize,
    pub attrvalue: u64,
}

#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct AttrSetReply {
    pub status: i8,
}

/// A buffered write piggy-backed onto `Prepare` (spec §4.2's "write
/// piggy-back"): the final bytes for a coid this transaction touched,
/// sent along with the prepare vote request instead of as a separate
/// round trip.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct Piggyback {
    pub coid: Coid,
    pub bytes: Bytes,
}

/// A single read recorded for optimistic concurrency control, checked by
/// the server at prepare time (spec §4.2's OCC readset, opt-in via
/// `GAIA_OCC`).
#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct ReadsetEntry {
    pub coid: Coid,
    pub read_ts: Timestamp,
}

#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct PrepareRequest {
    pub tid: Tid,
    pub start_ts: Timestamp,
    pub onephasecommit: bool,
    pub piggyback: Vec<Piggyback>,
    pub readset: Option<Vec<ReadsetEntry>>,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, serde::Serialize, serde::Deserialize)]
pub enum PrepareVote {
    Yes,
    No,
}

#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct PrepareReply {
    pub status: i8,
    pub vote: PrepareVote,
    pub mincommitts: Timestamp,
    pub cache_hints: CacheHints,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, serde::Serialize, serde::Deserialize)]
pub enum CommitOutcome {
    Commit,
    Abort,
    AbortWithoutPrepare,
}

#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct CommitRequest {
    pub tid: Tid,
    pub committs: Timestamp,
    pub outcome: CommitOutcome,
}

#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct CommitReply {
    pub status: i8,
    /// A future timestamp the caller must sleep until before returning
    /// success to its own caller, to preserve read-after-write ordering
    /// under loose clock synchronization (spec §7).
    pub waitingts: Timestamp,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, serde::Serialize, serde::Deserialize)]
pub enum SubTransAction {
    Discard,
    MergeDown,
}

#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct SubTransRequest {
    pub tid: Tid,
    pub level: u32,
    pub action: SubTransAction,
}

#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct SubTransReply {
    pub status: i8,
}

#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct GetRowidRequest {
    pub cid: dtree_generic::Cid,
    pub hint: Option<u64>,
}

#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct GetRowidReply {
    pub status: i8,
    pub rowid: u64,
}

/// Every RPC the storage surface supports, tagged so a `RpcTransport` can
/// route and a mock server can dispatch without downcasting.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub enum RpcCall {
    Read(ReadRequest),
    Write(WriteRequest),
    FullRead(FullReadRequest),
    FullWrite(FullWriteRequest),
    ListAdd(ListAddRequest),
    ListDelRange(ListDelRangeRequest),
    AttrSet(AttrSetRequest),
    Prepare(PrepareRequest),
    Commit(CommitRequest),
    SubTrans(SubTransRequest),
    GetRowid(GetRowidRequest),
}

#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub enum RpcReply {
    Read(ReadReply),
    Write(WriteReply),
    FullRead(FullReadReply),
    FullWrite(FullWriteReply),
    ListAdd(ListAddReply),
    ListDelRange(ListDelRangeReply),
    AttrSet(AttrSetReply),
    Prepare(PrepareReply),
    Commit(CommitReply),
    SubTrans(SubTransReply),
    GetRowid(GetRowidReply),
}
