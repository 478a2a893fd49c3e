//! The client-side MVKVS RPC surface (spec §4.4): wire structs, the
//! bit-exact node payload format, a pluggable transport, and the local
//! (in-process) transaction variant.

mod client;
mod config;
mod local;
mod rpc;
mod transport;
mod varint;
mod wire;

pub use client::{MvkvsClient, RpcMvkvsClient};
pub use config::{ClusterDescriptor, FeatureFlags};
pub use local::FakeServer;
pub use rpc::{
    AttrSetReply, AttrSetRequest, CacheHints, CommitOutcome, CommitReply, CommitRequest, FullReadReply,
    FullReadRequest, FullWriteReply, FullWriteRequest, GetRowidReply, GetRowidRequest, ListAddReply,
    ListAddRequest, ListDelRangeReply, ListDelRangeRequest, Piggyback, PrepareReply, PrepareRequest, PrepareVote,
    ReadReply, ReadRequest, ReadsetEntry, RpcCall, RpcReply, SubTransAction, SubTransReply, SubTransRequest,
    WireNodeSnapshot, WriteReply, WriteRequest,
};
pub use transport::{mock, RpcTransport, ServerId};
pub use varint::{get_varint, put_varint};
pub use wire::{decode_node, encode_node, roundtrip, to_supervalue, WireCell, WireNode};
