//! The RPC transport seam. spec.md §1 places wire framing and retries at
//! the transport layer out of scope for this crate, so `RpcTransport`
//! exchanges an opaque byte envelope with a named server; `RpcCall`/
//! `RpcReply` marshal through it via `bincode`, the serialization crate
//! the example pack reaches for in exactly this role (readyset, skytable).

use async_trait::async_trait;
use dtree_error::{DtError, DtResult};

use crate::rpc::{RpcCall, RpcReply};

/// Identifies the storage server that owns a container, per the cluster
/// descriptor (spec §6 "Configuration").
#[derive(Clone, Eq, PartialEq, Hash, Debug, serde::Serialize, serde::Deserialize)]
pub struct ServerId(pub String);

impl std::fmt::Display for ServerId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The minimal seam a caller must implement to actually talk to a server:
/// take a server id and an opaque byte envelope, return the reply's byte
/// envelope. Framing, connection pooling and retries live below this
/// trait.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call(&self, server: &ServerId, request: Vec<u8>) -> DtResult<Vec<u8>>;
}

pub fn encode_call(call: &RpcCall) -> DtResult<Vec<u8>> {
    bincode::serialize(call).map_err(|e| DtError::generic(format!("failed to encode rpc call: {}", e)))
}

pub fn decode_call(bytes: &[u8]) -> DtResult<RpcCall> {
    bincode::deserialize(bytes)
        .map_err(|e| DtError::corrupted_log(format!("failed to decode rpc call: {}", e)))
}

pub fn encode_reply(reply: &RpcReply) -> DtResult<Vec<u8>> {
    bincode::serialize(reply).map_err(|e| DtError::generic(format!("failed to encode rpc reply: {}", e)))
}

pub fn decode_reply(bytes: &[u8]) -> DtResult<RpcReply> {
    bincode::deserialize(bytes)
        .map_err(|e| DtError::corrupted_log(format!("failed to decode rpc reply: {}", e)))
}

/// A deterministic, in-memory transport for tests: dispatches straight to
/// a handler closure without touching a real socket, matching the
/// corpus's preference for small focused test doubles over a mocking
/// framework. Bytes are still round-tripped through `bincode` so the
/// marshal/demarshal path is genuinely exercised.
pub mod mock {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use dtree_error::DtResult;

    use crate::rpc::{RpcCall, RpcReply};

    use super::{decode_call, encode_reply, RpcTransport, ServerId};

    pub struct MockTransport<F: Fn(RpcCall) -> RpcReply + Send + Sync> {
        handler: Mutex<F>,
    }

    impl<F: Fn(RpcCall) -> RpcReply + Send + Sync> MockTransport<F> {
        pub fn new(handler: F) -> Self {
            Self {
                handler: Mutex::new(handler),
            }
        }
    }

    #[async_trait]
    impl<F: Fn(RpcCall) -> RpcReply + Send + Sync> RpcTransport for MockTransport<F> {
        async fn call(&self, _server: &ServerId, request: Vec<u8>) -> DtResult<Vec<u8>> {
            let call = decode_call(&request)?;
            let reply = {
                let handler = self.handler.lock().expect("mock transport poisoned");
                (handler)(call)
            };
            encode_reply(&reply)
        }
    }
}
