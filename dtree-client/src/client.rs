//! The `MvkvsClient` trait: one async method per RPC kind (spec §4.4),
//! generic over a pluggable `RpcTransport`. Mirrors the teacher's
//! `File`/`Dir` async-trait surface (`host/transact/src/fs.rs`): a thin,
//! directly-awaitable interface with no connection-pool or retry policy
//! baked in -- that lives below `RpcTransport`.

use async_trait::async_trait;
use bytes::Bytes;
use dtree_error::{DtError, DtResult, StatusCode};
use dtree_generic::{Cid, Coid, IntervalType, Key, Oid, Tid, Timestamp};

use crate::config::ClusterDescriptor;
use crate::rpc::*;
use crate::transport::{decode_reply, encode_call, RpcTransport, ServerId};

#[async_trait]
pub trait MvkvsClient: Send + Sync {
    async fn read(&self, tid: Tid, start_ts: Timestamp, coid: Coid, len_hint: u32) -> DtResult<ReadReply>;

    async fn write(&self, tid: Tid, coid: Coid, level: u32, bytes: Bytes) -> DtResult<WriteReply>;

    async fn full_read(
        &self,
        tid: Tid,
        start_ts: Timestamp,
        coid: Coid,
        cell: Option<Key>,
    ) -> DtResult<FullReadReply>;

    async fn full_write(&self, tid: Tid, coid: Coid, level: u32, node_bytes: Bytes) -> DtResult<FullWriteReply>;

    async fn list_add(
        &self,
        tid: Tid,
        coid: Coid,
        level: u32,
        check_range: bool,
        start_ts: Timestamp,
        cell: Key,
        child_oid: Oid,
    ) -> DtResult<ListAddReply>;

    async fn list_del_range(
        &self,
        tid: Tid,
        coid: Coid,
        level: u32,
        interval_type: IntervalType,
        cell1: Option<Key>,
        cell2: Option<Key>,
    ) -> DtResult<ListDelRangeReply>;

    async fn attr_set(&self, tid: Tid, coid: Coid, level: u32, attrid: usize, attrvalue: u64)
        -> DtResult<AttrSetReply>;

    /// Dispatched once per participant server the transaction touched
    /// (spec §4.2's 2PC step 1).
    async fn prepare(&self, server: &ServerId, req: PrepareRequest) -> DtResult<PrepareReply>;

    /// Dispatched once per participant server (spec §4.2's 2PC step 3).
    async fn commit(&self, server: &ServerId, req: CommitRequest) -> DtResult<CommitReply>;

    async fn sub_trans(&self, server: &ServerId, req: SubTransRequest) -> DtResult<SubTransReply>;

    async fn get_rowid(&self, cid: Cid, hint: Option<u64>) -> DtResult<GetRowidReply>;
}

/// Returns which server a coid's container is owned by, for everything
/// except the 2PC calls (which are addressed explicitly by the caller,
/// since a transaction may span many participants at once).
pub struct RpcMvkvsClient<T: RpcTransport> {
    transport: T,
    descriptor: ClusterDescriptor,
}

impl<T: RpcTransport> RpcMvkvsClient<T> {
    pub fn new(transport: T, descriptor: ClusterDescriptor) -> Self {
        Self { transport, descriptor }
    }

    pub fn descriptor(&self) -> &ClusterDescriptor {
        &self.descriptor
    }

    fn server_for(&self, cid: Cid) -> DtResult<ServerId> {
        if cid.is_ephemeral() {
            return Err(DtError::bad_request(
                "refusing to send an ephemeral coid over the wire",
                cid,
            ));
        }
        self.descriptor.server_for(cid).map(|server| server.clone())
    }

    async fn dispatch(&self, server: &ServerId, call: RpcCall) -> DtResult<RpcReply> {
        let bytes = encode_call(&call)?;
        let reply_bytes = self.transport.call(server, bytes).await?;
        decode_reply(&reply_bytes)
    }
}

/// Map a non-`Ok` status onto a `DtError`; called after every reply before
/// the caller's method returns it, so a stale status never leaks past
/// this layer unchecked.
fn check_status(status: i8) -> DtResult<()> {
    let code = StatusCode::from_i8(status);
    if code == StatusCode::Ok {
        Ok(())
    } else {
        Err(DtError::new(code, format!("rpc returned status {}", status)))
    }
}

macro_rules! dispatch_variant {
    ($self:ident, $server:expr, $call_variant:ident, $req:expr, $reply_variant:ident) => {{
        match $self.dispatch(&$server, RpcCall::$call_variant($req)).await? {
            RpcReply::$reply_variant(reply) => {
                check_status(reply.status)?;
                Ok(reply)
            }
            _ => Err(DtError::internal(concat!(
                "mismatched rpc reply variant for ",
                stringify!($call_variant)
            ))),
        }
    }};
}

#[async_trait]
impl<T: RpcTransport + Send + Sync> MvkvsClient for RpcMvkvsClient<T> {
    async fn read(&self, tid: Tid, start_ts: Timestamp, coid: Coid, len_hint: u32) -> DtResult<ReadReply> {
        let server = self.server_for(coid.cid)?;
        let req = ReadRequest {
            tid,
            start_ts,
            coid,
            len_hint,
        };
        dispatch_variant!(self, server, Read, req, Read)
    }

    async fn write(&self, tid: Tid, coid: Coid, level: u32, bytes: Bytes) -> DtResult<WriteReply> {
        let server = self.server_for(coid.cid)?;
        let req = WriteRequest { tid, coid, level, bytes };
        dispatch_variant!(self, server, Write, req, Write)
    }

    async fn full_read(
        &self,
        tid: Tid,
        start_ts: Timestamp,
        coid: Coid,
        cell: Option<Key>,
    ) -> DtResult<FullReadReply> {
        let server = self.server_for(coid.cid)?;
        let req = FullReadRequest {
            tid,
            start_ts,
            coid,
            cell,
        };
        dispatch_variant!(self, server, FullRead, req, FullRead)
    }

    async fn full_write(&self, tid: Tid, coid: Coid, level: u32, node_bytes: Bytes) -> DtResult<FullWriteReply> {
        let server = self.server_for(coid.cid)?;
        let req = FullWriteRequest {
            tid,
            coid,
            level,
            node_bytes,
        };
        dispatch_variant!(self, server, FullWrite, req, FullWrite)
    }

    async fn list_add(
        &self,
        tid: Tid,
        coid: Coid,
        level: u32,
        check_range: bool,
        start_ts: Timestamp,
        cell: Key,
        child_oid: Oid,
    ) -> DtResult<ListAddReply> {
        let server = self.server_for(coid.cid)?;
        let req = ListAddRequest {
            tid,
            coid,
            level,
            check_range,
            start_ts,
            cell,
            child_oid,
        };
        dispatch_variant!(self, server, ListAdd, req, ListAdd)
    }

    async fn list_del_range(
        &self,
        tid: Tid,
        coid: Coid,
        level: u32,
        interval_type: IntervalType,
        cell1: Option<Key>,
        cell2: Option<Key>,
    ) -> DtResult<ListDelRangeReply> {
        let server = self.server_for(coid.cid)?;
        let req = ListDelRangeRequest {
            tid,
            coid,
            level,
            interval_type,
            cell1,
            cell2,
        };
        dispatch_variant!(self, server, ListDelRange, req, ListDelRange)
    }

    async fn attr_set(
        &self,
        tid: Tid,
        coid: Coid,
        level: u32,
        attrid: usize,
        attrvalue: u64,
    ) -> DtResult<AttrSetReply> {
        let server = self.server_for(coid.cid)?;
        let req = AttrSetRequest {
            tid,
            coid,
            level,
            attrid,
            attrvalue,
        };
        dispatch_variant!(self, server, AttrSet, req, AttrSet)
    }

    async fn prepare(&self, server: &ServerId, req: PrepareRequest) -> DtResult<PrepareReply> {
        dispatch_variant!(self, server.clone(), Prepare, req, Prepare)
    }

    async fn commit(&self, server: &ServerId, req: CommitRequest) -> DtResult<CommitReply> {
        dispatch_variant!(self, server.clone(), Commit, req, Commit)
    }

    async fn sub_trans(&self, server: &ServerId, req: SubTransRequest) -> DtResult<SubTransReply> {
        dispatch_variant!(self, server.clone(), SubTrans, req, SubTrans)
    }

    async fn get_rowid(&self, cid: Cid, hint: Option<u64>) -> DtResult<GetRowidReply> {
        let server = self.server_for(cid)?;
        let req = GetRowidRequest { cid, hint };
        dispatch_variant!(self, server, GetRowid, req, GetRowid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    fn descriptor() -> ClusterDescriptor {
        ClusterDescriptor::parse(
            r#"
            [[servers]]
            cid_start = 0
            cid_end = 1000
            server = "only-server:7000"
            "#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn read_roundtrips_through_mock_transport() {
        let transport = MockTransport::new(|call| match call {
            RpcCall::Read(req) => RpcReply::Read(ReadReply {
                status: StatusCode::Ok.as_i8(),
                read_ts: req.start_ts,
                bytes: Bytes::from_static(b"hello"),
                cache_hints: CacheHints::default(),
            }),
            _ => panic!("unexpected call"),
        });
        let client = RpcMvkvsClient::new(transport, descriptor());

        let coid = Coid::new(Cid::new(1), Oid::from(2));
        let reply = client
            .read(Tid::new(1, 1, 1), Timestamp::set_new(), coid, 128)
            .await
            .unwrap();
        assert_eq!(reply.bytes, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn non_ok_status_becomes_dt_error() {
        let transport = MockTransport::new(|call| match call {
            RpcCall::Read(_) => RpcReply::Read(ReadReply {
                status: StatusCode::TooOld.as_i8(),
                read_ts: Timestamp::set_illegal(),
                bytes: Bytes::new(),
                cache_hints: CacheHints::default(),
            }),
            _ => panic!("unexpected call"),
        });
        let client = RpcMvkvsClient::new(transport, descriptor());

        let coid = Coid::new(Cid::new(1), Oid::from(2));
        let err = client
            .read(Tid::new(1, 1, 1), Timestamp::set_new(), coid, 128)
            .await
            .unwrap_err();
        assert_eq!(err.code(), StatusCode::TooOld);
    }

    #[tokio::test]
    async fn unowned_cid_fails_locally_without_a_round_trip() {
        let transport = MockTransport::new(|_| panic!("should never be called"));
        let client = RpcMvkvsClient::new(transport, descriptor());

        let coid = Coid::new(Cid::new(5000), Oid::from(2));
        let err = client
            .read(Tid::new(1, 1, 1), Timestamp::set_new(), coid, 128)
            .await
            .unwrap_err();
        assert_eq!(err.code(), StatusCode::Generic);
    }

    #[tokio::test]
    async fn ephemeral_coid_is_refused_before_any_transport_call() {
        let transport = MockTransport::new(|_| panic!("should never be called"));
        let client = RpcMvkvsClient::new(transport, descriptor());

        let ephemeral_cid = Cid::new(Cid::EPHEMERAL_BIT | 1);
        let coid = Coid::new(ephemeral_cid, Oid::from(2));
        let err = client
            .read(Tid::new(1, 1, 1), Timestamp::set_new(), coid, 128)
            .await
            .unwrap_err();
        assert_eq!(err.code(), StatusCode::Generic);
    }
}
