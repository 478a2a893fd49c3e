//! A minimal length-prefixed `RpcTransport` over TCP, so `dtree-inspect`
//! has something to actually dial. Framing and retry policy are out of
//! scope for the rest of this workspace (the wire transport's own
//! concerns, per the cluster descriptor's `server` strings being bare
//! `host:port` pairs); this is the smallest thing that can carry a
//! `bincode`-encoded envelope to a listener and back, not a general
//! transport implementation.

use async_trait::async_trait;
use dtree_client::{RpcTransport, ServerId};
use dtree_error::{DtError, DtResult};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub struct TcpTransport;

#[async_trait]
impl RpcTransport for TcpTransport {
    async fn call(&self, server: &ServerId, request: Vec<u8>) -> DtResult<Vec<u8>> {
        let mut stream = TcpStream::connect(&server.0)
            .await
            .map_err(|e| DtError::server_timeout(format!("failed to connect to {}: {}", server, e)))?;

        let len = u32::try_from(request.len())
            .map_err(|_| DtError::generic("rpc request too large to frame"))?;
        stream
            .write_all(&len.to_be_bytes())
            .await
            .map_err(|e| DtError::server_timeout(format!("write to {}: {}", server, e)))?;
        stream
            .write_all(&request)
            .await
            .map_err(|e| DtError::server_timeout(format!("write to {}: {}", server, e)))?;

        let mut len_buf = [0u8; 4];
        stream
            .read_exact(&mut len_buf)
            .await
            .map_err(|e| DtError::server_timeout(format!("read from {}: {}", server, e)))?;
        let reply_len = u32::from_be_bytes(len_buf) as usize;

        let mut reply = vec![0u8; reply_len];
        stream
            .read_exact(&mut reply)
            .await
            .map_err(|e| DtError::server_timeout(format!("read from {}: {}", server, e)))?;

        Ok(reply)
    }
}
