//! Client side of the RPC mesh: one lazily-created stub per peer.
//!
//! A stub owns a single TCP connection to a peer's server. Calls on one
//! stub are serialized by an async mutex around the stream, which is what
//! gives sends from this process to a given peer their FIFO ordering at
//! the transport layer. Stub creation failures are returned to the caller
//! and never cached, so a later send may retry the connection.

use super::{read_frame, tune_stream, write_frame, Request, Response};
use crate::error::{MeshError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::debug;

/// Request/response client over a byte-framed bidirectional transport.
///
/// The mesh ships a TCP implementation ([`TcpStub`]); the trait is the seam
/// where another framed transport could be substituted.
#[async_trait]
pub trait RpcClient: Send + Sync {
    async fn call(&self, request: Request) -> Result<Response>;
}

/// A connected stub to one peer.
#[derive(Debug)]
pub struct TcpStub {
    peer: usize,
    stream: tokio::sync::Mutex<TcpStream>,
}

impl TcpStub {
    /// Connect to a peer's server endpoint.
    pub async fn connect(peer: usize, addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await.map_err(|e| {
            MeshError::Transport(format!("failed to connect to rank {peer} at {addr}: {e}"))
        })?;
        let stream = tune_stream(stream)?;
        debug!("transport: connected stub to rank {} at {}", peer, addr);
        Ok(Self {
            peer,
            stream: tokio::sync::Mutex::new(stream),
        })
    }
}

#[async_trait]
impl RpcClient for TcpStub {
    async fn call(&self, request: Request) -> Result<Response> {
        // One in-flight request per stub; concurrent callers queue here,
        // which preserves per-peer send ordering.
        let mut stream = self.stream.lock().await;
        write_frame(&mut *stream, &request)
            .await
            .map_err(|e| e.annotate(&format!("rpc to rank {}", self.peer)))?;
        read_frame(&mut *stream)
            .await
            .map_err(|e| e.annotate(&format!("rpc to rank {}", self.peer)))
    }
}

/// Lazily-populated map of `rank → stub`.
///
/// Stubs are created on first use, under a mutex, and retained until the
/// pool is closed at finalize. The map is append-only: stubs are never
/// evicted on call failure.
pub struct StubPool {
    addresses: Vec<String>,
    stubs: Mutex<HashMap<usize, Arc<TcpStub>>>,
}

impl StubPool {
    pub fn new(addresses: Vec<String>) -> Self {
        Self {
            addresses,
            stubs: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the stub for `peer`, connecting on first use.
    ///
    /// The pool mutex is never held across the connect; two racing callers
    /// may both dial, in which case the first insertion wins and the loser's
    /// connection is dropped.
    pub async fn stub(&self, peer: usize) -> Result<Arc<TcpStub>> {
        if peer >= self.addresses.len() {
            return Err(MeshError::Contract(format!(
                "rank {peer} is outside the world of size {}",
                self.addresses.len()
            )));
        }
        if let Some(stub) = self.stubs.lock().get(&peer) {
            return Ok(stub.clone());
        }

        let connected = Arc::new(TcpStub::connect(peer, &self.addresses[peer]).await?);
        let mut stubs = self.stubs.lock();
        Ok(stubs.entry(peer).or_insert(connected).clone())
    }

    /// Drop every cached stub, closing the underlying connections.
    pub fn close_all(&self) {
        let mut stubs = self.stubs.lock();
        let count = stubs.len();
        stubs.clear();
        if count > 0 {
            debug!("transport: closed {} outbound stubs", count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_failure_is_not_cached() {
        // Nothing listens on this port; both attempts must dial and fail.
        let pool = StubPool::new(vec!["127.0.0.1:1".to_string()]);
        assert!(pool.stub(0).await.is_err());
        assert!(pool.stub(0).await.is_err());
        assert!(pool.stubs.lock().is_empty());
    }

    #[tokio::test]
    async fn out_of_range_peer_is_a_contract_error() {
        let pool = StubPool::new(vec!["127.0.0.1:1".to_string()]);
        let err = pool.stub(3).await.unwrap_err();
        assert!(matches!(err, MeshError::Contract(_)));
    }
}
