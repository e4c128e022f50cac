//! # Transport Module
//!
//! This module hides the RPC plumbing from the higher layers. Each peer
//! runs one RPC server bound to its entry in the address table and keeps a
//! lazily-populated pool of client stubs, one per peer it has sent to.
//!
//! ## Wire protocol
//!
//! The mesh speaks a length-prefixed binary protocol over TCP:
//!
//! ```text
//! ┌────────────┬──────────────────────────────┐
//! │ u32 LE len │ bincode(Request | Response)  │
//! └────────────┴──────────────────────────────┘
//! ```
//!
//! Two RPCs exist on every peer's server:
//!
//! - `Send(Message) -> Ack`: append the message to the mailbox and
//!   acknowledge; never blocks longer than the append.
//! - `Recv(RecvRequest) -> Message`: block until a matching message is
//!   available or the receive timeout elapses.
//!
//! Frames are limited to 50 MiB in both directions so that large scattered
//! buffers fit without the transport becoming an unbounded memory sink.

use crate::error::{MeshError, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub mod client;
pub mod server;

pub use client::{RpcClient, StubPool, TcpStub};
pub use server::RpcServer;

/// Wildcard accepted by the `source` filter of a receive: match any sender.
pub const ANY_SOURCE: i32 = -1;

/// Wildcard accepted by the `tag` filter of a receive: match any tag.
pub const ANY_TAG: i32 = -1;

/// Maximum frame size accepted and produced by the mesh, both directions.
pub const MAX_FRAME_SIZE: usize = 50 * 1024 * 1024;

/// A point-to-point message in flight or parked in a mailbox.
///
/// `source` and `dest` are ranks; `tag` is the 32-bit matching label. The
/// payload is opaque to the transport; the codec layer gives it shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub source: i32,
    pub dest: i32,
    pub tag: i32,
    pub data: Vec<u8>,
}

/// Matching filter carried by a `Recv` RPC. `-1` in either field is the
/// wildcard.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RecvRequest {
    pub source: i32,
    pub tag: i32,
}

/// The two RPCs a peer server accepts.
#[derive(Debug, Serialize, Deserialize)]
pub enum Request {
    Send(Message),
    Recv(RecvRequest),
}

/// Server replies.
#[derive(Debug, Serialize, Deserialize)]
pub enum Response {
    /// `Send` accepted; the message is in the mailbox.
    Ack,
    /// `Recv` matched; here is the message.
    Delivered(Message),
    /// `Recv` found no match within the receive timeout.
    TimedOut,
    /// The server could not process the request.
    Error(String),
}

/// Write one length-prefixed frame.
pub(crate) async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = bincode::serialize(value)
        .map_err(|e| MeshError::Transport(format!("failed to encode frame: {e}")))?;
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(MeshError::Transport(format!(
            "frame of {} bytes exceeds the {} byte limit",
            bytes.len(),
            MAX_FRAME_SIZE
        )));
    }
    writer.write_all(&(bytes.len() as u32).to_le_bytes()).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame.
pub(crate) async fn read_frame<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: serde::de::DeserializeOwned,
{
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(MeshError::Transport(format!(
            "incoming frame of {len} bytes exceeds the {MAX_FRAME_SIZE} byte limit"
        )));
    }
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes).await?;
    bincode::deserialize(&bytes)
        .map_err(|e| MeshError::Transport(format!("failed to decode frame: {e}")))
}

/// Apply the latency-oriented socket options used on every mesh connection.
pub(crate) fn tune_stream(stream: tokio::net::TcpStream) -> Result<tokio::net::TcpStream> {
    let std_stream = stream.into_std()?;
    let socket = socket2::Socket::from(std_stream.try_clone()?);
    socket.set_nodelay(true)?;
    Ok(tokio::net::TcpStream::from_std(std_stream)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let request = Request::Send(Message {
            source: 0,
            dest: 1,
            tag: 10,
            data: vec![1, 2, 3],
        });
        write_frame(&mut a, &request).await.unwrap();

        let decoded: Request = read_frame(&mut b).await.unwrap();
        match decoded {
            Request::Send(msg) => {
                assert_eq!(msg.source, 0);
                assert_eq!(msg.dest, 1);
                assert_eq!(msg.tag, 10);
                assert_eq!(msg.data, vec![1, 2, 3]);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_header_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let len = (MAX_FRAME_SIZE as u32 + 1).to_le_bytes();
        a.write_all(&len).await.unwrap();

        let result: Result<Response> = read_frame(&mut b).await;
        let err = result.unwrap_err();
        assert!(matches!(err, MeshError::Transport(_)));
        assert!(err.to_string().contains("exceeds"));
    }

    #[tokio::test]
    async fn truncated_frame_surfaces_io_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&8u32.to_le_bytes()).await.unwrap();
        a.write_all(&[0u8; 3]).await.unwrap();
        drop(a);

        let result: Result<Response> = read_frame(&mut b).await;
        assert!(result.is_err());
    }
}
