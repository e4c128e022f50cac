//! Server side of the RPC mesh.
//!
//! Each peer binds one server to its own entry in the address table. The
//! accept loop runs as a background task; every accepted connection gets
//! its own handler task that reads request frames and answers them against
//! the local mailbox:
//!
//! - `Send` appends to the mailbox and acknowledges immediately.
//! - `Recv` blocks (up to the receive timeout) until the mailbox produces
//!   a match.
//!
//! Shutdown is graceful in the order finalize needs: the shutdown signal
//! stops the accept loop, handlers finish the request they are answering,
//! and the accept task drains them before exiting. A handler blocked in a
//! mailbox wait is unblocked by the mailbox being closed first.

use super::{read_frame, tune_stream, write_frame, Request, Response};
use crate::error::{MeshError, Result};
use crate::mailbox::Mailbox;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error};

/// The per-peer RPC server. Owns the listening endpoint for its lifetime.
pub struct RpcServer {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl RpcServer {
    /// Bind the listen endpoint and start accepting connections.
    ///
    /// Returns once the listener is live, so a peer that observed `bind`
    /// complete is reachable by the rest of the world. Bind failure is a
    /// fatal configuration error.
    pub async fn bind(
        addr: &str,
        mailbox: Arc<Mailbox>,
        recv_timeout: Duration,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            MeshError::Config(format!("failed to bind listen endpoint {addr}: {e}"))
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| MeshError::Config(format!("listen endpoint has no address: {e}")))?;
        debug!("transport: server listening on {}", local_addr);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(listener, mailbox, recv_timeout, shutdown_rx));

        Ok(Self {
            local_addr,
            shutdown,
            accept_task,
        })
    }

    /// The bound address, useful when the configured port was 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting RPCs, drain in-flight handlers, and return.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.accept_task.await {
            error!("transport: accept task ended abnormally: {}", e);
        }
        debug!("transport: server on {} stopped", self.local_addr);
    }
}

async fn accept_loop(
    listener: TcpListener,
    mailbox: Arc<Mailbox>,
    recv_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut handlers = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    debug!("transport: accepted connection from {}", peer_addr);
                    let stream = match tune_stream(stream) {
                        Ok(stream) => stream,
                        Err(e) => {
                            error!("transport: failed to configure socket from {}: {}", peer_addr, e);
                            continue;
                        }
                    };
                    handlers.spawn(handle_connection(
                        stream,
                        mailbox.clone(),
                        recv_timeout,
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    error!("transport: accept failed: {}", e);
                    break;
                }
            },
        }
    }

    // The listener closes here; no new Send RPCs are admitted. In-flight
    // handlers answer their current request before exiting.
    drop(listener);
    while handlers.join_next().await.is_some() {}
}

async fn handle_connection(
    mut stream: TcpStream,
    mailbox: Arc<Mailbox>,
    recv_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let request = tokio::select! {
            _ = shutdown.changed() => break,
            read = read_frame::<_, Request>(&mut stream) => match read {
                Ok(request) => request,
                Err(e) => {
                    // Peer closed the connection or sent garbage; either
                    // way this handler is done.
                    debug!("transport: connection closed: {}", e);
                    break;
                }
            },
        };

        let response = dispatch(request, &mailbox, recv_timeout).await;
        if let Err(e) = write_frame(&mut stream, &response).await {
            debug!("transport: failed to write response: {}", e);
            break;
        }
    }
}

async fn dispatch(request: Request, mailbox: &Mailbox, recv_timeout: Duration) -> Response {
    match request {
        Request::Send(message) => {
            mailbox.push(message);
            Response::Ack
        }
        Request::Recv(filter) => {
            match mailbox.recv(filter.source, filter.tag, recv_timeout).await {
                Ok(message) => Response::Delivered(message),
                Err(MeshError::ReceiveTimedOut) => Response::TimedOut,
                Err(e) => Response::Error(e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Message, RecvRequest, RpcClient, TcpStub};

    fn message(source: i32, tag: i32, data: &[u8]) -> Message {
        Message {
            source,
            dest: 0,
            tag,
            data: data.to_vec(),
        }
    }

    #[tokio::test]
    async fn send_rpc_lands_in_the_mailbox() {
        let mailbox = Arc::new(Mailbox::new());
        let server = RpcServer::bind("127.0.0.1:0", mailbox.clone(), Duration::from_secs(1))
            .await
            .unwrap();

        let stub = TcpStub::connect(0, &server.local_addr().to_string())
            .await
            .unwrap();
        let response = stub
            .call(Request::Send(message(3, 42, b"payload")))
            .await
            .unwrap();
        assert!(matches!(response, Response::Ack));

        let parked = mailbox.try_match(3, 42).unwrap();
        assert_eq!(parked.data, b"payload");

        server.stop().await;
    }

    #[tokio::test]
    async fn recv_rpc_delivers_a_matching_message() {
        let mailbox = Arc::new(Mailbox::new());
        let server = RpcServer::bind("127.0.0.1:0", mailbox.clone(), Duration::from_secs(5))
            .await
            .unwrap();
        mailbox.push(message(1, 7, b"ready"));

        let stub = TcpStub::connect(0, &server.local_addr().to_string())
            .await
            .unwrap();
        let response = stub
            .call(Request::Recv(RecvRequest { source: 1, tag: 7 }))
            .await
            .unwrap();
        match response {
            Response::Delivered(delivered) => assert_eq!(delivered.data, b"ready"),
            other => panic!("unexpected response: {other:?}"),
        }

        server.stop().await;
    }

    #[tokio::test]
    async fn recv_rpc_reports_timeout() {
        let mailbox = Arc::new(Mailbox::new());
        let server = RpcServer::bind("127.0.0.1:0", mailbox.clone(), Duration::from_millis(300))
            .await
            .unwrap();

        let stub = TcpStub::connect(0, &server.local_addr().to_string())
            .await
            .unwrap();
        let response = stub
            .call(Request::Recv(RecvRequest { source: 9, tag: 9 }))
            .await
            .unwrap();
        assert!(matches!(response, Response::TimedOut));

        server.stop().await;
    }

    #[tokio::test]
    async fn stopped_server_refuses_new_connections() {
        let mailbox = Arc::new(Mailbox::new());
        let server = RpcServer::bind("127.0.0.1:0", mailbox.clone(), Duration::from_secs(1))
            .await
            .unwrap();
        let addr = server.local_addr().to_string();

        mailbox.close();
        server.stop().await;

        // The endpoint is gone; either the dial or the first call fails.
        let outcome = match TcpStub::connect(0, &addr).await {
            Ok(stub) => stub.call(Request::Send(message(0, 10, b"late"))).await,
            Err(e) => Err(e),
        };
        assert!(outcome.is_err());
    }
}
