//! # World State and Point-to-Point API
//!
//! A [`Communicator`] is the runtime value behind the whole API: it owns
//! the world description, the mailbox, the RPC server, and the outbound
//! stub pool. `init` creates it from the environment; `finalize` tears it
//! down. The contract is one world per process, although the type itself
//! is an ordinary value, which is what lets the integration tests stand
//! up several ranks of a world inside one process.
//!
//! Cloning a `Communicator` is cheap and shares the underlying world, so
//! concurrent tasks of the same peer may send and receive at the same
//! time. Receives are answered from the local mailbox directly; the
//! server's `Recv` RPC exists for remote callers, the local API does not
//! loop through it.

use crate::config::WorldConfig;
use crate::defaults::MIN_USER_TAG;
use crate::error::{MeshError, Result};
use crate::mailbox::Mailbox;
use crate::transport::{Message, Request, Response, RpcClient, RpcServer, StubPool};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// Handle to this peer's world: rank topology, mailbox, server, stubs.
#[derive(Clone)]
pub struct Communicator {
    inner: Arc<Inner>,
}

struct Inner {
    config: WorldConfig,
    mailbox: Arc<Mailbox>,
    stubs: StubPool,
    server: Mutex<Option<RpcServer>>,
}

impl Communicator {
    /// Initialize the world from the launcher-provided environment.
    ///
    /// Parses `MPI_RANK`, `MPI_SIZE`, and the `MPI_ADDRESS_i` table, starts
    /// the RPC server, and returns once the server is accepting
    /// connections. Call once per process and pair with [`finalize`].
    ///
    /// [`finalize`]: Communicator::finalize
    pub async fn init() -> Result<Self> {
        Self::with_config(WorldConfig::from_env()?).await
    }

    /// Initialize the world from an explicit configuration.
    ///
    /// Same lifecycle as [`Communicator::init`]; used by launchers and by
    /// tests that assemble multi-rank worlds in one process.
    pub async fn with_config(config: WorldConfig) -> Result<Self> {
        let mailbox = Arc::new(Mailbox::new());
        let server = RpcServer::bind(
            config.local_addr(),
            mailbox.clone(),
            config.recv_timeout,
        )
        .await?;
        info!(
            "world: rank {} of {} up, listening on {}",
            config.rank,
            config.size,
            server.local_addr()
        );

        let stubs = StubPool::new(config.addresses.clone());
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                mailbox,
                stubs,
                server: Mutex::new(Some(server)),
            }),
        })
    }

    /// This peer's rank in `[0, size)`. Constant after init.
    pub fn rank(&self) -> usize {
        self.inner.config.rank
    }

    /// The world size. Constant after init.
    pub fn size(&self) -> usize {
        self.inner.config.size
    }

    /// Tear the world down: stop accepting RPCs, drain in-flight handlers,
    /// close outbound stubs, and release unmatched messages. Idempotent.
    ///
    /// Any receive still parked when finalize runs observes the shutdown
    /// as a transport error.
    pub async fn finalize(&self) {
        let server = self.inner.server.lock().take();
        if let Some(server) = server {
            // Close the mailbox first so handlers blocked in a receive
            // unblock and can be drained.
            self.inner.mailbox.close();
            server.stop().await;
            self.inner.stubs.close_all();
            info!("world: rank {} finalized", self.rank());
        }
    }

    /// Send raw bytes to `dest` with a user tag.
    ///
    /// User tags must be `>= 10`; the smaller tags are reserved for the
    /// collectives. Returns when the destination has acknowledged the
    /// message into its mailbox, or with a transport error.
    pub async fn send(&self, data: &[u8], dest: usize, tag: i32) -> Result<()> {
        if tag < MIN_USER_TAG {
            return Err(MeshError::Contract(format!(
                "tag {tag} is reserved; user tags start at {MIN_USER_TAG}"
            )));
        }
        self.send_with_tag(data, dest, tag).await
    }

    /// Receive raw bytes matching `(source, tag)`.
    ///
    /// Both filters accept [`crate::ANY_SOURCE`] / [`crate::ANY_TAG`].
    /// Waits up to the configured receive timeout and then returns
    /// [`MeshError::ReceiveTimedOut`].
    pub async fn recv(&self, source: i32, tag: i32) -> Result<Vec<u8>> {
        if tag != crate::ANY_TAG && tag < MIN_USER_TAG {
            return Err(MeshError::Contract(format!(
                "tag {tag} is reserved; user receives use tags >= {MIN_USER_TAG} or the wildcard"
            )));
        }
        self.recv_with_tag(source, tag).await
    }

    /// Internal send path shared with the collectives (reserved tags
    /// allowed).
    pub(crate) async fn send_with_tag(&self, data: &[u8], dest: usize, tag: i32) -> Result<()> {
        if dest >= self.size() {
            return Err(MeshError::Contract(format!(
                "destination rank {dest} is outside the world of size {}",
                self.size()
            )));
        }
        if self.inner.server.lock().is_none() {
            return Err(MeshError::Transport(
                "world is finalized; no sends are possible".to_string(),
            ));
        }
        let message = Message {
            source: self.rank() as i32,
            dest: dest as i32,
            tag,
            data: data.to_vec(),
        };

        if dest == self.rank() {
            // Self-sends skip the wire and append directly.
            self.inner.mailbox.push(message);
            return Ok(());
        }

        debug!(
            "world: rank {} sending {} bytes to rank {} with tag {}",
            self.rank(),
            message.data.len(),
            dest,
            tag
        );
        let stub = self.inner.stubs.stub(dest).await?;
        match stub.call(Request::Send(message)).await? {
            Response::Ack => Ok(()),
            Response::Error(detail) => Err(MeshError::Transport(format!(
                "rank {dest} rejected the send: {detail}"
            ))),
            other => Err(MeshError::Transport(format!(
                "unexpected response to send from rank {dest}: {other:?}"
            ))),
        }
    }

    /// Internal receive path shared with the collectives (reserved tags
    /// allowed).
    ///
    /// A source filter that names no live sender is not an error: nothing
    /// ever matches it and the receive times out.
    pub(crate) async fn recv_with_tag(&self, source: i32, tag: i32) -> Result<Vec<u8>> {
        let message = self
            .inner
            .mailbox
            .recv(source, tag, self.inner.config.recv_timeout)
            .await?;
        Ok(message.data)
    }
}
