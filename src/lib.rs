//! # mpi-mesh
//!
//! A message-passing runtime for cooperating peer processes launched across
//! a cluster of hosts. Each process is identified by an integer rank in
//! `[0, size)` and talks to the others through point-to-point send/receive
//! and a small set of collective operations (broadcast, reduce, scatter,
//! gather). The transport is a TCP-based RPC mesh, so the same rank-aware
//! program runs identically on a workstation, in containers, or on cloud
//! VMs.
//!
//! ## Data flow
//!
//! ```text
//! user program → collectives / send / recv → codec → transport (RPC out)
//!     → peer transport server → peer mailbox → peer recv → codec → user
//! ```
//!
//! A launcher guarantees every peer comes up with its rank, the world size,
//! and the address table of all peers in the environment;
//! [`Communicator::init`] consumes that contract and
//! [`Communicator::finalize`] tears the world down.

pub mod cli;
pub mod codec;
pub mod collective;
pub mod config;
pub mod error;
pub mod launch;
pub mod mailbox;
pub mod transport;
pub mod world;

pub use codec::{decode, encode, register_type};
pub use collective::{ReduceOp, Reducible, TAG_BROADCAST, TAG_GATHER, TAG_REDUCE, TAG_SCATTER};
pub use config::WorldConfig;
pub use error::{MeshError, Result};
pub use transport::{Message, ANY_SOURCE, ANY_TAG};
pub use world::Communicator;

/// The current version of the runtime.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol constants shared by every peer of a world.
pub mod defaults {
    use std::time::Duration;

    /// How long a receive waits for a matching message.
    pub const RECV_TIMEOUT: Duration = Duration::from_secs(30);

    /// How often a parked receive re-examines the mailbox.
    pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

    /// Smallest tag available to user code; everything below is reserved
    /// for the collectives.
    pub const MIN_USER_TAG: i32 = 10;
}
