//! # World Configuration Module
//!
//! This module owns the bootstrap contract between the launcher and a peer
//! process. A launcher (cluster tooling, container orchestration, or the
//! bundled local launcher) guarantees that every peer starts with its rank,
//! the world size, and the complete peer address table in the environment:
//!
//! - `MPI_RANK`: decimal integer in `[0, size)`
//! - `MPI_SIZE`: decimal integer >= 1
//! - `MPI_ADDRESS_0` .. `MPI_ADDRESS_{size-1}`: `host:port` endpoints
//!
//! Missing or non-parseable values abort initialization with a fatal
//! configuration error. The address table is immutable after parsing and is
//! shared read-only by every other component.

use crate::error::{MeshError, Result};
use std::env;
use std::time::Duration;

/// Environment variable carrying this peer's rank.
pub const ENV_RANK: &str = "MPI_RANK";

/// Environment variable carrying the world size.
pub const ENV_SIZE: &str = "MPI_SIZE";

/// Prefix of the per-rank address entries (`MPI_ADDRESS_<rank>`).
pub const ENV_ADDRESS_PREFIX: &str = "MPI_ADDRESS_";

/// Immutable description of one peer's place in the world.
///
/// Built once at startup, either from the environment ([`WorldConfig::from_env`])
/// or explicitly by a launcher or test harness ([`WorldConfig::new`]). Every
/// other component reads it and nothing mutates it after init.
#[derive(Debug, Clone)]
pub struct WorldConfig {
    /// This peer's rank in `[0, size)`.
    pub rank: usize,
    /// Total number of peers in the world.
    pub size: usize,
    /// Total address table: `addresses[r]` is the `host:port` endpoint of
    /// rank `r`. Identical across all peers.
    pub addresses: Vec<String>,
    /// How long a receive waits for a matching message before reporting
    /// [`MeshError::ReceiveTimedOut`]. Defaults to
    /// [`crate::defaults::RECV_TIMEOUT`]; overridable for tests.
    pub recv_timeout: Duration,
}

impl WorldConfig {
    /// Build a validated configuration from explicit values.
    pub fn new(rank: usize, size: usize, addresses: Vec<String>) -> Result<Self> {
        let config = Self {
            rank,
            size,
            addresses,
            recv_timeout: crate::defaults::RECV_TIMEOUT,
        };
        config.validate()?;
        Ok(config)
    }

    /// Read the bootstrap contract from the environment.
    ///
    /// This is the path taken by `Communicator::init` in launched worlds.
    /// Any missing or malformed entry is a `Config` error, fatal at init.
    pub fn from_env() -> Result<Self> {
        let rank = parse_env_integer(ENV_RANK)?;
        let size = parse_env_integer(ENV_SIZE)?;

        let mut addresses = Vec::with_capacity(size);
        for i in 0..size {
            let key = format!("{ENV_ADDRESS_PREFIX}{i}");
            let addr = env::var(&key)
                .map_err(|_| MeshError::Config(format!("{key} not set")))?;
            if addr.is_empty() {
                return Err(MeshError::Config(format!("{key} is empty")));
            }
            addresses.push(addr);
        }

        Self::new(rank, size, addresses)
    }

    /// The endpoint this peer's RPC server binds to.
    pub fn local_addr(&self) -> &str {
        &self.addresses[self.rank]
    }

    /// The endpoint of peer `rank`.
    pub fn peer_addr(&self, rank: usize) -> &str {
        &self.addresses[rank]
    }

    fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(MeshError::Config("world size must be at least 1".to_string()));
        }
        if self.rank >= self.size {
            return Err(MeshError::Config(format!(
                "rank {} is out of range for world size {}",
                self.rank, self.size
            )));
        }
        if self.addresses.len() != self.size {
            return Err(MeshError::Config(format!(
                "address table has {} entries, expected {}",
                self.addresses.len(),
                self.size
            )));
        }
        for (rank, addr) in self.addresses.iter().enumerate() {
            if !addr.contains(':') {
                return Err(MeshError::Config(format!(
                    "address for rank {rank} is not host:port: {addr:?}"
                )));
            }
        }
        Ok(())
    }
}

fn parse_env_integer(key: &str) -> Result<usize> {
    let raw = env::var(key).map_err(|_| MeshError::Config(format!("{key} not set")))?;
    raw.trim()
        .parse::<usize>()
        .map_err(|e| MeshError::Config(format!("{key} is not a valid integer ({raw:?}): {e}")))
}
