#![allow(dead_code)]

//! Shared helpers for standing up multi-rank worlds inside one test
//! process. Every rank gets its own `Communicator` bound to a reserved
//! loopback port, which is exactly what the runtime-value design exists
//! to make possible.

use mpi_mesh::{Communicator, WorldConfig};
use std::net::TcpListener;
use std::time::Duration;

/// Discover `n` free loopback endpoints by binding ephemeral ports and
/// releasing them for the world to rebind.
pub fn reserve_loopback_addrs(n: usize) -> Vec<String> {
    let listeners: Vec<TcpListener> = (0..n)
        .map(|_| TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port"))
        .collect();
    listeners
        .iter()
        .map(|l| l.local_addr().expect("local addr").to_string())
        .collect()
}

/// Stand up an `n`-rank world with the default receive timeout.
pub async fn spawn_world(n: usize) -> Vec<Communicator> {
    spawn_world_with_timeout(n, mpi_mesh::defaults::RECV_TIMEOUT).await
}

/// Stand up an `n`-rank world with a custom receive timeout.
pub async fn spawn_world_with_timeout(n: usize, recv_timeout: Duration) -> Vec<Communicator> {
    let addresses = reserve_loopback_addrs(n);
    let mut worlds = Vec::with_capacity(n);
    for rank in 0..n {
        let mut config = WorldConfig::new(rank, n, addresses.clone()).expect("valid config");
        config.recv_timeout = recv_timeout;
        worlds.push(
            Communicator::with_config(config)
                .await
                .expect("world init"),
        );
    }
    worlds
}

/// Tear down every rank of a test world.
pub async fn finalize_world(worlds: &[Communicator]) {
    for world in worlds {
        world.finalize().await;
    }
}
