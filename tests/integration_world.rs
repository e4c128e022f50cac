//! World lifecycle: environment-driven init, finalize semantics, and the
//! behavior of receives caught by a shutdown.

mod common;

use common::{finalize_world, reserve_loopback_addrs, spawn_world_with_timeout};
use mpi_mesh::config::{ENV_ADDRESS_PREFIX, ENV_RANK, ENV_SIZE};
use mpi_mesh::{Communicator, MeshError};
use std::time::Duration;

/// A single-rank world initializes from the environment exactly the way a
/// launched worker does.
///
/// This is the only test in the suite that mutates the process
/// environment, so it lives alone with a cleanup at the end.
#[tokio::test]
async fn init_from_environment() {
    let addresses = reserve_loopback_addrs(1);
    std::env::set_var(ENV_RANK, "0");
    std::env::set_var(ENV_SIZE, "1");
    std::env::set_var(format!("{ENV_ADDRESS_PREFIX}0"), &addresses[0]);

    let world = Communicator::init().await.unwrap();
    assert_eq!(world.rank(), 0);
    assert_eq!(world.size(), 1);

    world.send(b"self", 0, 10).await.unwrap();
    assert_eq!(world.recv(0, 10).await.unwrap(), b"self");

    world.finalize().await;
    std::env::remove_var(ENV_RANK);
    std::env::remove_var(ENV_SIZE);
    std::env::remove_var(format!("{ENV_ADDRESS_PREFIX}0"));
}

/// A receive parked at finalize observes the shutdown as a transport
/// error, not a timeout.
#[tokio::test]
async fn finalize_aborts_parked_recv() {
    let worlds = spawn_world_with_timeout(2, Duration::from_secs(30)).await;

    let receiver = worlds[0].clone();
    let parked = tokio::spawn(async move { receiver.recv(1, 50).await });

    tokio::time::sleep(Duration::from_millis(300)).await;
    worlds[0].finalize().await;

    let err = parked.await.unwrap().unwrap_err();
    assert!(matches!(err, MeshError::Transport(_)));

    finalize_world(&worlds).await;
}

/// Sending to a finalized peer surfaces a transport error at the sender.
#[tokio::test]
async fn send_to_departed_peer_is_a_transport_error() {
    let worlds = spawn_world_with_timeout(2, Duration::from_secs(2)).await;

    worlds[1].finalize().await;
    let err = worlds[0].send(b"anyone there", 1, 10).await.unwrap_err();
    assert!(matches!(err, MeshError::Transport(_)));

    finalize_world(&worlds).await;
}

/// After finalize the world is torn down; a fresh world on fresh ports
/// starts from an empty mailbox.
#[tokio::test]
async fn no_state_crosses_worlds() {
    let first = spawn_world_with_timeout(2, Duration::from_millis(400)).await;
    first[0].send(b"stale", 1, 10).await.unwrap();
    finalize_world(&first).await;

    let second = spawn_world_with_timeout(2, Duration::from_millis(400)).await;
    let err = second[1].recv(0, 10).await.unwrap_err();
    assert!(matches!(err, MeshError::ReceiveTimedOut));
    finalize_world(&second).await;
}
