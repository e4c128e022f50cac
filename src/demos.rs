//! Rank-aware demo programs run by the worker side of the binary.
//!
//! Each demo is an ordinary user program written against the public API:
//! it validates its own result and fails the process (non-zero exit) on
//! any mismatch, which is what the launcher's run report keys off.

use anyhow::{bail, Result};
use mpi_mesh::{Communicator, ReduceOp};
use tracing::info;

const RING_TAG: i32 = 10;

/// Broadcast an array from rank 0, sum chunks locally, reduce the partial
/// sums back at rank 0.
pub async fn array_sum(world: &Communicator) -> Result<()> {
    let rank = world.rank();
    let size = world.size();
    let chunk = 25usize;
    let n = chunk * size;

    let mut array: Vec<i64> = if rank == 0 {
        (1..=n as i64).collect()
    } else {
        vec![0; n]
    };
    world.broadcast(&mut array, 0).await?;

    let partial: i64 = array[rank * chunk..(rank + 1) * chunk].iter().sum();
    let mut total = 0i64;
    world.reduce(&partial, &mut total, ReduceOp::Sum, 0).await?;

    if rank == 0 {
        let expected = (n as i64) * (n as i64 + 1) / 2;
        if total != expected {
            bail!("array-sum: got {total}, expected {expected}");
        }
        info!("array-sum: total = {} over {} ranks", total, size);
    }
    Ok(())
}

/// Every rank sends "hello" to its right neighbor and receives one
/// greeting from its left neighbor.
pub async fn ring(world: &Communicator) -> Result<()> {
    let rank = world.rank();
    let size = world.size();
    let right = (rank + 1) % size;
    let left = (rank + size - 1) % size;

    world.send(b"hello", right, RING_TAG).await?;
    let greeting = world.recv(left as i32, RING_TAG).await?;
    if greeting != b"hello" {
        bail!("ring: rank {rank} received unexpected payload {greeting:?}");
    }
    info!("ring: rank {} heard from rank {}", rank, left);
    Ok(())
}

/// Scatter a buffer from rank 0, gather it back, verify the round trip.
pub async fn scatter_gather(world: &Communicator) -> Result<()> {
    let rank = world.rank();
    let size = world.size();
    let count = 2usize;

    let send: Vec<f64> = if rank == 0 {
        (1..=(count * size) as u32).map(f64::from).collect()
    } else {
        vec![0.0; count * size]
    };
    let mut chunk = vec![0.0f64; count];
    world.scatter(&send, &mut chunk, count, 0).await?;

    let base = (rank * count) as f64;
    if chunk != [base + 1.0, base + 2.0] {
        bail!("scatter-gather: rank {rank} holds {chunk:?}");
    }

    let mut gathered = vec![0.0f64; count * size];
    world.gather(&chunk, &mut gathered, count, 0).await?;
    if rank == 0 && gathered != send {
        bail!("scatter-gather: gathered {gathered:?}, expected {send:?}");
    }
    info!("scatter-gather: rank {} verified its chunk", rank);
    Ok(())
}

/// Distributed matrix multiply: scatter rows of A, broadcast B, gather C.
pub async fn matmul(world: &Communicator) -> Result<()> {
    let rank = world.rank();
    let size = world.size();
    let n = 2 * size; // square matrices, two rows per rank
    let rows_per_rank = n / size;

    let a: Vec<f64> = if rank == 0 {
        (0..n * n).map(|i| (i % 7) as f64 + 1.0).collect()
    } else {
        vec![0.0; n * n]
    };
    let mut b: Vec<f64> = if rank == 0 {
        (0..n * n).map(|i| (i % 5) as f64 - 2.0).collect()
    } else {
        vec![0.0; n * n]
    };

    let count = rows_per_rank * n;
    let mut my_rows = vec![0.0f64; count];
    world.scatter(&a, &mut my_rows, count, 0).await?;
    world.broadcast(&mut b, 0).await?;

    let mut my_result = vec![0.0f64; count];
    for row in 0..rows_per_rank {
        for col in 0..n {
            let mut acc = 0.0;
            for k in 0..n {
                acc += my_rows[row * n + k] * b[k * n + col];
            }
            my_result[row * n + col] = acc;
        }
    }

    let mut c = vec![0.0f64; n * n];
    world.gather(&my_result, &mut c, count, 0).await?;

    if rank == 0 {
        for row in 0..n {
            for col in 0..n {
                let mut expected = 0.0;
                for k in 0..n {
                    expected += a[row * n + k] * b[k * n + col];
                }
                let got = c[row * n + col];
                if (got - expected).abs() > 1e-9 {
                    bail!("matmul: C[{row}][{col}] = {got}, expected {expected}");
                }
            }
        }
        info!("matmul: {}x{} product verified across {} ranks", n, n, size);
    }
    Ok(())
}
