//! # Collective Operations
//!
//! Broadcast, reduce, scatter, and gather, layered over the point-to-point
//! primitives. All collectives are synchronous and blocking, involve every
//! rank of the world, and run over reserved tags so they cannot collide
//! with user traffic or with each other. Omitting a peer deadlocks the
//! collective until the receive timeout fires.
//!
//! The baseline algorithms are linear in world size, exactly as the
//! operation contracts allow: the root emits (or collects) one message per
//! peer, in ascending rank order. Reduction requires a commutative,
//! associative operator, so the rank-ascending fold is semantically
//! interchangeable with any other order.
//!
//! Size contracts (`count * size` partitioning, buffer capacities) and
//! element-type mismatches are user errors reported as contract violations
//! at the call site; a failure at one rank leaves the world inconsistent
//! and no recovery is attempted.

use crate::codec;
use crate::error::{MeshError, Result};
use crate::world::Communicator;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::type_name;
use tracing::debug;

/// Reserved tag for [`Communicator::broadcast`].
pub const TAG_BROADCAST: i32 = 0;

/// Reserved tag for [`Communicator::reduce`].
pub const TAG_REDUCE: i32 = 1;

/// Reserved tag for [`Communicator::scatter`].
pub const TAG_SCATTER: i32 = 2;

/// Reserved tag for [`Communicator::gather`].
pub const TAG_GATHER: i32 = 3;

/// Built-in reduction operators.
///
/// All four are commutative and associative over every [`Reducible`]
/// element type, which is what allows the runtime to fold contributions in
/// rank order without changing the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Product,
    Min,
    Max,
}

/// Element types the built-in reduction operators understand.
///
/// The set is closed: signed integers and floats. A reduction over any
/// other type, or a world where ranks contribute different concrete types,
/// fails fast with a contract error.
pub trait Reducible: Serialize + DeserializeOwned + Clone + Send + Sync {
    fn combine(op: ReduceOp, a: Self, b: Self) -> Self;
}

macro_rules! impl_reducible {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Reducible for $ty {
                fn combine(op: ReduceOp, a: Self, b: Self) -> Self {
                    match op {
                        ReduceOp::Sum => a + b,
                        ReduceOp::Product => a * b,
                        ReduceOp::Min => a.min(b),
                        ReduceOp::Max => a.max(b),
                    }
                }
            }
        )+
    };
}

impl_reducible!(i8, i16, i32, i64, f32, f64);

impl Communicator {
    /// Broadcast `value` from `root` to every rank.
    ///
    /// At the root the value is serialized once and sent to every other
    /// rank; everywhere else the caller's `value` is overwritten with the
    /// root's. After the call every rank observes the same value.
    pub async fn broadcast<T>(&self, value: &mut T, root: usize) -> Result<()>
    where
        T: Serialize + DeserializeOwned,
    {
        self.check_root(root)?;
        let rank = self.rank();
        if rank == root {
            let payload = codec::encode(value)
                .map_err(|e| e.annotate(&format!("broadcast at root {root}")))?;
            for peer in 0..self.size() {
                if peer == root {
                    continue;
                }
                self.send_with_tag(&payload, peer, TAG_BROADCAST)
                    .await
                    .map_err(|e| e.annotate(&format!("broadcast from root {root} to rank {peer}")))?;
            }
        } else {
            let payload = self
                .recv_with_tag(root as i32, TAG_BROADCAST)
                .await
                .map_err(|e| e.annotate(&format!("broadcast at rank {rank}")))?;
            codec::decode(&payload, value)
                .map_err(|e| e.annotate(&format!("broadcast at rank {rank}")))?;
        }
        debug!("collective: broadcast complete at rank {}", rank);
        Ok(())
    }

    /// Reduce one contribution per rank into `out` at `root`.
    ///
    /// Every rank contributes `value`; at the root the contributions are
    /// folded into `out` in ascending rank order with `op`. Only the
    /// root's `out` is meaningful after the call. All ranks must
    /// contribute the same concrete element type.
    pub async fn reduce<T>(&self, value: &T, out: &mut T, op: ReduceOp, root: usize) -> Result<()>
    where
        T: Reducible,
    {
        self.check_root(root)?;
        let rank = self.rank();
        if rank != root {
            let payload = codec::encode(value)
                .map_err(|e| e.annotate(&format!("reduce at rank {rank}")))?;
            self.send_with_tag(&payload, root, TAG_REDUCE)
                .await
                .map_err(|e| e.annotate(&format!("reduce at rank {rank}")))?;
            return Ok(());
        }

        *out = value.clone();
        for peer in 0..self.size() {
            if peer == root {
                continue;
            }
            let payload = self
                .recv_with_tag(peer as i32, TAG_REDUCE)
                .await
                .map_err(|e| e.annotate(&format!("reduce at root, contribution of rank {peer}")))?;
            let mut contribution = value.clone();
            decode_same_type(&payload, &mut contribution)
                .map_err(|e| e.annotate(&format!("reduce at root, contribution of rank {peer}")))?;
            *out = T::combine(op, out.clone(), contribution);
        }
        debug!(
            "collective: reduce complete at root {} over {} ranks",
            root,
            self.size()
        );
        Ok(())
    }

    /// Partition `send` at `root` into equal chunks of `count` elements and
    /// deliver chunk `i` to rank `i`'s `recv` buffer.
    ///
    /// `send` must hold exactly `count * size` elements at the root and is
    /// ignored elsewhere; `recv` must hold exactly `count` elements on
    /// every rank.
    pub async fn scatter<T>(
        &self,
        send: &[T],
        recv: &mut [T],
        count: usize,
        root: usize,
    ) -> Result<()>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        self.check_root(root)?;
        check_chunk_len("scatter", "receive", recv.len(), count)?;
        let rank = self.rank();

        if rank == root {
            check_partition_len("scatter", "send", send.len(), count, self.size())?;
            for peer in 0..self.size() {
                let chunk = send[peer * count..(peer + 1) * count].to_vec();
                if peer == root {
                    recv.clone_from_slice(&chunk);
                    continue;
                }
                let payload = codec::encode(&chunk)
                    .map_err(|e| e.annotate(&format!("scatter at root {root}")))?;
                self.send_with_tag(&payload, peer, TAG_SCATTER)
                    .await
                    .map_err(|e| e.annotate(&format!("scatter from root {root} to rank {peer}")))?;
            }
        } else {
            let payload = self
                .recv_with_tag(root as i32, TAG_SCATTER)
                .await
                .map_err(|e| e.annotate(&format!("scatter at rank {rank}")))?;
            let mut chunk: Vec<T> = recv.to_vec();
            codec::decode(&payload, &mut chunk)
                .map_err(|e| e.annotate(&format!("scatter at rank {rank}")))?;
            check_chunk_len("scatter", "received", chunk.len(), count)?;
            recv.clone_from_slice(&chunk);
        }
        debug!("collective: scatter complete at rank {}", rank);
        Ok(())
    }

    /// Collect `count` elements from every rank's `send` buffer into
    /// `recv` at `root`, ordered by ascending rank.
    ///
    /// Symmetric to [`Communicator::scatter`]: `send` must hold `count`
    /// elements everywhere; `recv` must hold `count * size` at the root and
    /// is ignored elsewhere.
    pub async fn gather<T>(
        &self,
        send: &[T],
        recv: &mut [T],
        count: usize,
        root: usize,
    ) -> Result<()>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        self.check_root(root)?;
        check_chunk_len("gather", "send", send.len(), count)?;
        let rank = self.rank();

        if rank != root {
            let chunk: Vec<T> = send.to_vec();
            let payload = codec::encode(&chunk)
                .map_err(|e| e.annotate(&format!("gather at rank {rank}")))?;
            self.send_with_tag(&payload, root, TAG_GATHER)
                .await
                .map_err(|e| e.annotate(&format!("gather at rank {rank}")))?;
            return Ok(());
        }

        check_partition_len("gather", "receive", recv.len(), count, self.size())?;
        recv[root * count..(root + 1) * count].clone_from_slice(send);
        for peer in 0..self.size() {
            if peer == root {
                continue;
            }
            let payload = self
                .recv_with_tag(peer as i32, TAG_GATHER)
                .await
                .map_err(|e| e.annotate(&format!("gather at root, chunk of rank {peer}")))?;
            let mut chunk: Vec<T> = send.to_vec();
            codec::decode(&payload, &mut chunk)
                .map_err(|e| e.annotate(&format!("gather at root, chunk of rank {peer}")))?;
            check_chunk_len("gather", "received", chunk.len(), count)?;
            recv[peer * count..(peer + 1) * count].clone_from_slice(&chunk);
        }
        debug!(
            "collective: gather complete at root {} over {} ranks",
            root,
            self.size()
        );
        Ok(())
    }

    fn check_root(&self, root: usize) -> Result<()> {
        if root >= self.size() {
            return Err(MeshError::Contract(format!(
                "root rank {root} is outside the world of size {}",
                self.size()
            )));
        }
        Ok(())
    }
}

/// Decode a reduce contribution, insisting on the exact element type the
/// root is reducing. A differently-typed contribution is a contract
/// violation, not a codec mishap.
fn decode_same_type<T: DeserializeOwned>(payload: &[u8], target: &mut T) -> Result<()> {
    let wire_tag = codec::wire_type_tag(payload)?;
    let expected = type_name::<T>();
    if wire_tag != expected {
        return Err(MeshError::Contract(format!(
            "mixed-type reduction: contribution is {wire_tag}, root reduces {expected}"
        )));
    }
    codec::decode(payload, target)
}

fn check_chunk_len(collective: &str, buffer: &str, actual: usize, count: usize) -> Result<()> {
    if actual != count {
        return Err(MeshError::Contract(format!(
            "{collective}: {buffer} buffer holds {actual} elements, expected count {count}"
        )));
    }
    Ok(())
}

fn check_partition_len(
    collective: &str,
    buffer: &str,
    actual: usize,
    count: usize,
    size: usize,
) -> Result<()> {
    if actual != count * size {
        return Err(MeshError::Contract(format!(
            "{collective}: {buffer} buffer holds {actual} elements, \
             expected count {count} x world size {size} = {}",
            count * size
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorldConfig;

    #[test]
    fn combine_applies_each_operator() {
        assert_eq!(i64::combine(ReduceOp::Sum, 3, 4), 7);
        assert_eq!(i64::combine(ReduceOp::Product, 3, 4), 12);
        assert_eq!(i64::combine(ReduceOp::Min, 3, 4), 3);
        assert_eq!(i64::combine(ReduceOp::Max, 3, 4), 4);
        assert_eq!(f64::combine(ReduceOp::Sum, 0.5, 0.25), 0.75);
        assert_eq!(f32::combine(ReduceOp::Min, -1.5, 2.0), -1.5);
    }

    #[test]
    fn mixed_type_contribution_is_a_contract_error() {
        let payload = codec::encode(&1.5f64).unwrap();
        let mut target = 0i64;
        let err = decode_same_type(&payload, &mut target).unwrap_err();
        assert!(matches!(err, MeshError::Contract(_)));
        assert!(err.to_string().contains("mixed-type"));
    }

    #[tokio::test]
    async fn single_rank_collectives_are_local() {
        let config = WorldConfig::new(0, 1, vec!["127.0.0.1:0".to_string()]).unwrap();
        let world = Communicator::with_config(config).await.unwrap();

        let mut value = 41i64;
        world.broadcast(&mut value, 0).await.unwrap();
        assert_eq!(value, 41);

        let mut out = 0i64;
        world.reduce(&7i64, &mut out, ReduceOp::Sum, 0).await.unwrap();
        assert_eq!(out, 7);

        let send = vec![1.0f64, 2.0];
        let mut recv = vec![0.0f64; 2];
        world.scatter(&send, &mut recv, 2, 0).await.unwrap();
        assert_eq!(recv, send);

        let mut gathered = vec![0.0f64; 2];
        world.gather(&recv, &mut gathered, 2, 0).await.unwrap();
        assert_eq!(gathered, send);

        world.finalize().await;
    }

    #[tokio::test]
    async fn scatter_rejects_bad_partition() {
        let config = WorldConfig::new(0, 1, vec!["127.0.0.1:0".to_string()]).unwrap();
        let world = Communicator::with_config(config).await.unwrap();

        let send = vec![1i64, 2, 3];
        let mut recv = vec![0i64; 2];
        let err = world.scatter(&send, &mut recv, 2, 0).await.unwrap_err();
        assert!(matches!(err, MeshError::Contract(_)));

        world.finalize().await;
    }

    #[tokio::test]
    async fn collectives_reject_root_outside_world() {
        let config = WorldConfig::new(0, 1, vec!["127.0.0.1:0".to_string()]).unwrap();
        let world = Communicator::with_config(config).await.unwrap();

        let mut value = 0i64;
        let err = world.broadcast(&mut value, 4).await.unwrap_err();
        assert!(matches!(err, MeshError::Contract(_)));

        world.finalize().await;
    }
}
