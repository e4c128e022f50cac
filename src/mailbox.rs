//! # Mailbox and Matching Engine
//!
//! The mailbox decouples the arrival order of messages from the order in
//! which the user program consumes them. Inbound messages land here keyed
//! by tag; receives pull them back out filtered by `(source, tag)`, with
//! `-1` as the wildcard in either position.
//!
//! ## Matching rules
//!
//! 1. If the tag filter is concrete, only that tag bucket is considered;
//!    with the wildcard every bucket is.
//! 2. Within a bucket, messages are scanned in arrival order and the first
//!    whose source passes the filter is the match.
//! 3. Across buckets (wildcard tag), the earliest-arrived candidate wins;
//!    a global arrival sequence number makes that ordering exact rather
//!    than an accident of map iteration.
//!
//! The matched message is removed and returned: a message enters the
//! mailbox exactly once and leaves exactly once.
//!
//! ## Waiting
//!
//! Receives with no current match poll the mailbox on a fixed ~100 ms tick
//! until the receive timeout elapses. The tick is a deliberate
//! simplification: correctness does not depend on lower latency, and it
//! avoids plumbing waiters across the RPC handler boundary. The single
//! mutex is held only for enqueue and for scan-and-remove, never across a
//! tick or an RPC.

use crate::defaults::POLL_INTERVAL;
use crate::error::{MeshError, Result};
use crate::transport::{Message, ANY_SOURCE, ANY_TAG};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

/// A message parked in the mailbox, stamped with its arrival sequence.
#[derive(Debug)]
struct Parked {
    seq: u64,
    message: Message,
}

#[derive(Debug, Default)]
struct Queues {
    /// Tag → messages in arrival order.
    by_tag: HashMap<i32, VecDeque<Parked>>,
    /// Global arrival counter, shared by all tags.
    next_seq: u64,
}

/// The per-peer match queue of received-but-not-yet-consumed messages.
///
/// All mutation happens under a single mutex. The mailbox exclusively owns
/// parked messages; matching transfers ownership to the receiver.
#[derive(Debug, Default)]
pub struct Mailbox {
    queues: Mutex<Queues>,
    closed: AtomicBool,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to its tag bucket. Never blocks beyond the lock.
    pub fn push(&self, message: Message) {
        let mut queues = self.queues.lock();
        let seq = queues.next_seq;
        queues.next_seq += 1;
        debug!(
            "mailbox: parked message seq={} source={} tag={} ({} bytes)",
            seq,
            message.source,
            message.tag,
            message.data.len()
        );
        queues
            .by_tag
            .entry(message.tag)
            .or_default()
            .push_back(Parked { seq, message });
    }

    /// Remove and return the first message matching `(source, tag)`, if any.
    pub fn try_match(&self, source: i32, tag: i32) -> Option<Message> {
        let mut queues = self.queues.lock();

        // For each considered bucket, only its earliest matching entry can
        // win; among those candidates the lowest arrival sequence is the
        // overall match.
        let mut best: Option<(i32, usize, u64)> = None;
        for (&bucket_tag, bucket) in queues.by_tag.iter() {
            if tag != ANY_TAG && tag != bucket_tag {
                continue;
            }
            let candidate = bucket
                .iter()
                .enumerate()
                .find(|(_, parked)| source == ANY_SOURCE || source == parked.message.source);
            if let Some((index, parked)) = candidate {
                match best {
                    Some((_, _, best_seq)) if best_seq <= parked.seq => {}
                    _ => best = Some((bucket_tag, index, parked.seq)),
                }
            }
        }

        let (bucket_tag, index, seq) = best?;
        let bucket = queues.by_tag.get_mut(&bucket_tag)?;
        let parked = bucket.remove(index)?;
        if bucket.is_empty() {
            queues.by_tag.remove(&bucket_tag);
        }
        debug!(
            "mailbox: matched seq={} source={} tag={} against filter ({}, {})",
            seq, parked.message.source, parked.message.tag, source, tag
        );
        Some(parked.message)
    }

    /// Wait for a message matching `(source, tag)`.
    ///
    /// Returns immediately if a match is already parked. Otherwise the
    /// mailbox is re-examined on every tick until `timeout` elapses, at
    /// which point [`MeshError::ReceiveTimedOut`] is returned. A mailbox
    /// closed by finalize aborts the wait with a transport error.
    pub async fn recv(&self, source: i32, tag: i32, timeout: Duration) -> Result<Message> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut tick = tokio::time::interval(POLL_INTERVAL);
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(MeshError::Transport(
                    "world finalized while a receive was pending".to_string(),
                ));
            }
            if let Some(message) = self.try_match(source, tag) {
                return Ok(message);
            }
            if tokio::time::Instant::now() >= deadline {
                debug!(
                    "mailbox: receive filter ({}, {}) timed out after {:?}",
                    source, tag, timeout
                );
                return Err(MeshError::ReceiveTimedOut);
            }
            tick.tick().await;
        }
    }

    /// Number of parked messages, across all tags.
    pub fn len(&self) -> usize {
        self.queues.lock().by_tag.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release all parked messages and abort pending receives. Called by
    /// finalize; a cleared mailbox stays closed.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let mut queues = self.queues.lock();
        let dropped: usize = queues.by_tag.values().map(VecDeque::len).sum();
        if dropped > 0 {
            debug!("mailbox: dropping {} unmatched messages at close", dropped);
        }
        queues.by_tag.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::RECV_TIMEOUT;
    use std::sync::Arc;

    fn message(source: i32, tag: i32, data: &[u8]) -> Message {
        Message {
            source,
            dest: 0,
            tag,
            data: data.to_vec(),
        }
    }

    #[test]
    fn already_parked_message_matches_without_blocking() {
        let mailbox = Mailbox::new();
        mailbox.push(message(2, 10, b"x"));
        let matched = mailbox.try_match(2, 10).unwrap();
        assert_eq!(matched.data, b"x");
        assert!(mailbox.is_empty());
    }

    #[test]
    fn fifo_per_source_and_tag() {
        let mailbox = Mailbox::new();
        mailbox.push(message(1, 10, b"first"));
        mailbox.push(message(1, 10, b"second"));
        mailbox.push(message(1, 10, b"third"));

        assert_eq!(mailbox.try_match(1, 10).unwrap().data, b"first");
        assert_eq!(mailbox.try_match(1, 10).unwrap().data, b"second");
        assert_eq!(mailbox.try_match(1, 10).unwrap().data, b"third");
    }

    #[test]
    fn source_filter_skips_other_senders() {
        let mailbox = Mailbox::new();
        mailbox.push(message(1, 10, b"from-one"));
        mailbox.push(message(2, 10, b"from-two"));

        let matched = mailbox.try_match(2, 10).unwrap();
        assert_eq!(matched.data, b"from-two");
        // The earlier message from rank 1 is untouched.
        assert_eq!(mailbox.try_match(1, 10).unwrap().data, b"from-one");
    }

    #[test]
    fn wildcard_source_returns_earliest_in_bucket() {
        let mailbox = Mailbox::new();
        mailbox.push(message(3, 10, b"early"));
        mailbox.push(message(1, 10, b"late"));

        assert_eq!(mailbox.try_match(ANY_SOURCE, 10).unwrap().data, b"early");
        assert_eq!(mailbox.try_match(ANY_SOURCE, 10).unwrap().data, b"late");
    }

    #[test]
    fn wildcard_tag_returns_earliest_across_buckets() {
        let mailbox = Mailbox::new();
        mailbox.push(message(1, 20, b"first-arrival"));
        mailbox.push(message(2, 10, b"second-arrival"));
        mailbox.push(message(1, 30, b"third-arrival"));

        assert_eq!(
            mailbox.try_match(ANY_SOURCE, ANY_TAG).unwrap().data,
            b"first-arrival"
        );
        assert_eq!(
            mailbox.try_match(ANY_SOURCE, ANY_TAG).unwrap().data,
            b"second-arrival"
        );
        assert_eq!(
            mailbox.try_match(ANY_SOURCE, ANY_TAG).unwrap().data,
            b"third-arrival"
        );
    }

    #[test]
    fn no_match_leaves_queue_intact() {
        let mailbox = Mailbox::new();
        mailbox.push(message(1, 10, b"x"));
        assert!(mailbox.try_match(1, 11).is_none());
        assert!(mailbox.try_match(2, 10).is_none());
        assert_eq!(mailbox.len(), 1);
    }

    #[tokio::test]
    async fn recv_parks_until_send_arrives() {
        let mailbox = Arc::new(Mailbox::new());
        let receiver = mailbox.clone();
        let handle = tokio::spawn(async move {
            receiver.recv(5, 12, Duration::from_secs(5)).await
        });

        tokio::time::sleep(Duration::from_millis(250)).await;
        mailbox.push(message(5, 12, b"late-arrival"));

        let received = handle.await.unwrap().unwrap();
        assert_eq!(received.data, b"late-arrival");
    }

    #[tokio::test(start_paused = true)]
    async fn recv_times_out_inside_the_contract_window() {
        let mailbox = Mailbox::new();
        let start = tokio::time::Instant::now();
        let err = mailbox
            .recv(ANY_SOURCE, ANY_TAG, RECV_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, MeshError::ReceiveTimedOut));

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(30), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(31), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn close_aborts_pending_recv() {
        let mailbox = Arc::new(Mailbox::new());
        let receiver = mailbox.clone();
        let handle = tokio::spawn(async move {
            receiver.recv(0, 10, Duration::from_secs(30)).await
        });

        tokio::time::sleep(Duration::from_millis(150)).await;
        mailbox.close();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, MeshError::Transport(_)));
    }

    #[test]
    fn close_drops_unmatched_messages() {
        let mailbox = Mailbox::new();
        mailbox.push(message(1, 10, b"a"));
        mailbox.push(message(2, 11, b"b"));
        mailbox.close();
        assert!(mailbox.is_empty());
    }
}
