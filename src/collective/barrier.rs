use crate::cluster::ring_neighbors;
use crate::collective::queue::SyncQueue;
use crate::config::{BmpiConfig, SyncMismatchPolicy};
use crate::error::{ProtocolError, Result};
use crate::transport::handshake::write_i32;
use crate::types::Rank;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Where a ring operation currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingState {
    Idle,
    AwaitingToken,
    TokenReceived,
    Forwarded,
}

struct RingLinks<W> {
    to_next: W,
    queue: SyncQueue,
    state: RingState,
}

impl<W> RingLinks<W> {
    fn enter(&mut self, state: RingState) {
        tracing::trace!(from = ?self.state, to = ?state, "sync ring transition");
        self.state = state;
    }
}

/// Token ring over dedicated links, kept apart from bulk data so a barrier
/// never queues behind a large transfer.
///
/// Ring operations are serialized; each holds the links for its duration.
pub struct SyncRing<W> {
    rank: Rank,
    prev: Rank,
    policy: SyncMismatchPolicy,
    links: Option<Mutex<RingLinks<W>>>,
    listener: Option<JoinHandle<()>>,
}

impl<W: AsyncWrite + Unpin + Send> SyncRing<W> {
    /// Join a ring of `world_size` nodes: `to_next` goes to `rank + 1`,
    /// `from_prev` comes from `rank - 1`.
    pub fn new<R>(rank: Rank, world_size: u32, from_prev: R, to_next: W, config: &BmpiConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (prev, _) = ring_neighbors(rank, world_size);
        let (queue, listener) = SyncQueue::spawn_listener(from_prev, prev, config.sync_queue_capacity);
        Self {
            rank,
            prev,
            policy: config.sync_mismatch,
            links: Some(Mutex::new(RingLinks {
                to_next,
                queue,
                state: RingState::Idle,
            })),
            listener: Some(listener),
        }
    }

    /// A one-node ring: every operation returns immediately.
    pub fn single(config: &BmpiConfig) -> Self {
        Self {
            rank: 0,
            prev: 0,
            policy: config.sync_mismatch,
            links: None,
            listener: None,
        }
    }

    /// Current state, or `None` while an operation holds the ring.
    pub fn state(&self) -> Option<RingState> {
        match &self.links {
            Some(links) => links.try_lock().ok().map(|l| l.state),
            None => Some(RingState::Idle),
        }
    }

    /// Barrier: returns once every node in the ring has entered.
    ///
    /// The token goes around twice. Rank 0 gets the first loop back only
    /// after all nodes have entered, and nobody sees the second loop before
    /// that.
    pub async fn sync(&self) -> Result<()> {
        let Some(links) = &self.links else {
            return Ok(());
        };
        let mut links = links.lock().await;
        for _ in 0..2 {
            self.ring_pass(&mut links).await?;
        }
        links.enter(RingState::Idle);
        Ok(())
    }

    async fn ring_pass(&self, links: &mut RingLinks<W>) -> Result<()> {
        if self.rank == 0 {
            self.forward(links).await?;
            links.enter(RingState::AwaitingToken);
            let token = links.queue.pop().await?;
            links.enter(RingState::TokenReceived);
            self.check(token)
        } else {
            links.enter(RingState::AwaitingToken);
            let token = links.queue.pop().await?;
            links.enter(RingState::TokenReceived);
            self.check(token)?;
            self.forward(links).await
        }
    }

    /// Send own rank to `next`, take one token, and compare it with `prev`.
    pub async fn sync_ring_token(&self) -> Result<()> {
        let Some(links) = &self.links else {
            return Ok(());
        };
        let mut links = links.lock().await;
        self.forward(&mut links).await?;
        links.enter(RingState::AwaitingToken);
        let token = links.queue.pop().await?;
        links.enter(RingState::TokenReceived);
        let checked = self.check(token);
        links.enter(RingState::Idle);
        checked
    }

    async fn forward(&self, links: &mut RingLinks<W>) -> Result<()> {
        write_i32(&mut links.to_next, self.rank as i32).await?;
        links.enter(RingState::Forwarded);
        Ok(())
    }

    fn check(&self, token: i32) -> Result<()> {
        if token == self.prev as i32 {
            return Ok(());
        }
        match self.policy {
            SyncMismatchPolicy::Warn => {
                tracing::warn!(
                    rank = self.rank,
                    expected = self.prev,
                    got = token,
                    "sync token mismatch"
                );
                Ok(())
            }
            SyncMismatchPolicy::Fail => Err(ProtocolError::SyncTokenMismatch {
                expected: self.prev,
                got: token,
            }
            .into()),
        }
    }
}

impl<W> Drop for SyncRing<W> {
    fn drop(&mut self) {
        if let Some(listener) = &self.listener {
            listener.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BmpiError;
    use crate::transport::handshake::read_i32;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::DuplexStream;

    /// Ring of `n` nodes wired with in-memory pipes.
    fn mock_ring(n: u32, config: &BmpiConfig) -> Vec<SyncRing<DuplexStream>> {
        let mut to_next = Vec::new();
        let mut from_prev = Vec::new();
        for _ in 0..n {
            let (w, r) = tokio::io::duplex(256);
            to_next.push(w);
            from_prev.push(r);
        }
        // Pipe i carries node i -> node i+1, so node i reads pipe i-1.
        from_prev.rotate_right(1);
        to_next
            .into_iter()
            .zip(from_prev)
            .enumerate()
            .map(|(i, (w, r))| SyncRing::new(i as Rank, n, r, w, config))
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_barrier_waits_for_everyone() {
        let n = 5;
        let ring = mock_ring(n, &BmpiConfig::default());
        let entered = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for (i, node) in ring.into_iter().enumerate() {
            let entered = Arc::clone(&entered);
            tasks.push(tokio::spawn(async move {
                for round in 0..3 {
                    // Stagger arrival so late nodes are really late.
                    tokio::time::sleep(Duration::from_millis(((i * 7 + round * 3) % 5) as u64 * 10))
                        .await;
                    entered.fetch_add(1, Ordering::SeqCst);
                    node.sync().await.unwrap();
                    let seen = entered.load(Ordering::SeqCst);
                    assert!(
                        seen >= n as usize * (round + 1),
                        "node {i} left round {round} after only {seen} arrivals"
                    );
                }
                node
            }));
        }
        for t in tasks {
            let node = t.await.unwrap();
            assert_eq!(node.state(), Some(RingState::Idle));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_ring_token_rounds() {
        let ring = mock_ring(4, &BmpiConfig::default());
        let mut tasks = Vec::new();
        for mut node in ring {
            node.policy = SyncMismatchPolicy::Fail;
            tasks.push(tokio::spawn(async move {
                for _ in 0..3 {
                    node.sync_ring_token().await?;
                }
                node.sync().await
            }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_single_node_is_noop() {
        let ring: SyncRing<DuplexStream> = SyncRing::single(&BmpiConfig::default());
        ring.sync().await.unwrap();
        ring.sync_ring_token().await.unwrap();
        assert_eq!(ring.state(), Some(RingState::Idle));
    }

    fn lone_node(policy: SyncMismatchPolicy) -> (SyncRing<DuplexStream>, DuplexStream, DuplexStream) {
        let config = BmpiConfig {
            sync_mismatch: policy,
            ..Default::default()
        };
        let (prev_w, prev_r) = tokio::io::duplex(64);
        let (next_w, next_r) = tokio::io::duplex(64);
        // Rank 1 of 3: expects tokens from rank 0.
        (SyncRing::new(1, 3, prev_r, next_w, &config), prev_w, next_r)
    }

    #[tokio::test]
    async fn test_mismatch_warns_by_default() {
        let (node, mut prev, mut next) = lone_node(SyncMismatchPolicy::Warn);
        write_i32(&mut prev, 5).await.unwrap();
        node.sync_ring_token().await.unwrap();
        assert_eq!(read_i32(&mut next).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_mismatch_fails_when_strict() {
        let (node, mut prev, _next) = lone_node(SyncMismatchPolicy::Fail);
        write_i32(&mut prev, 5).await.unwrap();
        let err = node.sync_ring_token().await.unwrap_err();
        assert!(matches!(
            err,
            BmpiError::Protocol(ProtocolError::SyncTokenMismatch {
                expected: 0,
                got: 5
            })
        ));
    }

    #[tokio::test]
    async fn test_closed_ring() {
        let (node, prev, _next) = lone_node(SyncMismatchPolicy::Warn);
        drop(prev);
        assert!(matches!(
            node.sync().await,
            Err(BmpiError::SyncRingClosed)
        ));
    }
}
