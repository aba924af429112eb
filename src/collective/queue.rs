use crate::error::{BmpiError, Result};
use crate::transport::handshake::read_i32;
use crate::types::Rank;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Bounded FIFO of sync-ring tokens.
///
/// A single listener task owns the "from prev" link and is its only reader;
/// it pushes every token it reads and stops at EOF or on error. A full
/// queue back-pressures the listener instead of dropping tokens.
pub struct SyncQueue {
    rx: mpsc::Receiver<i32>,
}

impl SyncQueue {
    /// Start the listener on `from_prev` and return the consuming end.
    pub fn spawn_listener<R>(from_prev: R, prev: Rank, capacity: usize) -> (Self, JoinHandle<()>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(listen(from_prev, prev, tx));
        (Self { rx }, handle)
    }

    /// Wait for the next token.
    pub async fn pop(&mut self) -> Result<i32> {
        self.rx.recv().await.ok_or(BmpiError::SyncRingClosed)
    }
}

async fn listen<R: AsyncRead + Unpin>(mut from_prev: R, prev: Rank, tx: mpsc::Sender<i32>) {
    loop {
        let token = match read_i32(&mut from_prev).await {
            Ok(token) => token,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                tracing::debug!(prev, "sync ring closed by predecessor");
                break;
            }
            Err(e) => {
                tracing::error!(prev, error = %e, "sync ring listener failed");
                break;
            }
        };
        tracing::trace!(prev, token, "sync token received");
        if tx.send(token).await.is_err() {
            break;
        }
    }
}
