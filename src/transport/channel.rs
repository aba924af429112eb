//! Bonded channels and their per-direction workers.
//!
//! Each channel's TCP stream is split once; the write half belongs to a
//! long-lived send worker and the read half to a receive worker. Jobs are
//! queued FIFO, so two transfers to the same peer never interleave bytes on
//! a channel, and each job reports back through a oneshot.

use crate::config::BmpiConfig;
use crate::error::{BmpiError, Result};
use crate::reduce::StreamReducer;
use crate::transport::buffer_pool::BufferPool;
use crate::types::{DataType, Rank, ReduceOp};
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};

/// What a send job writes.
pub(crate) enum SendPayload {
    /// A slice that is fully available up front.
    Whole(Bytes),
    /// Chunks that arrive while the job runs, `len` bytes in total.
    Stream {
        chunks: mpsc::UnboundedReceiver<Bytes>,
        len: usize,
    },
}

struct SendJob {
    payload: SendPayload,
    done: oneshot::Sender<Result<()>>,
}

/// A receive job: fill (or reduce into) `dest` with exactly `dest.len()`
/// bytes from the wire.
pub(crate) struct RecvJob {
    pub dest: BytesMut,
    pub dtype: DataType,
    pub op: ReduceOp,
    /// Where to push finished bytes, one alignment unit at a time.
    pub forward: Option<mpsc::UnboundedSender<Bytes>>,
    pub align: usize,
}

struct QueuedRecv {
    job: RecvJob,
    done: oneshot::Sender<Result<BytesMut>>,
}

/// One bonded TCP connection to a peer.
pub struct Channel {
    index: usize,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    send_tx: mpsc::UnboundedSender<SendJob>,
    recv_tx: mpsc::UnboundedSender<QueuedRecv>,
}

impl Channel {
    /// Split `stream` and start its send and receive workers.
    pub(crate) fn spawn(
        peer: Rank,
        index: usize,
        stream: TcpStream,
        pool: Arc<BufferPool>,
        chunk_bytes: usize,
    ) -> Result<Self> {
        let local_addr = stream.local_addr()?;
        let remote_addr = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();

        let (send_tx, send_rx) = mpsc::unbounded_channel();
        let (recv_tx, recv_rx) = mpsc::unbounded_channel();
        tokio::spawn(send_worker(peer, index, writer, send_rx));
        tokio::spawn(recv_worker(
            peer,
            index,
            reader,
            recv_rx,
            pool,
            chunk_bytes.max(1),
        ));

        tracing::debug!(peer, channel = index, %local_addr, %remote_addr, "channel workers started");
        Ok(Self {
            index,
            local_addr,
            remote_addr,
            send_tx,
            recv_tx,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Queue a send. The receiver fails if the worker is gone.
    pub(crate) fn send(&self, payload: SendPayload) -> oneshot::Receiver<Result<()>> {
        let (done, rx) = oneshot::channel();
        // A closed queue drops `done`, which the waiter observes.
        let _ = self.send_tx.send(SendJob { payload, done });
        rx
    }

    /// Queue a receive. The receiver yields `job.dest` once it is complete.
    pub(crate) fn recv(&self, job: RecvJob) -> oneshot::Receiver<Result<BytesMut>> {
        let (done, rx) = oneshot::channel();
        let _ = self.recv_tx.send(QueuedRecv { job, done });
        rx
    }
}

async fn send_worker(
    peer: Rank,
    index: usize,
    mut writer: OwnedWriteHalf,
    mut jobs: mpsc::UnboundedReceiver<SendJob>,
) {
    let mut broken = false;
    while let Some(SendJob { payload, done }) = jobs.recv().await {
        if broken {
            let _ = done.send(Err(BmpiError::PeerDisconnected { rank: peer }));
            continue;
        }
        let result = match payload {
            SendPayload::Whole(bytes) => writer
                .write_all(&bytes)
                .await
                .map_err(|e| send_failed(peer, index, e)),
            SendPayload::Stream { chunks, len } => {
                write_stream(peer, index, &mut writer, chunks, len).await
            }
        };
        if let Err(e) = &result {
            tracing::error!(peer, channel = index, error = %e, "send worker failed");
            broken = true;
        }
        let _ = done.send(result);
    }
    tracing::debug!(peer, channel = index, "send worker exiting");
}

async fn write_stream(
    peer: Rank,
    index: usize,
    writer: &mut OwnedWriteHalf,
    mut chunks: mpsc::UnboundedReceiver<Bytes>,
    len: usize,
) -> Result<()> {
    let mut written = 0;
    while let Some(chunk) = chunks.recv().await {
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| send_failed(peer, index, e))?;
        written += chunk.len();
    }
    if written != len {
        // The peer expects `len` bytes; anything queued after this would be
        // read as the rest of this transfer.
        return Err(BmpiError::transport(format!(
            "forward to rank {peer} channel {index} stopped after {written} of {len} bytes"
        )));
    }
    Ok(())
}

fn send_failed(peer: Rank, index: usize, e: std::io::Error) -> BmpiError {
    BmpiError::transport_with_source(format!("send to rank {peer} channel {index} failed"), e)
}

async fn recv_worker(
    peer: Rank,
    index: usize,
    mut reader: OwnedReadHalf,
    mut jobs: mpsc::UnboundedReceiver<QueuedRecv>,
    pool: Arc<BufferPool>,
    chunk_bytes: usize,
) {
    let mut broken = false;
    while let Some(QueuedRecv { job, done }) = jobs.recv().await {
        if broken {
            let _ = done.send(Err(BmpiError::PeerDisconnected { rank: peer }));
            continue;
        }
        let RecvJob {
            mut dest,
            dtype,
            op,
            forward,
            align,
        } = job;
        let result = receive_into(
            peer,
            &mut reader,
            &mut dest,
            dtype,
            op,
            forward.as_ref(),
            align,
            &pool,
            chunk_bytes,
        )
        .await;
        match result {
            Ok(()) => {
                let _ = done.send(Ok(dest));
            }
            Err(e) => {
                tracing::error!(peer, channel = index, error = %e, "receive worker failed");
                broken = true;
                let _ = done.send(Err(e));
            }
        }
    }
    tracing::debug!(peer, channel = index, "receive worker exiting");
}

#[allow(clippy::too_many_arguments)]
async fn receive_into(
    peer: Rank,
    reader: &mut OwnedReadHalf,
    dest: &mut [u8],
    dtype: DataType,
    op: ReduceOp,
    forward: Option<&mpsc::UnboundedSender<Bytes>>,
    align: usize,
    pool: &Arc<BufferPool>,
    chunk_bytes: usize,
) -> Result<()> {
    let total = dest.len();
    if total == 0 {
        return Ok(());
    }
    let mut reducer = StreamReducer::new(dtype, op);
    let mut staging = pool.checkout(chunk_bytes.min(total));
    let mut forwarded = 0;

    loop {
        let consumed = reducer.position() + reducer.carried();
        if consumed == total {
            break;
        }
        let want = (total - consumed).min(staging.len());
        let n = reader
            .read(&mut staging[..want])
            .await
            .map_err(|e| BmpiError::transport_with_source(format!("recv from rank {peer} failed"), e))?;
        if n == 0 {
            return Err(BmpiError::PeerDisconnected { rank: peer });
        }
        reducer.feed(dest, &staging[..n])?;

        if let Some(tx) = forward {
            let ready = reducer.position();
            let unit_end = if ready == total {
                total
            } else {
                ready / align * align
            };
            if unit_end > forwarded {
                // A closed stream means the send side already failed; it
                // reports that itself.
                let _ = tx.send(Bytes::copy_from_slice(&dest[forwarded..unit_end]));
                forwarded = unit_end;
            }
        }
    }
    reducer.finish()
}

/// All bonded channels to one peer, in the order both sides agreed on.
pub struct PeerChannelBundle {
    peer: Rank,
    channels: Vec<Channel>,
}

impl PeerChannelBundle {
    /// Start workers for already-handshaken streams.
    pub fn from_streams(
        peer: Rank,
        streams: Vec<TcpStream>,
        config: &BmpiConfig,
        pool: &Arc<BufferPool>,
    ) -> Result<Self> {
        if streams.is_empty() {
            return Err(BmpiError::ConnectionFailed {
                rank: peer,
                reason: "bundle has no channels".into(),
            });
        }
        let channels = streams
            .into_iter()
            .enumerate()
            .map(|(i, s)| Channel::spawn(peer, i, s, Arc::clone(pool), config.chunk_bytes))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { peer, channels })
    }

    pub fn peer(&self) -> Rank {
        self.peer
    }

    /// Number of bonded channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }
}

impl std::fmt::Debug for PeerChannelBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerChannelBundle")
            .field("peer", &self.peer)
            .field("channels", &self.channels.len())
            .finish()
    }
}
