use crate::config::BmpiConfig;
use crate::error::{BmpiError, Result};
use crate::transfer::handle::{Completed, OutstandingOperationSet, TransferHandle, wait_handles};
use crate::transfer::plan::split_plan;
use crate::transport::channel::{PeerChannelBundle, RecvJob, SendPayload};
use crate::types::{DataType, Rank, ReduceOp, TransferId};
use bytes::{Bytes, BytesMut};
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

/// Asynchronous point-to-point transfers over bonded channel bundles.
///
/// Every call splits its buffer with [`split_plan`], queues one job per
/// channel and returns a [`TransferId`] at once. Completion is observed
/// through the wait calls.
pub struct TransferEngine {
    rank: Rank,
    bundles: Vec<Option<Arc<PeerChannelBundle>>>,
    align: usize,
    next_id: AtomicU64,
    outstanding: Mutex<OutstandingOperationSet>,
    runtime: Handle,
}

impl TransferEngine {
    /// `bundles[r]` is the bundle to rank `r`; the local slot is `None`.
    ///
    /// Must be called from within a tokio runtime; transfers are spawned
    /// onto it.
    pub fn new(rank: Rank, bundles: Vec<Option<PeerChannelBundle>>, config: &BmpiConfig) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| BmpiError::transport_with_source("transfer engine needs a tokio runtime", e))?;
        Ok(Self {
            rank,
            bundles: bundles.into_iter().map(|b| b.map(Arc::new)).collect(),
            align: config.align_bytes,
            next_id: AtomicU64::new(1),
            outstanding: Mutex::new(OutstandingOperationSet::default()),
            runtime,
        })
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn world_size(&self) -> u32 {
        self.bundles.len() as u32
    }

    /// Channels bonded to `peer`, or `None` for self and unknown ranks.
    pub fn bundle_size(&self, peer: Rank) -> Option<usize> {
        self.bundles
            .get(peer as usize)
            .and_then(|b| b.as_ref())
            .map(|b| b.len())
    }

    /// Transfers issued but not yet finished.
    pub fn pending(&self) -> Result<usize> {
        let set = self.lock()?;
        Ok(set.len() - set.finished())
    }

    fn lock(&self) -> Result<MutexGuard<'_, OutstandingOperationSet>> {
        self.outstanding
            .lock()
            .map_err(|_| BmpiError::LockPoisoned("outstanding operations"))
    }

    fn next_id(&self) -> TransferId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn peer(&self, peer: Rank) -> Option<Arc<PeerChannelBundle>> {
        if peer == self.rank {
            return None;
        }
        match self.bundles.get(peer as usize) {
            Some(Some(bundle)) => Some(Arc::clone(bundle)),
            _ => {
                tracing::warn!(
                    rank = self.rank,
                    peer,
                    world_size = self.world_size(),
                    "transfer to out-of-range rank ignored"
                );
                None
            }
        }
    }

    fn check_length(len: usize, dtype: DataType, op: ReduceOp) -> Result<()> {
        if op != ReduceOp::None && len % dtype.size_in_bytes() != 0 {
            return Err(BmpiError::UnalignedLength { length: len, dtype });
        }
        Ok(())
    }

    /// Send `data` to `dest`. Sending to self or an unknown rank does
    /// nothing.
    pub fn isend(&self, data: Bytes, dest: Rank) -> Result<TransferId> {
        let id = self.next_id();
        let Some(bundle) = self.peer(dest) else {
            return Ok(id);
        };
        tracing::trace!(transfer = id, peer = dest, bytes = data.len(), "isend");

        let plan = split_plan(data.len(), bundle.len(), self.align);
        let sends: Vec<_> = bundle
            .channels()
            .iter()
            .zip(plan)
            .map(|(ch, range)| ch.send(SendPayload::Whole(data.slice(range))))
            .collect();
        let handle = TransferHandle::spawn(&self.runtime, async move {
            await_sends(dest, sends).await?;
            Ok(None)
        });
        self.lock()?.push_send(id, handle);
        Ok(id)
    }

    /// Receive `buf.len()` bytes from `src` into `buf`, folding them in with
    /// `op`. The filled buffer comes back from the wait call under the
    /// returned id; receiving from self or an unknown rank returns `buf`
    /// unchanged.
    pub fn irecv(&self, buf: BytesMut, src: Rank, dtype: DataType, op: ReduceOp) -> Result<TransferId> {
        Self::check_length(buf.len(), dtype, op)?;
        let id = self.next_id();
        let handle = match self.peer(src) {
            None => TransferHandle::spawn(&self.runtime, async move { Ok(Some(buf)) }),
            Some(bundle) => {
                tracing::trace!(transfer = id, peer = src, bytes = buf.len(), %dtype, %op, "irecv");
                let recvs = self.queue_recvs(&bundle, buf, dtype, op, |_| None);
                TransferHandle::spawn(&self.runtime, async move {
                    assemble(src, recvs).await.map(Some)
                })
            }
        };
        self.lock()?.push_recv(id, handle);
        Ok(id)
    }

    /// Receive from `src` into `buf` (reducing with `op`) and forward the
    /// result to `dest`.
    ///
    /// When both bundles have the same channel count, channel `i` of `src`
    /// feeds channel `i` of `dest` one alignment unit at a time. Otherwise
    /// the whole buffer is received first and re-split for `dest`. The
    /// reduced buffer comes back from the wait call.
    pub fn irecvsend(
        &self,
        buf: BytesMut,
        src: Rank,
        dest: Rank,
        dtype: DataType,
        op: ReduceOp,
    ) -> Result<TransferId> {
        Self::check_length(buf.len(), dtype, op)?;
        let id = self.next_id();
        let from = self.peer(src);
        let to = self.peer(dest);
        tracing::trace!(transfer = id, src, dest, bytes = buf.len(), %dtype, %op, "irecvsend");

        let handle = match (from, to) {
            (None, None) => TransferHandle::spawn(&self.runtime, async move { Ok(Some(buf)) }),
            (Some(from), None) => {
                let recvs = self.queue_recvs(&from, buf, dtype, op, |_| None);
                TransferHandle::spawn(&self.runtime, async move {
                    assemble(src, recvs).await.map(Some)
                })
            }
            (None, Some(to)) => {
                // Nothing to receive: forward the buffer as it stands.
                let data = Bytes::copy_from_slice(&buf);
                let plan = split_plan(data.len(), to.len(), self.align);
                let sends: Vec<_> = to
                    .channels()
                    .iter()
                    .zip(plan)
                    .map(|(ch, range)| ch.send(SendPayload::Whole(data.slice(range))))
                    .collect();
                TransferHandle::spawn(&self.runtime, async move {
                    await_sends(dest, sends).await?;
                    Ok(Some(buf))
                })
            }
            (Some(from), Some(to)) if from.len() == to.len() => {
                let plan = split_plan(buf.len(), to.len(), self.align);
                let mut streams = Vec::with_capacity(plan.len());
                let sends: Vec<_> = to
                    .channels()
                    .iter()
                    .zip(&plan)
                    .map(|(ch, range)| {
                        let (tx, chunks) = mpsc::unbounded_channel();
                        streams.push(tx);
                        ch.send(SendPayload::Stream {
                            chunks,
                            len: range.len(),
                        })
                    })
                    .collect();
                let mut streams = streams.into_iter();
                let recvs = self.queue_recvs(&from, buf, dtype, op, |_| streams.next());
                TransferHandle::spawn(&self.runtime, async move {
                    let received = assemble(src, recvs).await;
                    let sent = await_sends(dest, sends).await;
                    let buf = received?;
                    sent?;
                    Ok(Some(buf))
                })
            }
            (Some(from), Some(to)) => {
                tracing::debug!(
                    transfer = id,
                    src_channels = from.len(),
                    dest_channels = to.len(),
                    "bundle sizes differ, forwarding after full receive"
                );
                let dest_plan = split_plan(buf.len(), to.len(), self.align);
                let mut streams = Vec::with_capacity(dest_plan.len());
                let sends: Vec<_> = to
                    .channels()
                    .iter()
                    .zip(&dest_plan)
                    .map(|(ch, range)| {
                        let (tx, chunks) = mpsc::unbounded_channel();
                        streams.push(tx);
                        ch.send(SendPayload::Stream {
                            chunks,
                            len: range.len(),
                        })
                    })
                    .collect();
                let recvs = self.queue_recvs(&from, buf, dtype, op, |_| None);
                TransferHandle::spawn(&self.runtime, async move {
                    let received = assemble(src, recvs).await;
                    if let Ok(buf) = &received {
                        for (tx, range) in streams.iter().zip(dest_plan) {
                            let _ = tx.send(Bytes::copy_from_slice(&buf[range]));
                        }
                    }
                    // Closing the streams ends the send jobs, short on failure.
                    drop(streams);
                    let sent = await_sends(dest, sends).await;
                    let buf = received?;
                    sent?;
                    Ok(Some(buf))
                })
            }
        };
        self.lock()?.push_recv(id, handle);
        Ok(id)
    }

    /// Split `buf` by the plan for `bundle` and queue one receive per
    /// channel. `forward(i)` supplies channel `i`'s forwarding stream.
    fn queue_recvs(
        &self,
        bundle: &PeerChannelBundle,
        mut buf: BytesMut,
        dtype: DataType,
        op: ReduceOp,
        mut forward: impl FnMut(usize) -> Option<mpsc::UnboundedSender<Bytes>>,
    ) -> Vec<oneshot::Receiver<Result<BytesMut>>> {
        let plan: Vec<Range<usize>> = split_plan(buf.len(), bundle.len(), self.align);
        bundle
            .channels()
            .iter()
            .zip(plan)
            .enumerate()
            .map(|(i, (ch, range))| {
                let piece = buf.split_to(range.len());
                ch.recv(RecvJob {
                    dest: piece,
                    dtype,
                    op,
                    forward: forward(i),
                    align: self.align,
                })
            })
            .collect()
    }

    /// Wait for every outstanding send and receive.
    pub async fn wait(&self) -> Result<Completed> {
        let handles = self.lock()?.take_all();
        wait_handles(handles).await
    }

    /// Wait for every outstanding send.
    pub async fn wait_all_send(&self) -> Result<Completed> {
        let handles = self.lock()?.take_sends();
        wait_handles(handles).await
    }

    /// Wait for every outstanding receive (including fused receive-sends).
    pub async fn wait_all_recv(&self) -> Result<Completed> {
        let handles = self.lock()?.take_recvs();
        wait_handles(handles).await
    }
}

/// Await every per-channel send; report the first failure.
async fn await_sends(peer: Rank, sends: Vec<oneshot::Receiver<Result<()>>>) -> Result<()> {
    let mut first_err = None;
    for rx in sends {
        let outcome = rx.await.unwrap_or(Err(BmpiError::PeerDisconnected { rank: peer }));
        if let Err(e) = outcome
            && first_err.is_none()
        {
            first_err = Some(e);
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Await every per-channel receive and glue the pieces back together.
async fn assemble(peer: Rank, recvs: Vec<oneshot::Receiver<Result<BytesMut>>>) -> Result<BytesMut> {
    let mut whole: Option<BytesMut> = None;
    let mut first_err = None;
    for rx in recvs {
        match rx.await.unwrap_or(Err(BmpiError::PeerDisconnected { rank: peer })) {
            Ok(piece) => match whole.as_mut() {
                Some(w) => w.unsplit(piece),
                None => whole = Some(piece),
            },
            Err(e) => {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(whole.unwrap_or_default()),
    }
}
