use crate::error::{BmpiError, Result};
use crate::types::TransferId;
use bytes::BytesMut;
use std::collections::HashMap;
use std::future::Future;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// A handle to one in-flight transfer.
///
/// The assembly task awaits every per-channel job of the transfer and, for
/// receives, hands back the reassembled buffer. If dropped without
/// `wait()`, the task is aborted; channel jobs already queued still run.
pub(crate) struct TransferHandle {
    inner: Option<JoinHandle<Result<Option<BytesMut>>>>,
}

impl TransferHandle {
    pub(crate) fn spawn(
        runtime: &Handle,
        fut: impl Future<Output = Result<Option<BytesMut>>> + Send + 'static,
    ) -> Self {
        Self {
            inner: Some(runtime.spawn(fut)),
        }
    }

    /// Wait for the transfer and propagate any error.
    pub(crate) async fn wait(mut self) -> Result<Option<BytesMut>> {
        let Some(handle) = self.inner.take() else {
            return Err(BmpiError::Cancelled);
        };
        handle.await.map_err(|e| {
            if e.is_cancelled() {
                BmpiError::Cancelled
            } else {
                BmpiError::transport(format!("transfer task panicked: {e}"))
            }
        })?
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.inner.as_ref().is_none_or(|h| h.is_finished())
    }
}

impl Drop for TransferHandle {
    fn drop(&mut self) {
        if let Some(handle) = &self.inner {
            handle.abort();
        }
    }
}

/// In-flight sends and receives, in issue order.
#[derive(Default)]
pub(crate) struct OutstandingOperationSet {
    sends: Vec<(TransferId, TransferHandle)>,
    recvs: Vec<(TransferId, TransferHandle)>,
}

impl OutstandingOperationSet {
    pub(crate) fn push_send(&mut self, id: TransferId, handle: TransferHandle) {
        self.sends.push((id, handle));
    }

    pub(crate) fn push_recv(&mut self, id: TransferId, handle: TransferHandle) {
        self.recvs.push((id, handle));
    }

    pub(crate) fn take_sends(&mut self) -> Vec<(TransferId, TransferHandle)> {
        std::mem::take(&mut self.sends)
    }

    pub(crate) fn take_recvs(&mut self) -> Vec<(TransferId, TransferHandle)> {
        std::mem::take(&mut self.recvs)
    }

    pub(crate) fn take_all(&mut self) -> Vec<(TransferId, TransferHandle)> {
        let mut all = self.take_sends();
        all.append(&mut self.recvs);
        all
    }

    pub(crate) fn len(&self) -> usize {
        self.sends.len() + self.recvs.len()
    }

    /// Transfers whose tasks have already finished.
    pub(crate) fn finished(&self) -> usize {
        self.sends
            .iter()
            .chain(&self.recvs)
            .filter(|(_, h)| h.is_finished())
            .count()
    }
}

/// Buffers handed back by a wait call, keyed by the id the receive returned.
#[derive(Debug, Default)]
pub struct Completed {
    buffers: HashMap<TransferId, BytesMut>,
}

impl Completed {
    /// Remove and return the buffer of receive `id`.
    pub fn take(&mut self, id: TransferId) -> Option<BytesMut> {
        self.buffers.remove(&id)
    }

    pub fn get(&self, id: TransferId) -> Option<&BytesMut> {
        self.buffers.get(&id)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Ids of the buffers still held.
    pub fn ids(&self) -> impl Iterator<Item = TransferId> + '_ {
        self.buffers.keys().copied()
    }
}

impl IntoIterator for Completed {
    type Item = (TransferId, BytesMut);
    type IntoIter = std::collections::hash_map::IntoIter<TransferId, BytesMut>;

    fn into_iter(self) -> Self::IntoIter {
        self.buffers.into_iter()
    }
}

/// Await every handle, collecting receive buffers.
///
/// Returns the first error encountered, if any. All handles are awaited
/// regardless of errors.
pub(crate) async fn wait_handles(handles: Vec<(TransferId, TransferHandle)>) -> Result<Completed> {
    let mut completed = Completed::default();
    let mut first_err = None;
    for (id, handle) in handles {
        match handle.wait().await {
            Ok(Some(buf)) => {
                completed.buffers.insert(id, buf);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(transfer = id, error = %e, "transfer failed");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(completed),
    }
}
