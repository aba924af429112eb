use crate::cluster::Node;
use crate::config::BmpiConfig;
use crate::error::{BmpiError, Result};
use crate::transfer::Completed;
use crate::types::{DataType, Rank, ReduceOp, TransferId};
use bytes::{Bytes, BytesMut};
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Blocking wrapper around [`Cluster`](super::Cluster).
///
/// Owns (a share of) a multi-threaded `tokio::runtime::Runtime`; channel
/// workers run on it and the waiting calls use `block_on()`. Must not be
/// used from inside an async context.
pub struct BlockingCluster {
    inner: super::Cluster,
    rt: Arc<Runtime>,
}

fn new_runtime() -> Result<Arc<Runtime>> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map(Arc::new)
        .map_err(|e| BmpiError::transport_with_source("tokio runtime", e))
}

impl BlockingCluster {
    /// Blocking [`Cluster::init`](super::Cluster::init).
    pub fn init(path: impl AsRef<Path>, config: BmpiConfig) -> Result<Self> {
        let rt = new_runtime()?;
        let inner = rt.block_on(super::Cluster::init(path, config))?;
        Ok(Self { inner, rt })
    }

    /// Bootstrap a local cluster and return a blocking handle for each rank.
    ///
    /// The handles share one runtime, so each can be driven from its own
    /// thread.
    pub fn bootstrap_local(world_size: u32, config: BmpiConfig) -> Result<Vec<Self>> {
        let rt = new_runtime()?;
        let clusters = rt.block_on(super::Cluster::bootstrap_local(world_size, config))?;
        Ok(clusters
            .into_iter()
            .map(|inner| Self {
                inner,
                rt: Arc::clone(&rt),
            })
            .collect())
    }

    /// The async cluster underneath.
    pub fn as_async(&self) -> &super::Cluster {
        &self.inner
    }

    pub fn mynode(&self) -> Rank {
        self.inner.mynode()
    }

    pub fn totalnode(&self) -> u32 {
        self.inner.totalnode()
    }

    pub fn node(&self) -> &Node {
        self.inner.node()
    }

    pub fn bundle_size(&self, peer: Rank) -> Option<usize> {
        self.inner.bundle_size(peer)
    }

    /// Ring barrier.
    pub fn sync(&self) -> Result<()> {
        self.rt.block_on(self.inner.sync())
    }

    pub fn sync_ring_token(&self) -> Result<()> {
        self.rt.block_on(self.inner.sync_ring_token())
    }

    pub fn isend(&self, data: impl Into<Bytes>, dest: Rank) -> Result<TransferId> {
        self.inner.isend(data, dest)
    }

    pub fn irecv(&self, buf: BytesMut, src: Rank, dtype: DataType, op: ReduceOp) -> Result<TransferId> {
        self.inner.irecv(buf, src, dtype, op)
    }

    pub fn irecvsend(
        &self,
        buf: BytesMut,
        src: Rank,
        dest: Rank,
        dtype: DataType,
        op: ReduceOp,
    ) -> Result<TransferId> {
        self.inner.irecvsend(buf, src, dest, dtype, op)
    }

    pub fn wait(&self) -> Result<Completed> {
        self.rt.block_on(self.inner.wait())
    }

    pub fn wait_all_send(&self) -> Result<Completed> {
        self.rt.block_on(self.inner.wait_all_send())
    }

    pub fn wait_all_recv(&self) -> Result<Completed> {
        self.rt.block_on(self.inner.wait_all_recv())
    }
}
