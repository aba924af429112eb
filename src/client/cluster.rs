use crate::cluster::{Node, NodeRegistry};
use crate::collective::SyncRing;
use crate::config::BmpiConfig;
use crate::error::Result;
use crate::transfer::{Completed, TransferEngine};
use crate::types::{DataType, Rank, ReduceOp, TransferId};
use bytes::{Bytes, BytesMut};
use tokio::net::TcpStream;

/// A process's view of the cluster: its rank, bonded bundles to every
/// peer, and the sync ring.
///
/// Created by [`Cluster::init`] (one process per host) or
/// [`Cluster::bootstrap_local`] (all ranks in one process). Dropping it
/// closes every channel.
pub struct Cluster {
    pub(crate) registry: NodeRegistry,
    pub(crate) config: BmpiConfig,
    pub(crate) engine: TransferEngine,
    pub(crate) ring: SyncRing<TcpStream>,
}

impl Cluster {
    /// This node's rank (0-indexed).
    pub fn mynode(&self) -> Rank {
        self.registry.mynode()
    }

    /// Number of nodes in the cluster.
    pub fn totalnode(&self) -> u32 {
        self.registry.totalnode()
    }

    /// This node's registry entry.
    pub fn node(&self) -> &Node {
        self.registry.local()
    }

    /// Every node, in rank order.
    pub fn nodes(&self) -> &[Node] {
        self.registry.nodes()
    }

    pub fn config(&self) -> &BmpiConfig {
        &self.config
    }

    /// Channels bonded to `peer`; `None` for self and unknown ranks.
    pub fn bundle_size(&self, peer: Rank) -> Option<usize> {
        self.engine.bundle_size(peer)
    }

    /// Transfers issued but not yet finished.
    pub fn pending(&self) -> Result<usize> {
        self.engine.pending()
    }

    /// Ring barrier: returns once every node has entered.
    pub async fn sync(&self) -> Result<()> {
        self.ring.sync().await
    }

    /// Pass this node's rank once around the ring and check what arrives
    /// from the predecessor.
    pub async fn sync_ring_token(&self) -> Result<()> {
        self.ring.sync_ring_token().await
    }

    /// Start sending `data` to `dest`.
    pub fn isend(&self, data: impl Into<Bytes>, dest: Rank) -> Result<TransferId> {
        self.engine.isend(data.into(), dest)
    }

    /// Start receiving `buf.len()` bytes from `src` into `buf`.
    ///
    /// With `op` other than [`ReduceOp::None`], incoming elements of
    /// `dtype` are folded into the current contents of `buf`.
    pub fn irecv(&self, buf: BytesMut, src: Rank, dtype: DataType, op: ReduceOp) -> Result<TransferId> {
        self.engine.irecv(buf, src, dtype, op)
    }

    /// Receive from `src` into `buf` with `op`, forwarding the result to
    /// `dest` as it accumulates.
    pub fn irecvsend(
        &self,
        buf: BytesMut,
        src: Rank,
        dest: Rank,
        dtype: DataType,
        op: ReduceOp,
    ) -> Result<TransferId> {
        self.engine.irecvsend(buf, src, dest, dtype, op)
    }

    /// Wait for every outstanding transfer.
    pub async fn wait(&self) -> Result<Completed> {
        self.engine.wait().await
    }

    /// Wait for every outstanding send.
    pub async fn wait_all_send(&self) -> Result<Completed> {
        self.engine.wait_all_send().await
    }

    /// Wait for every outstanding receive and receive-send.
    pub async fn wait_all_recv(&self) -> Result<Completed> {
        self.engine.wait_all_recv().await
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("mynode", &self.mynode())
            .field("totalnode", &self.totalnode())
            .finish()
    }
}
