//! Bonded-channel collective communication for static compute clusters.
//!
//! A fixed set of ranks, listed in a host file, exchange large numeric
//! buffers over several parallel TCP connections per peer (one per
//! same-subnet interface pair) and synchronize over a separate token ring.
//! Receives can fold incoming elements into the destination on the fly.
//!
//! ```no_run
//! use bmpi::{BmpiConfig, Cluster, DataType, ReduceOp, buffer};
//!
//! # async fn run() -> bmpi::Result<()> {
//! let cluster = Cluster::init("hosts.txt", BmpiConfig::from_env()).await?;
//! let me = cluster.mynode();
//! let n = cluster.totalnode();
//!
//! let mine = buffer::to_bytes(&vec![me as f32; 4096]);
//! cluster.isend(mine.clone(), (me + 1) % n)?;
//! let id = cluster.irecv(mine, (me + n - 1) % n, DataType::F32, ReduceOp::Add)?;
//! let mut done = cluster.wait().await?;
//! let sum: Vec<f32> = buffer::from_bytes(&done.take(id).unwrap())?;
//! assert_eq!(sum.len(), 4096);
//! cluster.sync().await?;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod client;
pub mod cluster;
pub mod collective;
pub mod config;
pub mod error;
pub mod reduce;
mod reduce_simd;
pub mod transfer;
pub mod transport;
pub mod types;

pub use client::{BlockingCluster, Cluster};
pub use cluster::{HostEntry, HostList, Node, NodeRegistry};
pub use collective::{RingState, SyncRing};
pub use config::{BmpiConfig, SyncMismatchPolicy};
pub use error::{BmpiError, ProtocolError, Result};
pub use transfer::{Completed, TransferEngine};
pub use transport::PeerChannelBundle;
pub use types::{DataType, Rank, ReduceOp, TransferId};
