mod bootstrap;
mod cluster;
mod sync_client;

pub use cluster::Cluster;
pub use sync_client::BlockingCluster;
