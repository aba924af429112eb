use bmpi::{BmpiConfig, Cluster, SyncMismatchPolicy};
use std::sync::Arc;
use std::time::Duration;

/// Small alignment and an odd chunk size so even short buffers are split
/// across channels and reads end mid-element.
pub fn test_config() -> BmpiConfig {
    BmpiConfig {
        max_channels_per_peer: 3,
        align_bytes: 64,
        chunk_bytes: 1000,
        connect_retries: 200,
        connect_retry_interval: Duration::from_millis(10),
        sync_mismatch: SyncMismatchPolicy::Fail,
        ..Default::default()
    }
}

/// Helper: run the same closure on every rank of a local cluster.
/// Keeps all clusters alive until every task completes.
pub async fn run_collective<F, Fut>(world_size: u32, f: F)
where
    F: Fn(Arc<Cluster>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    run_collective_with(vec![test_config(); world_size as usize], f).await;
}

/// Like [`run_collective`] with one config per rank.
pub async fn run_collective_with<F, Fut>(configs: Vec<BmpiConfig>, f: F)
where
    F: Fn(Arc<Cluster>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let clusters = Cluster::bootstrap_local_with(configs).await.unwrap();
    let clusters: Vec<Arc<Cluster>> = clusters.into_iter().map(Arc::new).collect();

    let f = Arc::new(f);
    let mut handles = Vec::new();
    for c in &clusters {
        let c = Arc::clone(c);
        let f = Arc::clone(&f);
        handles.push(tokio::spawn(async move { f(c).await }));
    }
    for h in handles {
        h.await.unwrap();
    }
}

/// Deterministic test bytes.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}
