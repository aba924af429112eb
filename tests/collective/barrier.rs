use super::helpers::{run_collective, test_config};
use bmpi::Cluster;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sync_waits_for_every_rank() {
    let arrived = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&arrived);
    run_collective(4, move |c| {
        let arrived = Arc::clone(&counter);
        async move {
            for round in 1..=3u32 {
                // Later ranks show up later.
                tokio::time::sleep(Duration::from_millis(15 * c.mynode() as u64)).await;
                arrived.fetch_add(1, Ordering::SeqCst);
                c.sync().await.unwrap();
                assert!(
                    arrived.load(Ordering::SeqCst) >= round * c.totalnode(),
                    "rank {} left round {round} early",
                    c.mynode()
                );
                // Nobody may start the next round before everyone left this one.
                c.sync().await.unwrap();
            }
        }
    })
    .await;
    assert_eq!(arrived.load(Ordering::SeqCst), 12);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_token_rounds_keep_order() {
    // Fail policy: any out-of-order token surfaces as an error.
    run_collective(3, |c| async move {
        for _ in 0..20 {
            c.sync_ring_token().await.unwrap();
        }
        c.sync().await.unwrap();
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sync_between_transfers() {
    run_collective(3, |c| async move {
        let n = c.totalnode();
        let next = (c.mynode() + 1) % n;
        let prev = (c.mynode() + n - 1) % n;
        c.isend(vec![c.mynode() as u8; 300], next).unwrap();
        c.wait_all_send().await.unwrap();
        c.sync().await.unwrap();
        assert_eq!(c.pending().unwrap(), 0);

        // Everything sent before the barrier is already waiting.
        let id = c
            .irecv(bmpi::buffer::zeroed(300), prev, bmpi::DataType::I8, bmpi::ReduceOp::None)
            .unwrap();
        let got = c.wait_all_recv().await.unwrap().take(id).unwrap();
        assert!(got.iter().all(|&b| b == prev as u8));
    })
    .await;
}

#[tokio::test]
async fn test_single_node_cluster() {
    let mut clusters = Cluster::bootstrap_local(1, test_config()).await.unwrap();
    let c = clusters.pop().unwrap();
    assert_eq!(c.mynode(), 0);
    assert_eq!(c.totalnode(), 1);
    assert_eq!(c.node().prev_rank, 0);
    assert_eq!(c.node().next_rank, 0);
    c.sync().await.unwrap();
    c.sync_ring_token().await.unwrap();
    assert_eq!(c.bundle_size(0), None);
}
