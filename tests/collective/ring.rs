use super::helpers::{run_collective, run_collective_with, test_config};
use bmpi::buffer::{from_bytes, to_bytes, zeroed};
use bmpi::{BmpiConfig, DataType, ReduceOp};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_three_node_ring_add() {
    run_collective(3, |c| async move {
        let me = c.mynode();
        let n = c.totalnode();
        let prev = (me + n - 1) % n;
        let next = (me + 1) % n;

        let mine = to_bytes(&vec![me as f32; 4096]);
        c.isend(mine.clone(), next).unwrap();
        let id = c.irecv(mine, prev, DataType::F32, ReduceOp::Add).unwrap();
        let mut done = c.wait().await.unwrap();

        let got: Vec<f32> = from_bytes(&done.take(id).unwrap()).unwrap();
        let expected = (me + prev) as f32;
        assert!(
            got.iter().all(|&v| v == expected),
            "rank {me}: expected {expected}, got {}",
            got[0]
        );
        c.sync().await.unwrap();
    })
    .await;
}

/// 0 -> 1 -> 2: rank 1 adds its own values and forwards the sum.
async fn relay_chain(c: std::sync::Arc<bmpi::Cluster>, len: usize) {
    let me = c.mynode();
    let values = |r: u32| -> Vec<i32> { (0..len as i32).map(|i| i + 1000 * r as i32).collect() };
    match me {
        0 => {
            c.isend(to_bytes(&values(0)), 1).unwrap();
            c.wait().await.unwrap();
        }
        1 => {
            let id = c
                .irecvsend(to_bytes(&values(1)), 0, 2, DataType::I32, ReduceOp::Add)
                .unwrap();
            let mut done = c.wait().await.unwrap();
            let sum: Vec<i32> = from_bytes(&done.take(id).unwrap()).unwrap();
            let expected: Vec<i32> = values(0).iter().zip(values(1)).map(|(a, b)| a + b).collect();
            assert_eq!(sum, expected);
        }
        _ => {
            let id = c
                .irecv(zeroed(len * 4), 1, DataType::I32, ReduceOp::None)
                .unwrap();
            let got: Vec<i32> = from_bytes(&c.wait().await.unwrap().take(id).unwrap()).unwrap();
            let expected: Vec<i32> = values(0).iter().zip(values(1)).map(|(a, b)| a + b).collect();
            assert_eq!(got, expected);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_irecvsend_pipelined() {
    run_collective(3, |c| async move {
        assert_eq!(c.bundle_size((c.mynode() + 1) % 3), Some(3));
        relay_chain(c, 20_000).await;
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_irecvsend_with_uneven_bundles() {
    let with_channels = |max| BmpiConfig {
        max_channels_per_peer: max,
        ..test_config()
    };
    // Each pair gets the smaller of its two limits: rank 1 relays from a
    // single channel onto three.
    let configs = vec![with_channels(1), with_channels(3), with_channels(3)];
    run_collective_with(configs, |c| async move {
        if c.mynode() == 1 {
            assert_eq!(c.bundle_size(0), Some(1));
            assert_eq!(c.bundle_size(2), Some(3));
        }
        relay_chain(c, 9_999).await;
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ring_allreduce_with_relays() {
    // Chain reduce 0 -> 1 -> 2 -> 3, then 3 sends the total back to all.
    run_collective(4, |c| async move {
        let me = c.mynode();
        let n = c.totalnode();
        let len = 3000;
        let mine = to_bytes(&vec![(me + 1) as f64; len]);
        let total = (1..=n).sum::<u32>() as f64;

        let result = match me {
            0 => {
                c.isend(mine, 1).unwrap();
                c.wait().await.unwrap();
                None
            }
            r if r + 1 < n => {
                c.irecvsend(mine, r - 1, r + 1, DataType::F64, ReduceOp::Add)
                    .unwrap();
                c.wait().await.unwrap();
                None
            }
            r => {
                let id = c.irecv(mine, r - 1, DataType::F64, ReduceOp::Add).unwrap();
                Some(c.wait().await.unwrap().take(id).unwrap())
            }
        };

        // Broadcast the total from the last rank.
        let last = n - 1;
        if let Some(total_buf) = result {
            for peer in 0..last {
                c.isend(total_buf.clone(), peer).unwrap();
            }
            c.wait_all_send().await.unwrap();
            let got: Vec<f64> = from_bytes(&total_buf).unwrap();
            assert!(got.iter().all(|&v| v == total));
        } else {
            let id = c
                .irecv(zeroed(len * 8), last, DataType::F64, ReduceOp::None)
                .unwrap();
            let got: Vec<f64> = from_bytes(&c.wait().await.unwrap().take(id).unwrap()).unwrap();
            assert!(got.iter().all(|&v| v == total), "rank {me} got {}", got[0]);
        }
        c.sync().await.unwrap();
    })
    .await;
}
