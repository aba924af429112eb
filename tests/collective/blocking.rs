use super::helpers::test_config;
use bmpi::buffer::{from_bytes, to_bytes};
use bmpi::{BlockingCluster, DataType, ReduceOp};

#[test]
fn test_blocking_exchange_from_threads() {
    let clusters = BlockingCluster::bootstrap_local(2, test_config()).unwrap();
    let threads: Vec<_> = clusters
        .into_iter()
        .map(|c| {
            std::thread::spawn(move || {
                let me = c.mynode();
                let peer = 1 - me;
                let mine = to_bytes(&vec![(me + 1) as f64; 2048]);
                c.isend(mine.clone(), peer).unwrap();
                let id = c.irecv(mine, peer, DataType::F64, ReduceOp::Mul).unwrap();
                let mut done = c.wait().unwrap();
                let got: Vec<f64> = from_bytes(&done.take(id).unwrap()).unwrap();
                assert!(got.iter().all(|&v| v == 2.0));
                c.sync().unwrap();
                c
            })
        })
        .collect();
    let clusters: Vec<BlockingCluster> = threads.into_iter().map(|t| t.join().unwrap()).collect();
    assert_eq!(clusters.len(), 2);
}
