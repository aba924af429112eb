use super::helpers::{pattern, run_collective, test_config};
use bmpi::buffer::{from_bytes, to_bytes, zeroed};
use bmpi::{BmpiError, Cluster, DataType, ReduceOp};
use bytes::Bytes;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_roundtrip_every_type_and_length() {
    run_collective(2, |c| async move {
        for (seed, dtype) in DataType::ALL.into_iter().enumerate() {
            for k in [0usize, 1, 1024, 1037] {
                let len = k * dtype.size_in_bytes();
                let data = pattern(len, seed as u8);
                if c.mynode() == 0 {
                    c.isend(data, 1).unwrap();
                    c.wait_all_send().await.unwrap();
                } else {
                    let id = c.irecv(zeroed(len), 0, dtype, ReduceOp::None).unwrap();
                    let mut done = c.wait_all_recv().await.unwrap();
                    let got = done.take(id).unwrap();
                    assert_eq!(&got[..], &data[..], "{dtype} x {k} corrupted");
                }
            }
        }
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_back_to_back_transfers_keep_order() {
    run_collective(2, |c| async move {
        let first = pattern(5000, 1);
        let second = pattern(300, 2);
        if c.mynode() == 0 {
            c.isend(first, 1).unwrap();
            c.isend(second, 1).unwrap();
            c.wait().await.unwrap();
        } else {
            let a = c.irecv(zeroed(5000), 0, DataType::I8, ReduceOp::None).unwrap();
            let b = c.irecv(zeroed(300), 0, DataType::I8, ReduceOp::None).unwrap();
            let mut done = c.wait().await.unwrap();
            assert_eq!(done.len(), 2);
            assert_eq!(&done.take(a).unwrap()[..], &first[..]);
            assert_eq!(&done.take(b).unwrap()[..], &second[..]);
        }
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exchange_both_directions() {
    run_collective(2, |c| async move {
        let me = c.mynode();
        let peer = 1 - me;
        let values: Vec<f64> = (0..777).map(|i| i as f64 + me as f64 * 0.5).collect();
        c.isend(to_bytes(&values), peer).unwrap();
        let id = c
            .irecv(zeroed(777 * 8), peer, DataType::F64, ReduceOp::None)
            .unwrap();
        let mut done = c.wait().await.unwrap();
        let got: Vec<f64> = from_bytes(&done.take(id).unwrap()).unwrap();
        let expected: Vec<f64> = (0..777).map(|i| i as f64 + peer as f64 * 0.5).collect();
        assert_eq!(got, expected);
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_self_and_unknown_ranks_are_noops() {
    run_collective(2, |c| async move {
        let me = c.mynode();
        let original = pattern(100, 9);

        c.isend(Bytes::from(original.clone()), me).unwrap();
        c.isend(Bytes::from(original.clone()), 42).unwrap();
        let own = c
            .irecv(original.as_slice().into(), me, DataType::I32, ReduceOp::Add)
            .unwrap();
        let far = c
            .irecv(original.as_slice().into(), 42, DataType::I8, ReduceOp::None)
            .unwrap();

        let mut done = c.wait().await.unwrap();
        assert_eq!(&done.take(own).unwrap()[..], &original[..]);
        assert_eq!(&done.take(far).unwrap()[..], &original[..]);
        assert_eq!(c.pending().unwrap(), 0);
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bundle_sizes() {
    let clusters = Cluster::bootstrap_local(3, test_config()).await.unwrap();
    for c in &clusters {
        assert_eq!(c.totalnode(), 3);
        for peer in 0..3 {
            let expected = if peer == c.mynode() { None } else { Some(3) };
            assert_eq!(c.bundle_size(peer), expected);
        }
        assert_eq!(c.bundle_size(3), None);
        let node = c.node();
        assert_eq!(node.prev_rank, (node.rank + 2) % 3);
        assert_eq!(node.next_rank, (node.rank + 1) % 3);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reduce_rejects_partial_element() {
    let clusters = Cluster::bootstrap_local(2, test_config()).await.unwrap();
    let err = clusters[0]
        .irecv(zeroed(10), 1, DataType::F32, ReduceOp::Add)
        .unwrap_err();
    assert!(matches!(
        err,
        BmpiError::UnalignedLength {
            length: 10,
            dtype: DataType::F32
        }
    ));
    // Plain receives have no element framing.
    clusters[0]
        .isend(Bytes::from(pattern(10, 0)), 1)
        .unwrap();
    let id = clusters[1]
        .irecv(zeroed(10), 0, DataType::F32, ReduceOp::None)
        .unwrap();
    clusters[0].wait().await.unwrap();
    let mut done = clusters[1].wait().await.unwrap();
    assert_eq!(&done.take(id).unwrap()[..], &pattern(10, 0)[..]);
}
