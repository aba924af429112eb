use super::helpers::{pattern, run_collective_with, test_config};
use bmpi::buffer::{from_bytes, to_bytes, zeroed};
use bmpi::cluster::ChannelCandidate;
use bmpi::transport::{BufferPool, accept_bundle, connect_bundle};
use bmpi::{BmpiConfig, DataType, ReduceOp, TransferEngine};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpListener;

fn config() -> BmpiConfig {
    BmpiConfig {
        max_channels_per_peer: 4,
        align_bytes: 64,
        chunk_bytes: 512,
        connect_retries: 100,
        connect_retry_interval: Duration::from_millis(10),
        ..Default::default()
    }
}

fn candidate(remote: SocketAddr) -> ChannelCandidate {
    ChannelCandidate {
        local: Some(Ipv4Addr::LOCALHOST),
        remote,
    }
}

/// An address nothing listens on.
async fn dead_address() -> SocketAddr {
    let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = l.local_addr().unwrap();
    drop(l);
    addr
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_extra_shrinks_both_sides() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let good = listener.local_addr().unwrap();
    let dead = dead_address().await;
    let cfg = config();
    let pool = BufferPool::new(cfg.chunk_bytes);

    let candidates = [candidate(good), candidate(dead), candidate(good)];
    let (initiator, acceptor) = tokio::try_join!(
        connect_bundle(0, 1, &candidates, &cfg, &pool),
        accept_bundle(&listener, 0, &cfg, &pool),
    )
    .unwrap();
    assert_eq!(initiator.len(), 2);
    assert_eq!(acceptor.len(), 2);
    assert_eq!(initiator.peer(), 1);
    assert_eq!(acceptor.peer(), 0);

    // The surviving channels carry a transfer end to end.
    let sender = TransferEngine::new(0, vec![None, Some(initiator)], &cfg).unwrap();
    let receiver = TransferEngine::new(1, vec![Some(acceptor), None], &cfg).unwrap();
    let values: Vec<i64> = (0..4001).collect();
    sender.isend(to_bytes(&values).freeze(), 1).unwrap();
    let id = receiver
        .irecv(zeroed(values.len() * 8), 0, DataType::I64, ReduceOp::None)
        .unwrap();

    let (_, mut done) = tokio::try_join!(sender.wait(), receiver.wait()).unwrap();
    let got: Vec<i64> = from_bytes(&done.take(id).unwrap()).unwrap();
    assert_eq!(got, values);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_only_dead_extras_leaves_one_channel() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let good = listener.local_addr().unwrap();
    let dead = dead_address().await;
    let cfg = config();
    let pool = BufferPool::new(cfg.chunk_bytes);

    let candidates = [candidate(good), candidate(dead)];
    let (initiator, acceptor) = tokio::try_join!(
        connect_bundle(0, 1, &candidates, &cfg, &pool),
        accept_bundle(&listener, 0, &cfg, &pool),
    )
    .unwrap();
    assert_eq!(initiator.len(), 1);
    assert_eq!(acceptor.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_wrong_rank_is_aborted_and_retries() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cfg = config();
    let pool = BufferPool::new(cfg.chunk_bytes);

    // The acceptor serves rank 0 before rank 1.
    let acceptor = async {
        let first = accept_bundle(&listener, 0, &cfg, &pool).await?;
        let second = accept_bundle(&listener, 1, &cfg, &pool).await?;
        Ok::<_, bmpi::BmpiError>((first, second))
    };
    // Rank 1 dials first and is turned away until rank 0 is done.
    let late = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        connect_bundle(0, 2, &[candidate(addr)], &cfg, &pool).await
    };
    let early_candidates = [candidate(addr)];
    let early = connect_bundle(1, 2, &early_candidates, &cfg, &pool);

    let ((first, second), from_zero, from_one) =
        tokio::try_join!(acceptor, late, early).unwrap();
    assert_eq!(first.peer(), 0);
    assert_eq!(second.peer(), 1);
    assert_eq!(from_zero.len(), 1);
    assert_eq!(from_one.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unreachable_peer_gives_up() {
    let dead = dead_address().await;
    let cfg = BmpiConfig {
        connect_retries: 2,
        connect_retry_interval: Duration::from_millis(5),
        ..config()
    };
    let pool = BufferPool::new(cfg.chunk_bytes);
    let err = connect_bundle(0, 1, &[candidate(dead)], &cfg, &pool)
        .await
        .unwrap_err();
    assert!(
        matches!(err, bmpi::BmpiError::ConnectionFailed { rank: 1, .. }),
        "{err:?}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bundle_respects_both_limits() {
    let with_channels = |max| BmpiConfig {
        max_channels_per_peer: max,
        ..test_config()
    };
    run_collective_with(vec![with_channels(4), with_channels(1)], |c| async move {
        let peer = 1 - c.mynode();
        assert_eq!(c.bundle_size(peer), Some(1));

        let data = pattern(10_000, 9);
        if c.mynode() == 0 {
            c.isend(data, peer).unwrap();
            c.wait().await.unwrap();
        } else {
            let id = c
                .irecv(zeroed(data.len()), peer, DataType::I8, ReduceOp::None)
                .unwrap();
            let got = c.wait().await.unwrap().take(id).unwrap();
            assert_eq!(&got[..], &data[..]);
        }
    })
    .await;
}
