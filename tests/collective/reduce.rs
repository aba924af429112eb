use super::helpers::run_collective;
use bmpi::buffer::{Element, from_bytes, to_bytes, zeroed};
use bmpi::{Cluster, DataType, ReduceOp};
use std::sync::Arc;

/// Rank 0 sends `values` `m` times; rank 1 folds each copy into one
/// accumulator with `add`.
async fn accumulate<T: Element + PartialEq + std::fmt::Debug>(
    c: Arc<Cluster>,
    values: Vec<T>,
    m: usize,
    scale: impl Fn(&T, usize) -> T,
) {
    let bytes = to_bytes(&values).freeze();
    if c.mynode() == 0 {
        for _ in 0..m {
            c.isend(bytes.clone(), 1).unwrap();
        }
        c.wait_all_send().await.unwrap();
    } else {
        let mut acc = zeroed(bytes.len());
        for _ in 0..m {
            let id = c.irecv(acc, 0, T::DATA_TYPE, ReduceOp::Add).unwrap();
            acc = c.wait_all_recv().await.unwrap().take(id).unwrap();
        }
        let got: Vec<T> = from_bytes(&acc).unwrap();
        let expected: Vec<T> = values.iter().map(|v| scale(v, m)).collect();
        assert_eq!(got, expected, "{} accumulation", T::DATA_TYPE);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_repeated_add_i32() {
    run_collective(2, |c| async move {
        let values: Vec<i32> = (0..2501).map(|i| i * 3 - 1000).collect();
        accumulate(c, values, 5, |v, m| v * m as i32).await;
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_repeated_add_i16_wraps() {
    run_collective(2, |c| async move {
        let values: Vec<i16> = (0..999).map(|i| (i * 97) as i16).collect();
        accumulate(c, values, 4, |v, m| v.wrapping_mul(m as i16)).await;
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_repeated_add_f64() {
    run_collective(2, |c| async move {
        let values: Vec<f64> = (0..1234).map(|i| i as f64 * 0.25).collect();
        accumulate(c, values, 4, |v, m| v * m as f64).await;
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_repeated_add_vector_lanes() {
    run_collective(2, |c| async move {
        let values: Vec<[f32; 4]> = (0..333)
            .map(|i| {
                let x = i as f32;
                [x, -x, x * 0.5, 1.0]
            })
            .collect();
        accumulate(c, values, 3, |v, m| v.map(|l| l * m as f32)).await;
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_each_operator() {
    run_collective(2, |c| async move {
        let n = 1500;
        // 100 OP 4 for every operator.
        let expected = |op: ReduceOp| match op {
            ReduceOp::None => 4.0f32,
            ReduceOp::Add => 104.0,
            ReduceOp::Sub => 96.0,
            ReduceOp::Mul => 400.0,
            ReduceOp::Div => 25.0,
        };
        if c.mynode() == 0 {
            for _ in ReduceOp::ALL {
                c.isend(to_bytes(&vec![4.0f32; n]), 1).unwrap();
            }
            c.wait().await.unwrap();
        } else {
            let ids: Vec<_> = ReduceOp::ALL
                .iter()
                .map(|&op| {
                    c.irecv(to_bytes(&vec![100.0f32; n]), 0, DataType::F32, op)
                        .unwrap()
                })
                .collect();
            let mut done = c.wait().await.unwrap();
            for (id, op) in ids.into_iter().zip(ReduceOp::ALL) {
                let got: Vec<f32> = from_bytes(&done.take(id).unwrap()).unwrap();
                assert!(got.iter().all(|&v| v == expected(op)), "{op} gave {:?}", &got[..4]);
            }
        }
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_integer_division_by_zero() {
    run_collective(2, |c| async move {
        if c.mynode() == 0 {
            c.isend(to_bytes(&[0i64, 2, 0, -3]), 1).unwrap();
            c.wait().await.unwrap();
        } else {
            let id = c
                .irecv(to_bytes(&[7i64, 9, -1, 12]), 0, DataType::I64, ReduceOp::Div)
                .unwrap();
            let got: Vec<i64> = from_bytes(&c.wait().await.unwrap().take(id).unwrap()).unwrap();
            assert_eq!(got, vec![0, 4, 0, -4]);
        }
    })
    .await;
}
