//! Allreduce around the node ring with `irecvsend` relays.
//!
//! The reduction flows 0 -> 1 -> ... -> n-1, each rank adding its own data
//! while forwarding. The last rank then starts the total back around the
//! ring until every rank holds it.
//!
//! ```bash
//! # four ranks in this process
//! cargo run --example ring_reduce
//! # one rank per machine listed in a host file
//! cargo run --example ring_reduce -- hosts.txt
//! ```

use bmpi::buffer::{from_bytes, to_bytes, zeroed};
use bmpi::{BmpiConfig, Cluster, DataType, ReduceOp};
use std::sync::Arc;
use std::time::Instant;

const COUNT: usize = 1 << 20;

async fn allreduce(c: &Cluster) -> bmpi::Result<Vec<f32>> {
    let me = c.mynode();
    let n = c.totalnode();
    let mine = to_bytes(&vec![me as f32; COUNT]);
    if n == 1 {
        return from_bytes(&mine);
    }
    let prev = c.node().prev_rank;
    let next = c.node().next_rank;
    let last = n - 1;

    // Reduce along the ring.
    let partial = if me == 0 {
        c.isend(mine, next)?;
        None
    } else if me < last {
        Some(c.irecvsend(mine, prev, next, DataType::F32, ReduceOp::Add)?)
    } else {
        Some(c.irecv(mine, prev, DataType::F32, ReduceOp::Add)?)
    };
    let mut done = c.wait().await?;
    let total = partial.and_then(|id| done.take(id));

    // Spread the total, starting from the last rank.
    let result = if me == last {
        let total = total.ok_or(bmpi::BmpiError::Cancelled)?;
        c.isend(total.clone(), next)?;
        c.wait().await?;
        total
    } else {
        let id = if next == last {
            c.irecv(zeroed(COUNT * 4), prev, DataType::F32, ReduceOp::None)?
        } else {
            c.irecvsend(zeroed(COUNT * 4), prev, next, DataType::F32, ReduceOp::None)?
        };
        c.wait().await?.take(id).ok_or(bmpi::BmpiError::Cancelled)?
    };
    from_bytes(&result)
}

#[tokio::main]
async fn main() -> bmpi::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let clusters: Vec<Arc<Cluster>> = match std::env::args().nth(1) {
        Some(path) => vec![Cluster::init(path, BmpiConfig::from_env()).await?],
        None => Cluster::bootstrap_local(4, BmpiConfig::from_env()).await?,
    }
    .into_iter()
    .map(Arc::new)
    .collect();

    let mut handles = Vec::new();
    for cluster in &clusters {
        let c = Arc::clone(cluster);
        handles.push(tokio::spawn(async move {
            let start = Instant::now();
            let sum = allreduce(&c).await?;
            c.sync().await?;
            bmpi::Result::Ok((c.mynode(), sum[0], start.elapsed()))
        }));
    }

    for h in handles {
        let (rank, value, elapsed) = h.await.expect("rank task panicked")?;
        println!("rank {rank}: every element = {value} ({elapsed:?})");
    }
    // With four local ranks: 0 + 1 + 2 + 3 = 6 on every rank.

    Ok(())
}
