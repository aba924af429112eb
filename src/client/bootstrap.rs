use crate::client::Cluster;
use crate::cluster::interfaces::resolve_host;
use crate::cluster::{ChannelCandidate, Discovery, HostEntry, HostList, NodeRegistry};
use crate::collective::SyncRing;
use crate::config::BmpiConfig;
use crate::error::{BmpiError, Result};
use crate::transfer::TransferEngine;
use crate::transport::bonding::{accept_bundle, connect_bundle};
use crate::transport::buffer_pool::BufferPool;
use crate::transport::channel::PeerChannelBundle;
use crate::transport::handshake::{accept_from, connect_with_retry};
use crate::types::Rank;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

impl Cluster {
    /// Join the cluster described by the host file at `path`.
    ///
    /// Binds the data and sync listeners on all interfaces, bonds channels
    /// to every peer (accepting from lower ranks, connecting to higher
    /// ones), closes the sync ring and runs `warmup_rounds` token rounds.
    pub async fn init(path: impl AsRef<Path>, config: BmpiConfig) -> Result<Cluster> {
        config.validate()?;
        let hosts = HostList::load(path)?;
        let registry = NodeRegistry::new(&hosts, &config)?;
        let me = registry.local();
        tracing::info!(
            rank = me.rank,
            world_size = registry.totalnode(),
            hostname = %me.hostname,
            "joining cluster"
        );

        let data_listener = bind((Ipv4Addr::UNSPECIFIED, me.data_port).into()).await?;
        let sync_listener = bind((Ipv4Addr::UNSPECIFIED, me.sync_port).into()).await?;
        let discovery = Discovery::detect(config.interface_filter.as_ref())?;

        establish(registry, config, data_listener, sync_listener, discovery).await
    }

    /// Bootstrap `world_size` ranks inside this process, all on loopback.
    ///
    /// Each rank gets `config.max_channels_per_peer` bonded channels to
    /// every peer.
    pub async fn bootstrap_local(world_size: u32, config: BmpiConfig) -> Result<Vec<Cluster>> {
        Self::bootstrap_local_with(vec![config; world_size as usize]).await
    }

    /// Like [`bootstrap_local`](Self::bootstrap_local) with one config per
    /// rank, e.g. to give ranks different channel limits.
    pub async fn bootstrap_local_with(configs: Vec<BmpiConfig>) -> Result<Vec<Cluster>> {
        if configs.is_empty() {
            return Err(BmpiError::InvalidConfig("world size must be at least 1".into()));
        }
        for config in &configs {
            config.validate()?;
        }
        // Both ends of a transfer must compute the same split.
        if configs.iter().any(|c| c.align_bytes != configs[0].align_bytes) {
            return Err(BmpiError::InvalidConfig(
                "all ranks must use the same align_bytes".into(),
            ));
        }

        let mut entries = Vec::with_capacity(configs.len());
        let mut listeners = Vec::with_capacity(configs.len());
        for _ in &configs {
            let data = bind((Ipv4Addr::LOCALHOST, 0).into()).await?;
            let sync = bind((Ipv4Addr::LOCALHOST, 0).into()).await?;
            entries.push(HostEntry::with_ports(
                Ipv4Addr::LOCALHOST.to_string(),
                data.local_addr()?.port(),
                sync.local_addr()?.port(),
            ));
            listeners.push((data, sync));
        }
        let hosts = HostList::from_entries(entries)?;

        let mut ranks = Vec::with_capacity(configs.len());
        for (rank, (config, (data, sync))) in configs.into_iter().zip(listeners).enumerate() {
            let registry = NodeRegistry::with_rank(&hosts, rank as Rank, &config)?;
            let discovery = Discovery::Loopback {
                channels: config.max_channels_per_peer,
            };
            ranks.push(establish(registry, config, data, sync, discovery));
        }
        futures::future::try_join_all(ranks).await
    }
}

async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| BmpiError::transport_with_source(format!("cannot listen on {addr}"), e))
}

/// Bond to every peer, close the ring and warm it up.
pub(crate) async fn establish(
    registry: NodeRegistry,
    config: BmpiConfig,
    data_listener: TcpListener,
    sync_listener: TcpListener,
    discovery: Discovery,
) -> Result<Cluster> {
    let rank = registry.mynode();
    let world_size = registry.totalnode();
    let pool = BufferPool::new(config.chunk_bytes);

    let (bundles, ring) = if world_size == 1 {
        (vec![None], SyncRing::single(&config))
    } else {
        tokio::try_join!(
            bond_all(&registry, &config, &data_listener, &discovery, &pool),
            close_ring(&registry, &config, &sync_listener),
        )?
    };

    let engine = TransferEngine::new(rank, bundles, &config)?;
    let cluster = Cluster {
        registry,
        config,
        engine,
        ring,
    };

    for _ in 0..cluster.config.warmup_rounds {
        cluster.sync_ring_token().await?;
    }
    tracing::info!(rank, world_size, "cluster ready");
    Ok(cluster)
}

/// Accept bundles from lower ranks (in rank order) while connecting to
/// higher ranks concurrently.
async fn bond_all(
    registry: &NodeRegistry,
    config: &BmpiConfig,
    listener: &TcpListener,
    discovery: &Discovery,
    pool: &Arc<BufferPool>,
) -> Result<Vec<Option<PeerChannelBundle>>> {
    let rank = registry.mynode();

    let accept_side = async {
        let mut accepted = Vec::with_capacity(rank as usize);
        for peer in 0..rank {
            accepted.push(accept_bundle(listener, peer, config, pool).await?);
        }
        Ok::<_, BmpiError>(accepted)
    };

    let connect_side = futures::future::try_join_all(
        registry.nodes()[rank as usize + 1..].iter().map(|node| async move {
            let candidates = discovery
                .candidates(&node.hostname, node.data_port, config.max_channels_per_peer)
                .await?;
            tracing::debug!(rank, peer = node.rank, candidates = candidates.len(), "bonding");
            connect_bundle(rank, node.rank, &candidates, config, pool).await
        }),
    );

    let (lower, higher) = tokio::try_join!(accept_side, connect_side)?;

    let mut bundles: Vec<Option<PeerChannelBundle>> = Vec::with_capacity(registry.nodes().len());
    bundles.extend(lower.into_iter().map(Some));
    bundles.push(None);
    bundles.extend(higher.into_iter().map(Some));
    for bundle in bundles.iter().flatten() {
        tracing::info!(rank, peer = bundle.peer(), channels = bundle.len(), "bundle ready");
    }
    Ok(bundles)
}

/// Connect to `next` and accept from `prev` on the sync port.
async fn close_ring(
    registry: &NodeRegistry,
    config: &BmpiConfig,
    listener: &TcpListener,
) -> Result<SyncRing<TcpStream>> {
    let me = registry.local();
    let next = registry
        .node(me.next_rank)
        .ok_or(BmpiError::InvalidRank {
            rank: me.next_rank,
            world_size: registry.totalnode(),
        })?;

    let to_next = async {
        let remote = ring_address(&next.hostname, next.sync_port).await?;
        let (_, stream) = connect_with_retry(
            &[ChannelCandidate {
                local: None,
                remote,
            }],
            me.rank,
            next.rank,
            config.connect_retries,
            config.connect_retry_interval,
        )
        .await?;
        Ok::<_, BmpiError>(stream)
    };
    let from_prev = accept_from(listener, me.prev_rank);

    let (to_next, from_prev) = tokio::try_join!(to_next, from_prev)?;
    tracing::debug!(rank = me.rank, prev = me.prev_rank, next = me.next_rank, "sync ring closed");
    Ok(SyncRing::new(me.rank, registry.totalnode(), from_prev, to_next, config))
}

async fn ring_address(host: &str, port: u16) -> Result<SocketAddr> {
    resolve_host(host, port)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| BmpiError::transport(format!("{host} has no IPv4 address")))
}
