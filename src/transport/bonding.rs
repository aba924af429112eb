//! Channel bonding: agree on a set of parallel connections to one peer.
//!
//! The lower rank initiates. Channel 0 is mandatory and retried; extra
//! channels are attempted once each, and every failure is reported over
//! channel 0 so both sides end with the same bundle.

use crate::cluster::ChannelCandidate;
use crate::config::BmpiConfig;
use crate::error::{BmpiError, ProtocolError, Result};
use crate::transport::buffer_pool::BufferPool;
use crate::transport::channel::PeerChannelBundle;
use crate::transport::handshake::{
    CHANGE_CONNECTION_COUNT, accept_from, connect_with_retry, read_i32, try_connect, vet,
    write_i32,
};
use crate::types::Rank;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

/// Initiator side: connect to `peer` over up to `max_channels_per_peer` of
/// the given candidates.
pub async fn connect_bundle(
    my_rank: Rank,
    peer: Rank,
    candidates: &[ChannelCandidate],
    config: &BmpiConfig,
    pool: &Arc<BufferPool>,
) -> Result<PeerChannelBundle> {
    let streams = connect_streams(my_rank, peer, candidates, config).await?;
    PeerChannelBundle::from_streams(peer, streams, config, pool)
}

/// Acceptor side: take channel 0 from `peer` on `listener`, then the
/// additional channels it announces, up to `max_channels_per_peer` in all.
pub async fn accept_bundle(
    listener: &TcpListener,
    peer: Rank,
    config: &BmpiConfig,
    pool: &Arc<BufferPool>,
) -> Result<PeerChannelBundle> {
    let streams = accept_streams(listener, peer, config.max_channels_per_peer).await?;
    PeerChannelBundle::from_streams(peer, streams, config, pool)
}

pub(crate) async fn connect_streams(
    my_rank: Rank,
    peer: Rank,
    candidates: &[ChannelCandidate],
    config: &BmpiConfig,
) -> Result<Vec<TcpStream>> {
    let (first, mut ch0) = connect_with_retry(
        candidates,
        my_rank,
        peer,
        config.connect_retries,
        config.connect_retry_interval,
    )
    .await?;

    let extras: Vec<&ChannelCandidate> = candidates
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != first)
        .map(|(_, c)| c)
        .take(config.max_channels_per_peer.saturating_sub(1))
        .collect();
    write_i32(&mut ch0, extras.len() as i32)
        .await
        .map_err(|e| BmpiError::ConnectionFailed {
            rank: peer,
            reason: format!("announcing channel count: {e}"),
        })?;

    let mut streams = vec![ch0];
    for candidate in &extras {
        let established = match try_connect(candidate, my_rank, peer).await {
            Ok(Some(stream)) => Some(stream),
            Ok(None) => {
                tracing::warn!(peer, remote = %candidate.remote, "extra channel aborted by peer");
                None
            }
            Err(e) => {
                tracing::warn!(peer, remote = %candidate.remote, error = %e, "extra channel unavailable");
                None
            }
        };
        match established {
            Some(stream) => streams.push(stream),
            None => write_i32(&mut streams[0], CHANGE_CONNECTION_COUNT)
                .await
                .map_err(|_| BmpiError::PeerDisconnected { rank: peer })?,
        }
    }

    if streams.len() < extras.len() + 1 {
        tracing::warn!(
            peer,
            channels = streams.len(),
            offered = extras.len() + 1,
            "bundle degraded"
        );
    }
    tracing::debug!(peer, channels = streams.len(), "bundle connected");
    Ok(streams)
}

/// Extras past `max_channels - 1` are answered with `ABORT`; the initiator
/// then cancels them on channel 0 like any other failed extra.
pub(crate) async fn accept_streams(
    listener: &TcpListener,
    peer: Rank,
    max_channels: usize,
) -> Result<Vec<TcpStream>> {
    let mut ch0 = accept_from(listener, peer).await?;
    let announced = read_i32(&mut ch0)
        .await
        .map_err(|_| BmpiError::PeerDisconnected { rank: peer })?;
    if announced < 0 {
        return Err(ProtocolError::InvalidChannelCount {
            rank: peer,
            count: announced,
        }
        .into());
    }

    let mut pending = announced as usize;
    let room = max_channels.saturating_sub(1);
    if pending > room {
        tracing::warn!(peer, announced, limit = max_channels, "peer offers more channels than allowed");
    }
    let mut extras = Vec::with_capacity(pending.min(room));
    // Channel 0 is read without blocking so a half-read code survives the
    // select dropping this branch.
    let mut code = [0u8; 4];
    let mut filled = 0;
    while pending > 0 {
        tokio::select! {
            accepted = listener.accept() => {
                let (mut stream, addr) = accepted
                    .map_err(|e| BmpiError::transport_with_source("accept failed", e))?;
                stream.set_nodelay(true)?;
                match vet(&mut stream, peer, extras.len() < room).await {
                    Ok(true) => {
                        tracing::debug!(peer, channel = extras.len() + 1, %addr, "extra channel accepted");
                        extras.push(stream);
                        pending -= 1;
                    }
                    Ok(false) => {}
                    Err(e) => tracing::debug!(peer, %addr, error = %e, "extra channel handshake dropped"),
                }
            }
            ready = ch0.readable() => {
                ready?;
                match ch0.try_read(&mut code[filled..]) {
                    Ok(0) => return Err(BmpiError::PeerDisconnected { rank: peer }),
                    Ok(n) => {
                        filled += n;
                        if filled == code.len() {
                            filled = 0;
                            match i32::from_ne_bytes(code) {
                                CHANGE_CONNECTION_COUNT => {
                                    tracing::warn!(peer, "peer dropped an announced channel");
                                    pending -= 1;
                                }
                                other => {
                                    return Err(ProtocolError::UnexpectedReply {
                                        rank: peer,
                                        code: other,
                                    }
                                    .into());
                                }
                            }
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }

    let mut streams = Vec::with_capacity(extras.len() + 1);
    streams.push(ch0);
    streams.extend(extras);
    tracing::debug!(peer, channels = streams.len(), "bundle accepted");
    Ok(streams)
}
