//! Rank handshake for data channels and sync-ring links.
//!
//! Wire format, all `i32` in host byte order:
//! - initiator → acceptor: own rank
//! - acceptor → initiator: [`ACCEPT_OK`] or [`ABORT`]
//! - channel 0 only, initiator → acceptor: number of additional channels,
//!   later followed by one [`CHANGE_CONNECTION_COUNT`] per extra channel
//!   that could not be opened.

use crate::cluster::ChannelCandidate;
use crate::error::{BmpiError, ProtocolError, Result};
use crate::types::Rank;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

/// The acceptor was expecting a different rank.
pub const ABORT: i32 = -1;
/// An announced additional channel will not arrive.
pub const CHANGE_CONNECTION_COUNT: i32 = -2;
/// The declared rank is the one being accepted.
pub const ACCEPT_OK: i32 = -3;

pub(crate) async fn write_i32<W: AsyncWrite + Unpin>(w: &mut W, value: i32) -> std::io::Result<()> {
    w.write_all(&value.to_ne_bytes()).await
}

pub(crate) async fn read_i32<R: AsyncRead + Unpin>(r: &mut R) -> std::io::Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).await?;
    Ok(i32::from_ne_bytes(buf))
}

/// Open a TCP connection for `candidate`, binding its local address if set.
pub(crate) async fn dial(candidate: &ChannelCandidate) -> std::io::Result<TcpStream> {
    let socket = match candidate.remote {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    if let Some(local) = candidate.local {
        socket.bind(SocketAddr::from((local, 0)))?;
    }
    let stream = socket.connect(candidate.remote).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Dial and declare `my_rank`. `Ok(None)` means the acceptor replied
/// [`ABORT`].
pub(crate) async fn try_connect(
    candidate: &ChannelCandidate,
    my_rank: Rank,
    peer: Rank,
) -> Result<Option<TcpStream>> {
    let mut stream = dial(candidate).await?;
    write_i32(&mut stream, my_rank as i32).await?;
    match read_i32(&mut stream).await? {
        ACCEPT_OK => Ok(Some(stream)),
        ABORT => Ok(None),
        code => Err(ProtocolError::UnexpectedReply { rank: peer, code }.into()),
    }
}

/// Establish the mandatory first link to `peer`.
///
/// Each round tries the candidates in order; the first accepted one wins.
/// Rounds repeat `retries` times while the peer refuses or aborts.
/// Returns the index of the winning candidate with its stream.
pub(crate) async fn connect_with_retry(
    candidates: &[ChannelCandidate],
    my_rank: Rank,
    peer: Rank,
    retries: u32,
    interval: Duration,
) -> Result<(usize, TcpStream)> {
    if candidates.is_empty() {
        return Err(BmpiError::ConnectionFailed {
            rank: peer,
            reason: "no candidate addresses".into(),
        });
    }
    let mut last_reason = String::new();
    for attempt in 0..=retries {
        for (i, candidate) in candidates.iter().enumerate() {
            match try_connect(candidate, my_rank, peer).await {
                Ok(Some(stream)) => {
                    tracing::debug!(peer, attempt, remote = %candidate.remote, "link established");
                    return Ok((i, stream));
                }
                Ok(None) => {
                    tracing::warn!(peer, attempt, "peer is accepting another rank, retrying");
                    last_reason = "peer aborted handshake".into();
                    break;
                }
                Err(BmpiError::Io(e)) => {
                    tracing::trace!(peer, attempt, remote = %candidate.remote, error = %e, "connect failed");
                    last_reason = e.to_string();
                }
                Err(e) => return Err(e),
            }
        }
        if attempt < retries {
            tokio::time::sleep(interval).await;
        }
    }
    Err(BmpiError::ConnectionFailed {
        rank: peer,
        reason: format!("{last_reason} (after {} attempts)", retries as u64 + 1),
    })
}

/// Read a declared rank and answer it. Returns whether the connection was
/// kept: the rank must be `expected` and `admit` must hold.
pub(crate) async fn vet(stream: &mut TcpStream, expected: Rank, admit: bool) -> Result<bool> {
    let declared = read_i32(stream).await?;
    if declared == expected as i32 && admit {
        write_i32(stream, ACCEPT_OK).await?;
        return Ok(true);
    }
    if declared == expected as i32 {
        tracing::debug!(peer = expected, "refusing channel beyond the local limit");
    } else {
        tracing::debug!(expected, declared, "rejecting connection from unexpected rank");
    }
    // The connection is closed either way.
    let _ = write_i32(stream, ABORT).await;
    Ok(false)
}

/// Accept connections until one declares `expected`.
pub(crate) async fn accept_from(listener: &TcpListener, expected: Rank) -> Result<TcpStream> {
    loop {
        let (mut stream, addr) = listener
            .accept()
            .await
            .map_err(|e| BmpiError::transport_with_source("accept failed", e))?;
        stream.set_nodelay(true)?;
        match vet(&mut stream, expected, true).await {
            Ok(true) => {
                tracing::debug!(peer = expected, %addr, "link accepted");
                return Ok(stream);
            }
            Ok(false) => {}
            Err(BmpiError::Io(e)) => {
                tracing::debug!(peer = expected, %addr, error = %e, "handshake dropped");
            }
            Err(e) => return Err(e),
        }
    }
}
