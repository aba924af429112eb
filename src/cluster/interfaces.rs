//! Local interface enumeration and same-subnet candidate pairing for
//! bonded channels.

use crate::error::{BmpiError, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// An IPv4 address bound to a local network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalInterface {
    pub name: String,
    pub addr: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

impl LocalInterface {
    /// True if `remote` shares this interface's network prefix.
    pub fn same_subnet(&self, remote: Ipv4Addr) -> bool {
        let mask = u32::from(self.netmask);
        u32::from(self.addr) & mask == u32::from(remote) & mask
    }
}

/// Interface name filter in the usual `SOCKET_IFNAME` syntax.
///
/// A comma-separated list of name prefixes. A leading `^` inverts the
/// match, a following `=` requires exact names: `^docker,lo` skips
/// docker bridges and loopback, `=eth0,eth1` selects exactly those two.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InterfaceFilter {
    exclude: bool,
    exact: bool,
    names: Vec<String>,
}

impl InterfaceFilter {
    pub fn parse(list: &str) -> Self {
        let mut rest = list.trim();
        let exclude = rest.starts_with('^');
        if exclude {
            rest = &rest[1..];
        }
        let exact = rest.starts_with('=');
        if exact {
            rest = &rest[1..];
        }
        let names = rest
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        Self {
            exclude,
            exact,
            names,
        }
    }

    /// An empty filter matches every interface.
    pub fn matches(&self, name: &str) -> bool {
        if self.names.is_empty() {
            return true;
        }
        let hit = self.names.iter().any(|n| {
            if self.exact {
                n == name
            } else {
                name.starts_with(n.as_str())
            }
        });
        hit ^ self.exclude
    }
}

/// Enumerate IPv4 interfaces that carry a netmask.
pub fn local_interfaces(filter: Option<&InterfaceFilter>) -> Result<Vec<LocalInterface>> {
    let addrs = nix::ifaddrs::getifaddrs()
        .map_err(|e| BmpiError::transport_with_source("failed to list network interfaces", e))?;

    let mut found: Vec<LocalInterface> = Vec::new();
    for ifaddr in addrs {
        if filter.is_some_and(|f| !f.matches(&ifaddr.interface_name)) {
            continue;
        }
        let (Some(addr), Some(mask)) = (ifaddr.address, ifaddr.netmask) else {
            continue;
        };
        let (Some(addr), Some(mask)) = (addr.as_sockaddr_in(), mask.as_sockaddr_in()) else {
            continue;
        };
        let iface = LocalInterface {
            name: ifaddr.interface_name.clone(),
            addr: addr.ip(),
            netmask: mask.ip(),
        };
        tracing::trace!(name = %iface.name, addr = %iface.addr, netmask = %iface.netmask, "found interface");
        if !found.iter().any(|f| f.addr == iface.addr) {
            found.push(iface);
        }
    }
    Ok(found)
}

/// Resolve `host:port` to its IPv4 socket addresses, in resolver order.
pub async fn resolve_host(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let resolved = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| BmpiError::transport_with_source(format!("cannot resolve {host}"), e))?;
    let mut out: Vec<SocketAddr> = Vec::new();
    for addr in resolved.filter(SocketAddr::is_ipv4) {
        if !out.contains(&addr) {
            out.push(addr);
        }
    }
    Ok(out)
}

/// One (local, remote) pair that may carry a bonded channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelCandidate {
    /// Source address to bind; `None` lets the OS choose.
    pub local: Option<Ipv4Addr>,
    pub remote: SocketAddr,
}

/// Same-subnet pairs in enumeration order, de-duplicated and capped at
/// `max`. Falls back to a single OS-routed candidate to the first remote
/// address when no pair shares a subnet.
pub fn candidate_pairs(
    locals: &[LocalInterface],
    remotes: &[SocketAddr],
    max: usize,
) -> Vec<ChannelCandidate> {
    let mut out = Vec::new();
    'outer: for local in locals {
        for remote in remotes {
            let IpAddr::V4(ip) = remote.ip() else {
                continue;
            };
            if !local.same_subnet(ip) {
                continue;
            }
            let candidate = ChannelCandidate {
                local: Some(local.addr),
                remote: *remote,
            };
            if !out.contains(&candidate) {
                out.push(candidate);
                if out.len() >= max {
                    break 'outer;
                }
            }
        }
    }
    if out.is_empty()
        && let Some(remote) = remotes.first()
    {
        out.push(ChannelCandidate {
            local: None,
            remote: *remote,
        });
    }
    out
}

/// How a node finds the channel candidates for a peer.
#[derive(Debug, Clone)]
pub enum Discovery {
    /// Pair the given local interfaces with the peer's resolved addresses.
    Interfaces(Vec<LocalInterface>),
    /// Every peer lives on this host; offer `channels` loopback candidates.
    Loopback { channels: usize },
}

impl Discovery {
    /// Enumerate the host's interfaces once, up front.
    pub fn detect(filter: Option<&InterfaceFilter>) -> Result<Self> {
        let locals = local_interfaces(filter)?;
        tracing::debug!(count = locals.len(), "discovered local interfaces");
        Ok(Self::Interfaces(locals))
    }

    /// Candidates for reaching `host:port`, at most `max` of them.
    pub async fn candidates(
        &self,
        host: &str,
        port: u16,
        max: usize,
    ) -> Result<Vec<ChannelCandidate>> {
        match self {
            Self::Interfaces(locals) => {
                let remotes = resolve_host(host, port).await?;
                Ok(candidate_pairs(locals, &remotes, max))
            }
            Self::Loopback { channels } => {
                let remote = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
                let candidate = ChannelCandidate {
                    local: Some(Ipv4Addr::LOCALHOST),
                    remote,
                };
                Ok(vec![candidate; (*channels).min(max).max(1)])
            }
        }
    }
}
