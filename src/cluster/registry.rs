//! Host list parsing and rank assignment.
//!
//! The host file is a node count followed by one host per rank:
//!
//! ```text
//! # comments and blank lines are skipped
//! 3
//! node01
//! node02 37000        # data port override
//! node03 37000 37001  # data and sync port overrides
//! ```

use crate::config::BmpiConfig;
use crate::error::{BmpiError, Result};
use crate::types::Rank;
use std::path::Path;

/// One line of the host list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    pub hostname: String,
    pub data_port: Option<u16>,
    pub sync_port: Option<u16>,
}

impl HostEntry {
    /// An entry that uses the configured well-known ports.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            data_port: None,
            sync_port: None,
        }
    }

    /// An entry with explicit ports.
    pub fn with_ports(hostname: impl Into<String>, data_port: u16, sync_port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            data_port: Some(data_port),
            sync_port: Some(sync_port),
        }
    }
}

/// The ordered host list; position is rank.
#[derive(Debug, Clone)]
pub struct HostList {
    entries: Vec<HostEntry>,
}

impl HostList {
    /// Parse host-file text.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim()))
            .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'));

        let (count_line, count_text) = lines.next().ok_or(BmpiError::ConfigParse {
            line: 0,
            reason: "empty host file".into(),
        })?;
        let count: usize = strip_comment(count_text)
            .parse()
            .map_err(|_| BmpiError::ConfigParse {
                line: count_line,
                reason: format!("expected node count, found {count_text:?}"),
            })?;
        if count == 0 {
            return Err(BmpiError::ConfigParse {
                line: count_line,
                reason: "node count must be at least 1".into(),
            });
        }
        if count > Rank::MAX as usize {
            return Err(BmpiError::ConfigParse {
                line: count_line,
                reason: format!("node count {count} is too large"),
            });
        }

        let mut entries = Vec::with_capacity(count);
        let mut last_line = count_line;
        for (line, text) in lines.take(count) {
            entries.push(parse_host_line(line, text)?);
            last_line = line;
        }
        if entries.len() < count {
            return Err(BmpiError::ConfigParse {
                line: last_line,
                reason: format!("expected {count} hosts, found {}", entries.len()),
            });
        }
        Ok(Self { entries })
    }

    /// Read and parse a host file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| BmpiError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Build a list directly, e.g. for in-process clusters.
    pub fn from_entries(entries: Vec<HostEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(BmpiError::InvalidConfig("host list is empty".into()));
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[HostEntry] {
        &self.entries
    }

    /// First position whose hostname matches. An exact match wins; failing
    /// that, the unqualified names (`n01` for `n01.cluster`) are compared.
    pub fn position_of(&self, hostname: &str) -> Option<Rank> {
        let exact = self.entries.iter().position(|e| e.hostname == hostname);
        let pos = exact.or_else(|| {
            let short = short_name(hostname);
            self.entries
                .iter()
                .position(|e| short_name(&e.hostname) == short)
        })?;
        Some(pos as Rank)
    }
}

fn strip_comment(text: &str) -> &str {
    match text.find('#') {
        Some(i) => text[..i].trim(),
        None => text,
    }
}

fn short_name(hostname: &str) -> &str {
    hostname.split('.').next().unwrap_or(hostname)
}

fn parse_host_line(line: usize, text: &str) -> Result<HostEntry> {
    let mut fields = strip_comment(text).split_whitespace();
    let hostname = fields.next().ok_or_else(|| BmpiError::ConfigParse {
        line,
        reason: "missing hostname".into(),
    })?;
    let mut port = |what: &str| -> Result<Option<u16>> {
        fields
            .next()
            .map(|p| {
                p.parse::<u16>().map_err(|_| BmpiError::ConfigParse {
                    line,
                    reason: format!("invalid {what} port {p:?}"),
                })
            })
            .transpose()
    };
    let data_port = port("data")?;
    let sync_port = port("sync")?;
    if let Some(extra) = fields.next() {
        return Err(BmpiError::ConfigParse {
            line,
            reason: format!("unexpected field {extra:?}"),
        });
    }
    Ok(HostEntry {
        hostname: hostname.to_string(),
        data_port,
        sync_port,
    })
}

/// `(prev, next)` ranks of `rank` on a ring of `world_size` nodes.
pub fn ring_neighbors(rank: Rank, world_size: u32) -> (Rank, Rank) {
    let prev = (rank + world_size - 1) % world_size;
    let next = (rank + 1) % world_size;
    (prev, next)
}

/// A cluster member. Immutable once the registry is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub rank: Rank,
    pub hostname: String,
    pub prev_rank: Rank,
    pub next_rank: Rank,
    pub data_port: u16,
    pub sync_port: u16,
}

/// Every node of the cluster plus the local rank.
#[derive(Debug, Clone)]
pub struct NodeRegistry {
    nodes: Vec<Node>,
    mynode: Rank,
}

impl NodeRegistry {
    /// Resolve the local rank: `config.rank` if set, otherwise the first
    /// host matching `config.hostname` (or the OS hostname).
    pub fn new(hosts: &HostList, config: &BmpiConfig) -> Result<Self> {
        let rank = match config.rank {
            Some(rank) => rank,
            None => {
                let hostname = match &config.hostname {
                    Some(h) => h.clone(),
                    None => gethostname::gethostname().to_string_lossy().into_owned(),
                };
                hosts
                    .position_of(&hostname)
                    .ok_or(BmpiError::HostNotFound { hostname })?
            }
        };
        Self::with_rank(hosts, rank, config)
    }

    /// Build the registry with an explicit local rank.
    pub fn with_rank(hosts: &HostList, rank: Rank, config: &BmpiConfig) -> Result<Self> {
        let world_size = hosts.len() as u32;
        if rank >= world_size {
            return Err(BmpiError::InvalidRank { rank, world_size });
        }
        let nodes = hosts
            .entries()
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let r = i as Rank;
                let (prev_rank, next_rank) = ring_neighbors(r, world_size);
                Node {
                    rank: r,
                    hostname: entry.hostname.clone(),
                    prev_rank,
                    next_rank,
                    data_port: entry.data_port.unwrap_or(config.data_port),
                    sync_port: entry.sync_port.unwrap_or(config.sync_port),
                }
            })
            .collect();
        Ok(Self {
            nodes,
            mynode: rank,
        })
    }

    pub fn mynode(&self) -> Rank {
        self.mynode
    }

    pub fn totalnode(&self) -> u32 {
        self.nodes.len() as u32
    }

    pub fn local(&self) -> &Node {
        &self.nodes[self.mynode as usize]
    }

    pub fn node(&self, rank: Rank) -> Option<&Node> {
        self.nodes.get(rank as usize)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }
}
