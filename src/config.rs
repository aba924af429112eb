//! Runtime-configurable parameters for bmpi.
//!
//! All values have sensible defaults. Override via environment variables
//! (prefixed `BMPI_`) or by constructing a custom `BmpiConfig`.

use crate::cluster::interfaces::InterfaceFilter;
use crate::error::{BmpiError, Result};
use crate::types::Rank;
use std::str::FromStr;
use std::time::Duration;

/// Largest element width (bytes) the reduction codec handles.
pub(crate) const MAX_ELEMENT_BYTES: usize = 16;

/// What `sync_ring_token` does when the dequeued token is not the
/// predecessor's rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMismatchPolicy {
    /// Log at WARN and carry on.
    #[default]
    Warn,
    /// Return `ProtocolError::SyncTokenMismatch`.
    Fail,
}

impl FromStr for SyncMismatchPolicy {
    type Err = BmpiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "warn" => Ok(Self::Warn),
            "fail" => Ok(Self::Fail),
            other => Err(BmpiError::InvalidConfig(format!(
                "unknown sync mismatch policy {other:?} (expected warn or fail)"
            ))),
        }
    }
}

/// Tuning and deployment parameters for a cluster.
#[derive(Debug, Clone)]
pub struct BmpiConfig {
    /// Well-known port for bonded data channels.
    pub data_port: u16,

    /// Well-known port for the sync ring.
    pub sync_port: u16,

    /// Upper bound on bonded channels per peer (channel 0 included).
    pub max_channels_per_peer: usize,

    /// Per-channel slices are rounded down to a multiple of this many bytes.
    pub align_bytes: usize,

    /// Size of one socket read on the receive path.
    pub chunk_bytes: usize,

    /// How many times to retry channel 0 while a peer is not yet listening.
    pub connect_retries: u32,

    /// Pause between connection retries.
    pub connect_retry_interval: Duration,

    /// Capacity of the sync-ring token queue.
    pub sync_queue_capacity: usize,

    /// Full-ring token rounds run at the end of `init`.
    pub warmup_rounds: u32,

    pub sync_mismatch: SyncMismatchPolicy,

    /// Restricts which local interfaces may carry bonded channels.
    pub interface_filter: Option<InterfaceFilter>,

    /// Forces the local rank instead of matching the hostname.
    pub rank: Option<Rank>,

    /// Overrides the local hostname used for rank lookup.
    pub hostname: Option<String>,
}

impl Default for BmpiConfig {
    fn default() -> Self {
        Self {
            data_port: 36000,
            sync_port: 36001,
            max_channels_per_peer: 4,
            align_bytes: 4096,
            chunk_bytes: 256 * 1024,
            connect_retries: 600,
            connect_retry_interval: Duration::from_millis(100),
            sync_queue_capacity: 1024,
            warmup_rounds: 3,
            sync_mismatch: SyncMismatchPolicy::Warn,
            interface_filter: None,
            rank: None,
            hostname: None,
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(name, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}

impl BmpiConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `BMPI_DATA_PORT`, `BMPI_SYNC_PORT`
    /// - `BMPI_MAX_CHANNELS`
    /// - `BMPI_ALIGN_BYTES`, `BMPI_CHUNK_BYTES`
    /// - `BMPI_CONNECT_RETRIES`, `BMPI_CONNECT_RETRY_MS`
    /// - `BMPI_SYNC_QUEUE_CAPACITY`, `BMPI_WARMUP_ROUNDS`
    /// - `BMPI_SYNC_MISMATCH` (`warn` | `fail`)
    /// - `BMPI_SOCKET_IFNAME` (interface prefix list, `^` excludes, `=` exact)
    /// - `BMPI_RANK`, `BMPI_HOSTNAME`
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(p) = parse_var(&lookup, "BMPI_DATA_PORT") {
            cfg.data_port = p;
        }
        if let Some(p) = parse_var(&lookup, "BMPI_SYNC_PORT") {
            cfg.sync_port = p;
        }
        if let Some(n) = parse_var(&lookup, "BMPI_MAX_CHANNELS") {
            cfg.max_channels_per_peer = n;
        }
        if let Some(n) = parse_var(&lookup, "BMPI_ALIGN_BYTES") {
            cfg.align_bytes = n;
        }
        if let Some(n) = parse_var(&lookup, "BMPI_CHUNK_BYTES") {
            cfg.chunk_bytes = n;
        }
        if let Some(n) = parse_var(&lookup, "BMPI_CONNECT_RETRIES") {
            cfg.connect_retries = n;
        }
        if let Some(ms) = parse_var(&lookup, "BMPI_CONNECT_RETRY_MS") {
            cfg.connect_retry_interval = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var(&lookup, "BMPI_SYNC_QUEUE_CAPACITY") {
            cfg.sync_queue_capacity = n;
        }
        if let Some(n) = parse_var(&lookup, "BMPI_WARMUP_ROUNDS") {
            cfg.warmup_rounds = n;
        }
        if let Some(policy) = parse_var(&lookup, "BMPI_SYNC_MISMATCH") {
            cfg.sync_mismatch = policy;
        }
        if let Some(list) = lookup("BMPI_SOCKET_IFNAME") {
            cfg.interface_filter = Some(InterfaceFilter::parse(&list));
        }
        if let Some(rank) = parse_var(&lookup, "BMPI_RANK") {
            cfg.rank = Some(rank);
        }
        if let Some(name) = lookup("BMPI_HOSTNAME") {
            cfg.hostname = Some(name);
        }

        cfg
    }

    /// Reject settings the transfer engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_channels_per_peer == 0 {
            return Err(BmpiError::InvalidConfig(
                "max_channels_per_peer must be at least 1".into(),
            ));
        }
        if self.max_channels_per_peer > i32::MAX as usize {
            return Err(BmpiError::InvalidConfig(
                "max_channels_per_peer does not fit the wire format".into(),
            ));
        }
        if self.align_bytes == 0 || self.align_bytes % MAX_ELEMENT_BYTES != 0 {
            return Err(BmpiError::InvalidConfig(format!(
                "align_bytes must be a non-zero multiple of {MAX_ELEMENT_BYTES}, got {}",
                self.align_bytes
            )));
        }
        if self.chunk_bytes == 0 {
            return Err(BmpiError::InvalidConfig("chunk_bytes must be non-zero".into()));
        }
        if self.sync_queue_capacity == 0 {
            return Err(BmpiError::InvalidConfig(
                "sync_queue_capacity must be non-zero".into(),
            ));
        }
        if self.data_port != 0 && self.data_port == self.sync_port {
            return Err(BmpiError::InvalidConfig(format!(
                "data and sync ring share port {}",
                self.data_port
            )));
        }
        Ok(())
    }
}
