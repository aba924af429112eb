use crate::types::{DataType, Rank};
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, BmpiError>;

#[derive(Debug, thiserror::Error)]
pub enum BmpiError {
    #[error("cannot read host file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("host file line {line}: {reason}")]
    ConfigParse { line: usize, reason: String },

    #[error("local host {hostname:?} is not in the host list")]
    HostNotFound { hostname: String },

    #[error("invalid rank {rank}: world size is {world_size}")]
    InvalidRank { rank: Rank, world_size: u32 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("connection to rank {rank} failed: {reason}")]
    ConnectionFailed { rank: Rank, reason: String },

    #[error("peer {rank} disconnected unexpectedly")]
    PeerDisconnected { rank: Rank },

    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transfer of {length} bytes is not a whole number of {dtype} elements")]
    UnalignedLength { length: usize, dtype: DataType },

    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("sync ring listener has stopped")]
    SyncRingClosed,

    #[error("internal lock poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Violations of the handshake or sync-ring wire protocol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unexpected handshake reply {code} from rank {rank}")]
    UnexpectedReply { rank: Rank, code: i32 },

    #[error("rank {rank} announced an invalid channel count {count}")]
    InvalidChannelCount { rank: Rank, count: i32 },

    #[error("sync token mismatch: expected {expected}, got {got}")]
    SyncTokenMismatch { expected: Rank, got: i32 },
}

impl BmpiError {
    /// Create a `Transport` error with just a message.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a `Transport` error with a message and a source error.
    pub fn transport_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// True for the misconfiguration class of errors that abort startup.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::ConfigRead { .. }
                | Self::ConfigParse { .. }
                | Self::HostNotFound { .. }
                | Self::InvalidRank { .. }
                | Self::InvalidConfig(_)
        )
    }
}
