//! TCP transport: handshakes, bonded channel bundles and their workers.

pub mod bonding;
pub mod buffer_pool;
pub mod channel;
pub mod handshake;

pub use bonding::{accept_bundle, connect_bundle};
pub use buffer_pool::{BufferPool, PooledBuf};
pub use channel::{Channel, PeerChannelBundle};
pub use handshake::{ABORT, ACCEPT_OK, CHANGE_CONNECTION_COUNT};
