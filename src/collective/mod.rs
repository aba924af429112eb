//! Sync ring: barrier and token hand-off on links separate from bulk data.

pub mod barrier;
pub mod queue;

pub use barrier::{RingState, SyncRing};
pub use queue::SyncQueue;
