//! Asynchronous transfers over bonded bundles and their completion tracking.

pub mod engine;
pub(crate) mod handle;
pub mod plan;

pub use engine::TransferEngine;
pub use handle::Completed;
pub use plan::split_plan;
