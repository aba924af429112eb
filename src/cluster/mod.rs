//! Static cluster membership and network discovery.

pub mod interfaces;
pub mod registry;

pub use interfaces::{ChannelCandidate, Discovery, InterfaceFilter, LocalInterface};
pub use registry::{HostEntry, HostList, Node, NodeRegistry, ring_neighbors};
