//! Crosslink Declarative Topology System
//!
//! Describes which server roles in the cluster dial which, and under what
//! instance-matching rule. The topology is loaded once from configuration,
//! materialized into a read-only [`TopologyMatrix`], and queried concurrently
//! by every connection lifecycle manager in the process.

pub mod config;
pub mod error;
pub mod policy;
pub mod role;

// Re-export main types
pub use config::{ClusterConfig, PeerDirectory, PeerEntry};
pub use error::{Result, TopologyError};
pub use policy::{ConnectionPolicy, TopologyMatrix};
pub use role::{PeerIdentity, Role};

/// Current version of the cluster configuration format
pub const CONFIG_VERSION: &str = "1.0.0";
