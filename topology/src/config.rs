//! Cluster configuration loading
//!
//! The configuration file is the materialized form of the deployment's data
//! tables: a `topology:` section keyed by source role with one policy per
//! target role, and a `peers:` list giving every instance's identity and
//! cluster-internal listen address.

use crate::error::{Result, TopologyError};
use crate::policy::{ConnectionPolicy, TopologyMatrix};
use crate::role::{PeerIdentity, Role};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use tracing::debug;

/// One entry in the peer address directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerEntry {
    pub role: Role,
    pub instance: u32,
    #[serde(default)]
    pub sub: u32,
    /// Cluster-internal listen address of this instance
    pub address: SocketAddr,
}

impl PeerEntry {
    pub fn identity(&self) -> PeerIdentity {
        PeerIdentity::new(self.role, self.instance, self.sub)
    }
}

/// Top-level cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Configuration format version
    pub version: String,
    /// Policy per (source role, target role); absent cells deny
    pub topology: HashMap<Role, HashMap<Role, ConnectionPolicy>>,
    /// Address directory for every configured instance
    pub peers: Vec<PeerEntry>,
}

impl ClusterConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| TopologyError::io(path.display().to_string(), e))?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ClusterConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants the serde layer cannot express
    pub fn validate(&self) -> Result<()> {
        if self.peers.is_empty() {
            return Err(TopologyError::validation("peer directory is empty"));
        }

        let mut seen = HashMap::new();
        for entry in &self.peers {
            let identity = entry.identity();
            if let Some(prev) = seen.insert(identity, entry.address) {
                return Err(TopologyError::validation(format!(
                    "duplicate peer {} (addresses {} and {})",
                    identity, prev, entry.address
                )));
            }
        }

        debug!(
            peers = self.peers.len(),
            pairs = self.topology.values().map(|m| m.len()).sum::<usize>(),
            "cluster config validated"
        );
        Ok(())
    }

    /// Materialize the topology table into a read-only matrix
    pub fn build_matrix(&self) -> TopologyMatrix {
        let mut matrix = TopologyMatrix::new();
        for (source, targets) in &self.topology {
            for (target, policy) in targets {
                matrix.insert(*source, *target, *policy);
            }
        }
        matrix
    }

    /// Materialize the peer list into an address directory
    pub fn build_directory(&self) -> PeerDirectory {
        PeerDirectory::new(self.peers.clone())
    }
}

/// Read-only lookup from peer identity to network address.
///
/// Built once from configuration; queried by lifecycle managers when dialing.
#[derive(Debug, Clone, Default)]
pub struct PeerDirectory {
    entries: Vec<PeerEntry>,
}

impl PeerDirectory {
    pub fn new(entries: Vec<PeerEntry>) -> Self {
        Self { entries }
    }

    /// Address of a specific instance
    pub fn address_of(&self, identity: PeerIdentity) -> Result<SocketAddr> {
        self.entries
            .iter()
            .find(|e| e.identity() == identity)
            .map(|e| e.address)
            .ok_or(TopologyError::UnknownPeer {
                role: identity.role,
                instance: identity.instance,
            })
    }

    /// All configured entries
    pub fn entries(&self) -> &[PeerEntry] {
        &self.entries
    }

    /// All entries other than `own`
    pub fn others(&self, own: PeerIdentity) -> impl Iterator<Item = &PeerEntry> {
        self.entries.iter().filter(move |e| e.identity() != own)
    }
}
