//! Connection policies and the topology matrix

use crate::role::Role;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Rule governing an ordered (source role, target role) pair.
///
/// `Connect*` variants mean the source actively dials the target;
/// `Accept*` variants mean the source accepts inbound connections from it.
/// `*ByInstance` variants additionally require equal instance ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPolicy {
    None,
    ConnectAll,
    ConnectByInstance,
    AcceptAll,
    AcceptByInstance,
}

/// Read-only mapping from (source role, target role) to a policy.
///
/// Built once at load time; absent pairs deny by default. Queries are plain
/// map reads, safe from any number of threads after construction.
#[derive(Debug, Clone, Default)]
pub struct TopologyMatrix {
    entries: HashMap<(Role, Role), ConnectionPolicy>,
}

impl TopologyMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the policy for an ordered role pair, replacing any previous one.
    pub fn insert(&mut self, source: Role, target: Role, policy: ConnectionPolicy) {
        self.entries.insert((source, target), policy);
    }

    /// Policy for an ordered pair; absent entries resolve to `None`.
    pub fn policy(&self, source: Role, target: Role) -> ConnectionPolicy {
        self.entries
            .get(&(source, target))
            .copied()
            .unwrap_or(ConnectionPolicy::None)
    }

    /// Whether `(self_role, self_instance)` should actively dial
    /// `(peer_role, peer_instance)`.
    pub fn should_connect(
        &self,
        self_role: Role,
        self_instance: u32,
        peer_role: Role,
        peer_instance: u32,
    ) -> bool {
        match self.policy(self_role, peer_role) {
            ConnectionPolicy::ConnectAll => true,
            ConnectionPolicy::ConnectByInstance => self_instance == peer_instance,
            _ => false,
        }
    }

    /// Whether `(self_role, self_instance)` should accept an inbound
    /// connection from `(peer_role, peer_instance)`.
    pub fn should_accept(
        &self,
        self_role: Role,
        self_instance: u32,
        peer_role: Role,
        peer_instance: u32,
    ) -> bool {
        match self.policy(self_role, peer_role) {
            ConnectionPolicy::AcceptAll => true,
            ConnectionPolicy::AcceptByInstance => self_instance == peer_instance,
            _ => false,
        }
    }

    /// Number of configured pairs
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> TopologyMatrix {
        let mut m = TopologyMatrix::new();
        m.insert(Role::Zone, Role::Manager, ConnectionPolicy::ConnectAll);
        m.insert(Role::Zone, Role::DbProxy, ConnectionPolicy::ConnectByInstance);
        m.insert(Role::Manager, Role::Zone, ConnectionPolicy::AcceptAll);
        m.insert(Role::DbProxy, Role::Zone, ConnectionPolicy::AcceptByInstance);
        m
    }

    #[test]
    fn test_absent_pairs_deny() {
        let m = matrix();
        for a in Role::ALL {
            for b in Role::ALL {
                if m.policy(a, b) == ConnectionPolicy::None {
                    assert!(!m.should_connect(a, 1, b, 1));
                    assert!(!m.should_accept(a, 1, b, 1));
                }
            }
        }
    }

    #[test]
    fn test_connect_all_ignores_instance() {
        let m = matrix();
        assert!(m.should_connect(Role::Zone, 1, Role::Manager, 9));
        assert!(m.should_connect(Role::Zone, 4, Role::Manager, 4));
    }

    #[test]
    fn test_connect_by_instance_requires_equal_ids() {
        let m = matrix();
        for (a, b) in [(1, 1), (2, 2), (7, 7)] {
            assert!(m.should_connect(Role::Zone, a, Role::DbProxy, b));
        }
        for (a, b) in [(1, 2), (2, 1), (0, 7)] {
            assert!(!m.should_connect(Role::Zone, a, Role::DbProxy, b));
        }
    }

    #[test]
    fn test_accept_mirrors_connect_semantics() {
        let m = matrix();
        assert!(m.should_accept(Role::Manager, 1, Role::Zone, 5));
        assert!(m.should_accept(Role::DbProxy, 2, Role::Zone, 2));
        assert!(!m.should_accept(Role::DbProxy, 2, Role::Zone, 3));
    }

    #[test]
    fn test_connect_policy_never_accepts() {
        let m = matrix();
        // A connect-flavored policy grants nothing on the accept path.
        assert!(!m.should_accept(Role::Zone, 1, Role::Manager, 1));
    }

    #[test]
    fn test_self_pair_no_exemption() {
        let mut m = TopologyMatrix::new();
        assert!(!m.should_connect(Role::Zone, 1, Role::Zone, 1));
        m.insert(Role::Zone, Role::Zone, ConnectionPolicy::ConnectByInstance);
        assert!(m.should_connect(Role::Zone, 1, Role::Zone, 1));
        assert!(!m.should_connect(Role::Zone, 1, Role::Zone, 2));
    }
}
