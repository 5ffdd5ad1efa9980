//! Server roles and peer identity

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Server role in the cluster topology.
///
/// The set is closed at compile time; the topology matrix and the peer
/// directory are both keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Cluster coordinator
    Manager,
    /// Game world process
    Zone,
    /// Client-facing edge process
    Gateway,
    /// Database access proxy
    DbProxy,
}

impl Role {
    /// All roles, in declaration order
    pub const ALL: [Role; 4] = [Role::Manager, Role::Zone, Role::Gateway, Role::DbProxy];

    /// Heartbeat cadence for links this role dials.
    ///
    /// Edge-facing processes beat faster than backend ones.
    pub fn heartbeat_period(&self) -> Duration {
        match self {
            Role::Gateway | Role::Zone => Duration::from_secs(20),
            Role::Manager | Role::DbProxy => Duration::from_secs(30),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Manager => "manager",
            Role::Zone => "zone",
            Role::Gateway => "gateway",
            Role::DbProxy => "db_proxy",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Role {
    type Err = crate::TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manager" => Ok(Role::Manager),
            "zone" => Ok(Role::Zone),
            "gateway" => Ok(Role::Gateway),
            "db_proxy" => Ok(Role::DbProxy),
            other => Err(crate::TopologyError::UnknownRole(other.to_string())),
        }
    }
}

/// Identity of one running server instance.
///
/// Immutable once assigned; `sub` distinguishes co-located workers that share
/// a role and instance id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub role: Role,
    pub instance: u32,
    pub sub: u32,
}

impl PeerIdentity {
    pub fn new(role: Role, instance: u32, sub: u32) -> Self {
        Self {
            role,
            instance,
            sub,
        }
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}.{}", self.role, self.instance, self.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for role in Role::ALL {
            let parsed: Role = role.to_string().parse().unwrap();
            assert_eq!(parsed, role);
        }
    }

    #[test]
    fn test_unknown_role_rejected() {
        assert!("battle".parse::<Role>().is_err());
    }

    #[test]
    fn test_heartbeat_periods() {
        assert_eq!(Role::Gateway.heartbeat_period(), Duration::from_secs(20));
        assert_eq!(Role::Manager.heartbeat_period(), Duration::from_secs(30));
    }

    #[test]
    fn test_identity_display() {
        let id = PeerIdentity::new(Role::Zone, 3, 1);
        assert_eq!(id.to_string(), "zone:3.1");
    }
}
