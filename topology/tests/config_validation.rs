//! Configuration validation tests

use crosslink_topology::{ClusterConfig, ConnectionPolicy, PeerIdentity, Role};
use std::io::Write;

const CLUSTER_YAML: &str = r#"
version: "1.0.0"
topology:
  zone:
    manager: connect_all
    db_proxy: connect_by_instance
  gateway:
    zone: connect_all
  manager:
    zone: accept_all
    gateway: accept_all
  db_proxy:
    zone: accept_by_instance
peers:
  - role: manager
    instance: 1
    address: "10.0.0.1:7001"
  - role: zone
    instance: 1
    address: "10.0.0.2:7101"
  - role: zone
    instance: 2
    address: "10.0.0.3:7101"
  - role: db_proxy
    instance: 1
    address: "10.0.0.4:7201"
  - role: gateway
    instance: 1
    sub: 2
    address: "10.0.0.5:7301"
"#;

#[test]
fn test_load_cluster_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CLUSTER_YAML.as_bytes()).unwrap();

    let config = ClusterConfig::from_file(file.path()).unwrap();
    assert_eq!(config.version, "1.0.0");
    assert_eq!(config.peers.len(), 5);

    let matrix = config.build_matrix();
    assert_eq!(matrix.len(), 6);
    assert_eq!(
        matrix.policy(Role::Zone, Role::Manager),
        ConnectionPolicy::ConnectAll
    );
    // Cells absent from the table deny by default.
    assert_eq!(matrix.policy(Role::Zone, Role::Gateway), ConnectionPolicy::None);
}

#[test]
fn test_matrix_semantics_across_instances() {
    let config = ClusterConfig::from_yaml(CLUSTER_YAML).unwrap();
    let matrix = config.build_matrix();

    // connect_all: every zone dials the manager regardless of instance id.
    assert!(matrix.should_connect(Role::Zone, 1, Role::Manager, 1));
    assert!(matrix.should_connect(Role::Zone, 2, Role::Manager, 1));

    // connect_by_instance: zone 2 only dials db_proxy 2.
    assert!(!matrix.should_connect(Role::Zone, 2, Role::DbProxy, 1));
    assert!(matrix.should_connect(Role::Zone, 1, Role::DbProxy, 1));
    assert!(matrix.should_accept(Role::DbProxy, 1, Role::Zone, 1));
    assert!(!matrix.should_accept(Role::DbProxy, 1, Role::Zone, 2));

    // The accept table is independent of the connect table.
    assert!(!matrix.should_accept(Role::Zone, 1, Role::Manager, 1));
}

#[test]
fn test_directory_distinguishes_sub_ids() {
    let config = ClusterConfig::from_yaml(CLUSTER_YAML).unwrap();
    let directory = config.build_directory();

    let gateway = PeerIdentity::new(Role::Gateway, 1, 2);
    assert!(directory.address_of(gateway).is_ok());

    // Same role and instance, different sub id: not in the directory.
    let wrong_sub = PeerIdentity::new(Role::Gateway, 1, 0);
    assert!(directory.address_of(wrong_sub).is_err());
}

#[test]
fn test_others_excludes_own_identity() {
    let config = ClusterConfig::from_yaml(CLUSTER_YAML).unwrap();
    let directory = config.build_directory();

    let own = PeerIdentity::new(Role::Zone, 1, 0);
    let others: Vec<_> = directory.others(own).map(|e| e.identity()).collect();
    assert_eq!(others.len(), 4);
    assert!(!others.contains(&own));
}

#[test]
fn test_malformed_policy_rejected() {
    let yaml = r#"
version: "1.0.0"
topology:
  zone:
    manager: connect_everything
peers:
  - role: zone
    instance: 1
    address: "127.0.0.1:7101"
"#;
    assert!(ClusterConfig::from_yaml(yaml).is_err());
}

#[test]
fn test_malformed_address_rejected() {
    let yaml = r#"
version: "1.0.0"
topology: {}
peers:
  - role: zone
    instance: 1
    address: "not-an-address"
"#;
    assert!(ClusterConfig::from_yaml(yaml).is_err());
}
