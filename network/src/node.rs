//! Node assembly
//!
//! [`ClusterNode`] is the process-level composition point: it owns the
//! topology matrix, the peer directory and the dispatcher, binds the inbound
//! acceptor, and spawns one outbound [`PeerLink`] for every directory entry
//! the topology says this node should dial. No component reaches for global
//! state; everything flows through this context object.

use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::listener::InboundAcceptor;
use crate::peer::{LinkOptions, LinkStatus, PeerLink};
use crate::session::Session;
use crosslink_topology::{PeerDirectory, PeerIdentity, TopologyMatrix};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

/// One running cluster node's connectivity layer
pub struct ClusterNode {
    identity: PeerIdentity,
    acceptor: InboundAcceptor,
    links: HashMap<PeerIdentity, PeerLink>,
}

impl ClusterNode {
    /// Bind the listen address and start dialing every peer the topology
    /// selects for this identity.
    pub async fn start(
        identity: PeerIdentity,
        listen_addr: SocketAddr,
        topology: Arc<TopologyMatrix>,
        directory: PeerDirectory,
        dispatcher: Arc<Dispatcher>,
        options: LinkOptions,
    ) -> Result<Self> {
        let acceptor = InboundAcceptor::bind(
            identity,
            listen_addr,
            Arc::clone(&topology),
            Arc::clone(&dispatcher),
        )
        .await?;

        let mut links = HashMap::new();
        for entry in directory.others(identity) {
            let peer = entry.identity();
            if !topology.should_connect(identity.role, identity.instance, peer.role, peer.instance)
            {
                debug!(local = %identity, peer = %peer, "topology does not select peer, not dialing");
                continue;
            }
            links.insert(
                peer,
                PeerLink::spawn(identity, entry, options.clone(), Arc::clone(&dispatcher)),
            );
        }

        info!(
            local = %identity,
            addr = %acceptor.local_addr(),
            outbound = links.len(),
            "cluster node started"
        );

        Ok(Self {
            identity,
            acceptor,
            links,
        })
    }

    pub fn identity(&self) -> PeerIdentity {
        self.identity
    }

    /// Actual listen address (relevant when binding port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.acceptor.local_addr()
    }

    /// Status of the outbound link to `peer`, if the topology selected it
    pub fn link_status(&self, peer: PeerIdentity) -> Option<LinkStatus> {
        self.links.get(&peer).map(|link| link.status())
    }

    /// Watch the outbound link to `peer`
    pub fn link_watch(&self, peer: PeerIdentity) -> Option<tokio::sync::watch::Receiver<LinkStatus>> {
        self.links.get(&peer).map(|link| link.watch())
    }

    /// Identities this node is configured to dial
    pub fn outbound_peers(&self) -> Vec<PeerIdentity> {
        self.links.keys().copied().collect()
    }

    /// Session of an outbound peer whose link is currently `Active`
    pub fn outbound_session(&self, peer: PeerIdentity) -> Option<Arc<Session>> {
        self.links.get(&peer).and_then(|link| link.status().session)
    }

    /// Session of a peer that registered inbound, if its link is up
    pub fn inbound_session(&self, peer: PeerIdentity) -> Option<Arc<Session>> {
        self.acceptor.session_for(peer)
    }

    /// Identities currently registered inbound
    pub fn inbound_peers(&self) -> Vec<PeerIdentity> {
        self.acceptor.registered_peers()
    }

    /// Stop every link and the acceptor
    pub async fn shutdown(self) {
        info!(local = %self.identity, "cluster node shutting down");
        for (_, link) in self.links {
            link.stop().await;
        }
        self.acceptor.stop().await;
    }
}
