//! Inbound connection acceptance
//!
//! The acceptor owns the node's cluster-internal listen socket. Every raw
//! connection must open with a registration request; the topology accept
//! policy is consulted before any response is written, so a denied dialer
//! sees nothing but a closed connection. Registered sessions are tracked by
//! peer identity until their transport closes.

use crate::dispatch::Dispatcher;
use crate::envelope::{self, kind, Envelope, Exchange, RegisterRequest, RegisterResponse};
use crate::error::{NetworkError, Result};
use crate::session::Session;
use crosslink_topology::{PeerIdentity, TopologyMatrix};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long a fresh inbound connection may take to present its registration
pub const REGISTRATION_WINDOW: Duration = Duration::from_secs(10);

/// Accept-side of a node: listener plus the registry of inbound sessions
pub struct InboundAcceptor {
    local: PeerIdentity,
    local_addr: SocketAddr,
    sessions: Arc<DashMap<PeerIdentity, Arc<Session>>>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl InboundAcceptor {
    /// Bind the listen address and start accepting
    pub async fn bind(
        local: PeerIdentity,
        listen_addr: SocketAddr,
        topology: Arc<TopologyMatrix>,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(listen_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(local = %local, addr = %local_addr, "cluster listener bound");

        let sessions: Arc<DashMap<PeerIdentity, Arc<Session>>> = Arc::new(DashMap::new());
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(accept_loop(
            listener,
            local,
            topology,
            dispatcher,
            Arc::clone(&sessions),
            stop_rx,
        ));

        Ok(Self {
            local,
            local_addr,
            sessions,
            stop: stop_tx,
            task,
        })
    }

    /// Actual bound address (relevant when binding port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Session of a registered inbound peer, if its link is up
    pub fn session_for(&self, peer: PeerIdentity) -> Option<Arc<Session>> {
        self.sessions.get(&peer).map(|s| Arc::clone(&s))
    }

    /// Identities of all currently registered inbound peers
    pub fn registered_peers(&self) -> Vec<PeerIdentity> {
        self.sessions.iter().map(|e| *e.key()).collect()
    }

    /// Stop accepting and close every inbound session
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            debug!(local = %self.local, error = %e, "accept task join error");
        }
        // Snapshot first: the close watchers mutate the map while we await.
        let open: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for session in open {
            session.shutdown().await;
        }
        self.sessions.clear();
    }
}

async fn accept_loop(
    listener: TcpListener,
    local: PeerIdentity,
    topology: Arc<TopologyMatrix>,
    dispatcher: Arc<Dispatcher>,
    sessions: Arc<DashMap<PeerIdentity, Arc<Session>>>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    let topology = Arc::clone(&topology);
                    let dispatcher = Arc::clone(&dispatcher);
                    let sessions = Arc::clone(&sessions);
                    tokio::spawn(async move {
                        if let Err(e) =
                            admit(stream, peer_addr, local, topology, dispatcher, sessions).await
                        {
                            debug!(
                                addr = %peer_addr,
                                error = %e,
                                category = e.category(),
                                "inbound connection rejected"
                            );
                        }
                    });
                }
                Err(e) => {
                    error!(local = %local, error = %e, "accept failed");
                }
            }
        }
    }
}

/// Handshake one raw inbound connection into a registered session.
///
/// Returning an error drops the stream, which is the only signal a denied or
/// malformed dialer receives.
async fn admit(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    local: PeerIdentity,
    topology: Arc<TopologyMatrix>,
    dispatcher: Arc<Dispatcher>,
    sessions: Arc<DashMap<PeerIdentity, Arc<Session>>>,
) -> Result<()> {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY: {}", e);
    }

    let (call, request) = read_registration(&mut stream).await?;
    let peer = request.identity;

    if !topology.should_accept(local.role, local.instance, peer.role, peer.instance) {
        // Close without a response: the dialer cannot distinguish policy
        // denial from transient failure and retries on its own schedule.
        return Err(NetworkError::TopologyDenied { peer });
    }

    let response = envelope::encode(&RegisterResponse { identity: local })?;
    envelope::write_frame(
        &mut stream,
        &Envelope::reply(kind::REGISTER, call, response),
    )
    .await?;

    info!(local = %local, peer = %peer, addr = %peer_addr, "peer registered");

    let session = Session::spawn(stream, peer_addr, local, dispatcher);
    let mut closed = session.closed();
    sessions.insert(peer, Arc::clone(&session));

    // Drop the registry entry once the transport goes away, so a
    // reconnecting peer can re-register under the same identity.
    tokio::spawn(async move {
        let _ = closed.wait_for(|closed| *closed).await;
        sessions.remove_if(&peer, |_, current| Arc::ptr_eq(current, &session));
        debug!(peer = %peer, "inbound session unregistered");
    });

    Ok(())
}

/// First frame on an inbound connection must be a registration request
async fn read_registration(stream: &mut TcpStream) -> Result<(u64, RegisterRequest)> {
    let envelope = tokio::time::timeout(REGISTRATION_WINDOW, envelope::read_frame(stream))
        .await
        .map_err(|_| NetworkError::registration("no registration within window"))??;

    let Exchange::Request(call) = envelope.exchange else {
        return Err(NetworkError::registration(
            "first frame was not a registration request",
        ));
    };
    if envelope.kind != kind::REGISTER {
        return Err(NetworkError::registration(format!(
            "first frame had kind {}, expected registration",
            envelope.kind
        )));
    }

    let request: RegisterRequest = envelope
        .decode()
        .map_err(|e| NetworkError::registration(format!("malformed registration: {}", e)))?;
    Ok((call, request))
}
