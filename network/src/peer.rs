//! Outbound connection lifecycle
//!
//! One [`PeerLink`] exists per configured outbound peer. Its task owns the
//! whole state machine (dial, registration handshake, heartbeat, teardown,
//! timed reconnect), so no two state transitions for the same peer ever
//! overlap, while different peers progress independently.

use crate::dispatch::Dispatcher;
use crate::envelope::{self, kind, Envelope, Ping, Pong, RegisterRequest, RegisterResponse};
use crate::error::{NetworkError, Result};
use crate::session::{CallHandle, Session, DEFAULT_CALL_TIMEOUT};
use crosslink_topology::{PeerEntry, PeerIdentity};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Fixed delay before re-dialing after any disconnect; no backoff
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Bound on one heartbeat call
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(3);

/// Bound on the TCP connect itself
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunables for one outbound link; defaults match the production timers
#[derive(Debug, Clone)]
pub struct LinkOptions {
    pub retry_delay: Duration,
    pub dial_timeout: Duration,
    pub registration_timeout: Duration,
    /// Heartbeat cadence; `None` uses the dialing role's period
    pub heartbeat_period: Option<Duration>,
    pub heartbeat_timeout: Duration,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            registration_timeout: DEFAULT_CALL_TIMEOUT,
            heartbeat_period: None,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
        }
    }
}

/// Lifecycle phase of an outbound link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    Idle,
    Connecting,
    AwaitingRegistration,
    Active,
}

/// Observable snapshot of one outbound link
#[derive(Debug, Clone)]
pub struct LinkStatus {
    pub peer: PeerIdentity,
    pub phase: LinkPhase,
    /// Identity the acceptor acknowledged during registration
    pub acknowledged: Option<PeerIdentity>,
    /// Time of the last successful pong
    pub last_heartbeat: Option<std::time::Instant>,
    /// Dial attempts made so far, including the current one
    pub attempts: u64,
    /// The live session while the link is `Active`
    pub session: Option<Arc<Session>>,
}

/// Handle to one outbound peer's lifecycle task
pub struct PeerLink {
    peer: PeerIdentity,
    status: watch::Receiver<LinkStatus>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PeerLink {
    /// Start the lifecycle task for one configured outbound peer
    pub fn spawn(
        local: PeerIdentity,
        entry: &PeerEntry,
        options: LinkOptions,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let peer = entry.identity();
        let (status_tx, status_rx) = watch::channel(LinkStatus {
            peer,
            phase: LinkPhase::Idle,
            acknowledged: None,
            last_heartbeat: None,
            attempts: 0,
            session: None,
        });
        let (stop_tx, stop_rx) = watch::channel(false);

        let runner = LinkRunner {
            local,
            peer,
            addr: entry.address,
            options,
            dispatcher,
            status: status_tx,
            stop: stop_rx,
        };
        let task = tokio::spawn(runner.run());

        Self {
            peer,
            status: status_rx,
            stop: stop_tx,
            task,
        }
    }

    pub fn peer(&self) -> PeerIdentity {
        self.peer
    }

    /// Current status snapshot
    pub fn status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    /// Watch status transitions
    pub fn watch(&self) -> watch::Receiver<LinkStatus> {
        self.status.clone()
    }

    /// Stop the lifecycle task and close any active session
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            debug!(peer = %self.peer, error = %e, "link task join error");
        }
    }
}

struct LinkRunner {
    local: PeerIdentity,
    peer: PeerIdentity,
    addr: SocketAddr,
    options: LinkOptions,
    dispatcher: Arc<Dispatcher>,
    status: watch::Sender<LinkStatus>,
    stop: watch::Receiver<bool>,
}

impl LinkRunner {
    fn update(&self, f: impl FnOnce(&mut LinkStatus)) {
        self.status.send_modify(f);
    }

    async fn run(self) {
        let mut stop = self.stop.clone();
        let heartbeat_period = self
            .options
            .heartbeat_period
            .unwrap_or_else(|| self.local.role.heartbeat_period());

        loop {
            if *stop.borrow() {
                break;
            }

            self.update(|s| {
                s.phase = LinkPhase::Connecting;
                s.acknowledged = None;
                s.attempts += 1;
            });

            match self.dial().await {
                Ok(session) => {
                    self.update(|s| s.phase = LinkPhase::AwaitingRegistration);
                    match self.register(&session).await {
                        Ok(acknowledged) => {
                            info!(
                                local = %self.local,
                                peer = %acknowledged,
                                "registered with peer"
                            );
                            self.update(|s| {
                                s.phase = LinkPhase::Active;
                                s.acknowledged = Some(acknowledged);
                                s.session = Some(Arc::clone(&session));
                            });
                            self.run_active(&session, heartbeat_period, &mut stop).await;
                        }
                        Err(e) => {
                            warn!(
                                local = %self.local,
                                peer = %self.peer,
                                error = %e,
                                "registration failed"
                            );
                            session.shutdown().await;
                        }
                    }
                }
                Err(e) => {
                    debug!(peer = %self.peer, addr = %self.addr, error = %e, "dial failed");
                }
            }

            self.update(|s| {
                s.phase = LinkPhase::Idle;
                s.session = None;
            });
            if *stop.borrow() {
                break;
            }

            warn!(
                local = %self.local,
                peer = %self.peer,
                addr = %self.addr,
                delay_ms = self.options.retry_delay.as_millis() as u64,
                "reconnect scheduled"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.options.retry_delay) => {}
                _ = stop.changed() => break,
            }
        }

        self.update(|s| {
            s.phase = LinkPhase::Idle;
            s.session = None;
        });
    }

    async fn dial(&self) -> Result<Arc<Session>> {
        match tokio::time::timeout(self.options.dial_timeout, TcpStream::connect(self.addr)).await {
            Err(_) => Err(NetworkError::dial(self.addr, "connect timed out")),
            Ok(Err(e)) => Err(NetworkError::dial_with_source(self.addr, "connect failed", e)),
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("Failed to set TCP_NODELAY: {}", e);
                }
                Ok(Session::spawn(
                    stream,
                    self.addr,
                    self.local,
                    Arc::clone(&self.dispatcher),
                ))
            }
        }
    }

    /// Registration handshake: first call on every fresh connection
    async fn register(&self, session: &Arc<Session>) -> Result<PeerIdentity> {
        info!(local = %self.local, peer = %self.peer, "registering with peer");

        let payload = envelope::encode(&RegisterRequest {
            identity: self.local,
        })?;
        let reply = session
            .call(kind::REGISTER, payload, self.options.registration_timeout)
            .await?;
        let response: RegisterResponse = reply.decode().map_err(|e| {
            NetworkError::registration(format!("malformed registration response: {}", e))
        })?;
        Ok(response.identity)
    }

    /// Normal operation: heartbeat until the transport signals closure.
    ///
    /// A timed-out heartbeat is a liveness log signal only; disconnection is
    /// detected through transport closure.
    async fn run_active(
        &self,
        session: &Arc<Session>,
        period: Duration,
        stop: &mut watch::Receiver<bool>,
    ) {
        let mut closed = session.closed();
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut inflight: Option<CallHandle> = None;

        loop {
            tokio::select! {
                // wait_for also catches a close that raced the subscription
                _ = closed.wait_for(|closed| *closed) => {
                    warn!(local = %self.local, peer = %self.peer, "connection lost");
                    break;
                }
                _ = stop.changed() => {
                    session.shutdown().await;
                    break;
                }
                _ = ticker.tick() => {
                    if !self.heartbeat_due(period) {
                        continue;
                    }
                    // At most one heartbeat call in flight.
                    if let Some(previous) = inflight.take() {
                        debug!(peer = %self.peer, "cancelling overlapping heartbeat");
                        previous.cancel();
                    }
                    match self.begin_heartbeat(session).await {
                        Ok(handle) => inflight = Some(handle),
                        Err(e) => {
                            debug!(peer = %self.peer, error = %e, "heartbeat send failed");
                        }
                    }
                }
                outcome = wait_outcome(&mut inflight), if inflight.is_some() => {
                    inflight = None;
                    self.record_heartbeat(outcome);
                }
            }
        }
    }

    /// Only beat when a full period has passed since the last successful pong
    fn heartbeat_due(&self, period: Duration) -> bool {
        match self.status.borrow().last_heartbeat {
            Some(last) => last.elapsed() >= period,
            None => true,
        }
    }

    async fn begin_heartbeat(&self, session: &Arc<Session>) -> Result<CallHandle> {
        let payload = envelope::encode(&Ping {
            identity: self.local,
        })?;
        session
            .begin_call(kind::HEARTBEAT, payload, self.options.heartbeat_timeout)
            .await
    }

    fn record_heartbeat(&self, outcome: Result<Envelope>) {
        match outcome {
            Ok(reply) => match reply.decode::<Pong>() {
                Ok(pong) => {
                    debug!(local = %self.local, from = %pong.identity, "heartbeat pong");
                    self.update(|s| s.last_heartbeat = Some(std::time::Instant::now()));
                }
                Err(e) => warn!(peer = %self.peer, error = %e, "malformed pong"),
            },
            Err(NetworkError::CallTimedOut { .. }) => {
                warn!(local = %self.local, peer = %self.peer, "heartbeat timed out");
            }
            Err(e) => {
                debug!(peer = %self.peer, error = %e, "heartbeat aborted");
            }
        }
    }
}

async fn wait_outcome(inflight: &mut Option<CallHandle>) -> Result<Envelope> {
    match inflight {
        Some(handle) => handle.outcome().await,
        None => std::future::pending().await,
    }
}
