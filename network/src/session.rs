//! Session layer
//!
//! A [`Session`] owns one established duplex connection: it serializes all
//! outbound writes, runs an independent read task that resolves correlated
//! replies and forwards everything else to the dispatcher, and tracks the
//! pending calls opened on it. The read task and a caller suspended in
//! [`CallHandle::outcome`] are different concurrency participants joined only
//! through the pending-call slot, so a waiting caller never blocks inbound
//! traffic.

use crate::dispatch::Dispatcher;
use crate::envelope::{
    self, kind, CallId, Envelope, Exchange, Ping, Pong,
};
use crate::error::{NetworkError, Result};
use crosslink_topology::PeerIdentity;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default bound for calls that do not specify their own timeout
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// One established cluster link
pub struct Session {
    peer_addr: SocketAddr,
    local: PeerIdentity,
    writer: Mutex<OwnedWriteHalf>,
    pending: DashMap<CallId, oneshot::Sender<Envelope>>,
    next_call: AtomicU64,
    closed: watch::Sender<bool>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("peer_addr", &self.peer_addr)
            .field("local", &self.local)
            .field("pending", &self.pending.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Session {
    /// Take ownership of a connected stream and start its read task.
    ///
    /// Inbound replies resolve pending calls; inbound pings are answered with
    /// a pong carrying `local`; everything else goes to `dispatcher`.
    pub fn spawn(
        stream: TcpStream,
        peer_addr: SocketAddr,
        local: PeerIdentity,
        dispatcher: Arc<Dispatcher>,
    ) -> Arc<Self> {
        let (read_half, write_half) = stream.into_split();
        let (closed, _) = watch::channel(false);

        let session = Arc::new(Self {
            peer_addr,
            local,
            writer: Mutex::new(write_half),
            pending: DashMap::new(),
            next_call: AtomicU64::new(0),
            closed,
        });

        tokio::spawn(read_loop(Arc::clone(&session), read_half, dispatcher));
        session
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Identity of the local node that owns this session
    pub fn local_identity(&self) -> PeerIdentity {
        self.local
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Observe session closure; the value flips to `true` exactly once
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    /// Fire-and-forget send. Returns once the frame is written; no delivery
    /// guarantee beyond the transport's own ordering.
    pub async fn notify(&self, envelope_kind: u16, payload: Vec<u8>) -> Result<()> {
        self.send(&Envelope::notify(envelope_kind, payload)).await
    }

    /// Answer a received request
    pub async fn reply(&self, call: CallId, envelope_kind: u16, payload: Vec<u8>) -> Result<()> {
        self.send(&Envelope::reply(envelope_kind, call, payload))
            .await
    }

    /// Open a correlated call and return a handle to await or cancel it.
    ///
    /// The timeout clock starts now, not at the first `outcome` poll.
    pub async fn begin_call(
        self: &Arc<Self>,
        envelope_kind: u16,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<CallHandle> {
        if self.is_closed() {
            return Err(NetworkError::Closed);
        }

        let call = self.next_call.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(call, tx);

        if let Err(e) = self
            .send(&Envelope::request(envelope_kind, call, payload))
            .await
        {
            self.pending.remove(&call);
            return Err(e);
        }

        Ok(CallHandle {
            session: Arc::clone(self),
            call,
            kind: envelope_kind,
            timeout,
            deadline: Instant::now() + timeout,
            rx,
        })
    }

    /// Correlated call: send a request and suspend until its reply, the
    /// timeout, or cancellation by session closure. Exactly one outcome.
    pub async fn call(
        self: &Arc<Self>,
        envelope_kind: u16,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Envelope> {
        let mut handle = self.begin_call(envelope_kind, payload, timeout).await?;
        handle.outcome().await
    }

    async fn send(&self, envelope: &Envelope) -> Result<()> {
        if self.is_closed() {
            return Err(NetworkError::Closed);
        }

        let mut writer = self.writer.lock().await;
        if let Err(e) = envelope::write_frame(&mut *writer, envelope).await {
            drop(writer);
            self.close("write failed");
            return Err(e);
        }
        Ok(())
    }

    /// Mark the session closed and cancel every pending call.
    ///
    /// Idempotent; the first caller wins.
    fn close(&self, reason: &str) {
        if self.closed.send_replace(true) {
            return;
        }

        let cancelled = self.pending.len();
        self.pending.clear();
        debug!(
            peer = %self.peer_addr,
            reason,
            cancelled,
            "session closed"
        );
    }

    /// Close the session and shut the transport down.
    pub async fn shutdown(&self) {
        self.close("shutdown requested");
        let mut writer = self.writer.lock().await;
        if let Err(e) = tokio::io::AsyncWriteExt::shutdown(&mut *writer).await {
            debug!(peer = %self.peer_addr, error = %e, "transport shutdown error");
        }
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.len()
    }

    async fn handle_inbound(self: &Arc<Self>, envelope: Envelope, dispatcher: &Arc<Dispatcher>) {
        match envelope.exchange {
            Exchange::Reply(call) => match self.pending.remove(&call) {
                Some((_, tx)) => {
                    // A cancelled caller has already dropped its receiver.
                    if tx.send(envelope).is_err() {
                        debug!(peer = %self.peer_addr, call, "reply for cancelled call dropped");
                    }
                }
                None => {
                    debug!(peer = %self.peer_addr, call, "unmatched reply dropped");
                }
            },
            Exchange::Request(call) if envelope.kind == kind::HEARTBEAT => {
                self.answer_ping(call, &envelope).await;
            }
            _ => dispatcher.dispatch(envelope, Arc::clone(self)),
        }
    }

    /// Heartbeat is control plane: answered here, never dispatched
    async fn answer_ping(&self, call: CallId, envelope: &Envelope) {
        let ping: Ping = match envelope.decode() {
            Ok(ping) => ping,
            Err(e) => {
                warn!(peer = %self.peer_addr, error = %e, "malformed ping dropped");
                return;
            }
        };

        debug!(peer = %self.peer_addr, from = %ping.identity, "heartbeat ping");

        let pong = Pong {
            identity: self.local,
        };
        let payload = match envelope::encode(&pong) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(peer = %self.peer_addr, error = %e, "pong encode failed");
                return;
            }
        };
        if let Err(e) = self.reply(call, kind::HEARTBEAT, payload).await {
            debug!(peer = %self.peer_addr, error = %e, "pong send failed");
        }
    }
}

async fn read_loop(session: Arc<Session>, mut reader: OwnedReadHalf, dispatcher: Arc<Dispatcher>) {
    let mut closed = session.closed();
    loop {
        tokio::select! {
            _ = closed.wait_for(|closed| *closed) => break,
            frame = envelope::read_frame(&mut reader) => match frame {
                Ok(envelope) => session.handle_inbound(envelope, &dispatcher).await,
                Err(e) => {
                    debug!(peer = %session.peer_addr, error = %e, "session read ended");
                    break;
                }
            }
        }
    }
    session.close("transport closed");
}

/// Caller-side state of one in-flight call.
///
/// Await [`outcome`](Self::outcome) for the reply, or drop/[`cancel`]
/// (Self::cancel) the handle to abandon the call; a reply arriving after
/// cancellation is discarded by the read loop.
pub struct CallHandle {
    session: Arc<Session>,
    call: CallId,
    kind: u16,
    timeout: Duration,
    deadline: Instant,
    rx: oneshot::Receiver<Envelope>,
}

impl CallHandle {
    pub fn call_id(&self) -> CallId {
        self.call
    }

    /// Wait for exactly one of: the matching reply, the deadline, or
    /// cancellation through session closure.
    pub async fn outcome(&mut self) -> Result<Envelope> {
        match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(envelope)) => Ok(envelope),
            Ok(Err(_)) => Err(NetworkError::call_cancelled(self.kind)),
            Err(_) => {
                // Remove the slot first so a reply landing now is a no-op.
                self.session.pending.remove(&self.call);
                Err(NetworkError::call_timed_out(self.kind, self.timeout))
            }
        }
    }

    /// Abandon the call without waiting
    pub fn cancel(self) {
        // Drop does the cleanup.
    }
}

impl Drop for CallHandle {
    fn drop(&mut self) {
        self.session.pending.remove(&self.call);
    }
}
