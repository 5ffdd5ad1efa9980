//! Crosslink Network Layer
//!
//! Connectivity core of the crosslink server cluster: framed envelope
//! exchange over TCP, a correlated call primitive with timeouts and
//! cancellation, handler dispatch for inbound traffic, and the per-peer
//! connection lifecycle (dial, registration handshake, heartbeat, timed
//! reconnect). Which links exist at all is decided by the topology matrix
//! from `crosslink-topology`.
//!
//! # Architecture
//!
//! ```text
//! ClusterNode ─┬─ InboundAcceptor ── Session per registered dialer
//!              │
//!              └─ PeerLink per outbound peer ── Session while connected
//!                                                  │
//!                              Dispatcher ◄────────┘ (non-correlated inbound)
//! ```
//!
//! Every session runs its own read task; a caller suspended in a correlated
//! call and the read loop that will deliver its reply are joined only through
//! the session's pending-call table, so one slow peer never stalls another.

pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod listener;
pub mod node;
pub mod peer;
pub mod session;

// Re-export main types
pub use dispatch::{Dispatcher, DispatcherBuilder, MessageHandler};
pub use envelope::{
    kind, CallId, Envelope, Exchange, Ping, Pong, RegisterRequest, RegisterResponse,
    MAX_FRAME_SIZE,
};
pub use error::{NetworkError, Result};
pub use listener::InboundAcceptor;
pub use node::ClusterNode;
pub use peer::{LinkOptions, LinkPhase, LinkStatus, PeerLink};
pub use session::{CallHandle, Session, DEFAULT_CALL_TIMEOUT};
