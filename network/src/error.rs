//! Network Error Types
//!
//! Error taxonomy for sessions, dispatch and connection lifecycle. Nothing in
//! this module is process-fatal: a single peer's unavailability is always
//! recovered locally by the owning lifecycle manager.

use crosslink_topology::PeerIdentity;
use std::net::SocketAddr;
use thiserror::Error;

/// Main network error type
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Transport-level connect failure; recovered by scheduled retry
    #[error("Dial error: {addr}: {message}")]
    Dial {
        addr: SocketAddr,
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Registration handshake failed or produced a malformed response
    #[error("Registration error: {message}")]
    Registration { message: String },

    /// Inbound connection rejected by the topology accept policy
    #[error("Topology denied: {peer} not accepted")]
    TopologyDenied { peer: PeerIdentity },

    /// A correlated call did not receive its response in time
    #[error("Call timed out: kind {kind} after {timeout_ms}ms")]
    CallTimedOut { kind: u16, timeout_ms: u64 },

    /// A correlated call was cancelled, either explicitly or by session close
    #[error("Call cancelled: kind {kind}")]
    CallCancelled { kind: u16 },

    /// A handler is already registered for this envelope kind
    #[error("Duplicate handler for kind {kind}")]
    DuplicateHandler { kind: u16 },

    /// Application handlers may not claim control-plane envelope kinds
    #[error("Kind {kind} is reserved for the control plane")]
    ReservedKind { kind: u16 },

    /// Framing or serialization failure on the wire
    #[error("Frame error: {message}")]
    Frame {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The session is closed; no further traffic is possible
    #[error("Session closed")]
    Closed,

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for network operations
pub type Result<T> = std::result::Result<T, NetworkError>;

impl NetworkError {
    /// Create a dial error
    pub fn dial(addr: SocketAddr, message: impl Into<String>) -> Self {
        Self::Dial {
            addr,
            message: message.into(),
            source: None,
        }
    }

    /// Create a dial error with source
    pub fn dial_with_source(
        addr: SocketAddr,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Dial {
            addr,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a registration error
    pub fn registration(message: impl Into<String>) -> Self {
        Self::Registration {
            message: message.into(),
        }
    }

    /// Create a frame error
    pub fn frame(message: impl Into<String>) -> Self {
        Self::Frame {
            message: message.into(),
            source: None,
        }
    }

    /// Create a frame error with source
    pub fn frame_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Frame {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a call-timeout error
    pub fn call_timed_out(kind: u16, timeout: std::time::Duration) -> Self {
        Self::CallTimedOut {
            kind,
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create a call-cancelled error
    pub fn call_cancelled(kind: u16) -> Self {
        Self::CallCancelled { kind }
    }

    /// Whether the owning lifecycle manager should retry after this error
    pub fn is_retryable(&self) -> bool {
        match self {
            NetworkError::Dial { .. } => true,
            NetworkError::Registration { .. } => true,
            NetworkError::CallTimedOut { .. } => true,
            NetworkError::CallCancelled { .. } => true,
            NetworkError::Closed => true,
            NetworkError::Io(_) => true,
            NetworkError::TopologyDenied { .. } => false,
            NetworkError::DuplicateHandler { .. } => false,
            NetworkError::ReservedKind { .. } => false,
            NetworkError::Frame { .. } => false,
        }
    }

    /// Error category for log fields
    pub fn category(&self) -> &'static str {
        match self {
            NetworkError::Dial { .. } => "dial",
            NetworkError::Registration { .. } => "registration",
            NetworkError::TopologyDenied { .. } => "topology_denied",
            NetworkError::CallTimedOut { .. } => "call_timeout",
            NetworkError::CallCancelled { .. } => "call_cancelled",
            NetworkError::DuplicateHandler { .. } => "duplicate_handler",
            NetworkError::ReservedKind { .. } => "reserved_kind",
            NetworkError::Frame { .. } => "frame",
            NetworkError::Closed => "closed",
            NetworkError::Io(_) => "io",
        }
    }
}

impl From<bincode::Error> for NetworkError {
    fn from(error: bincode::Error) -> Self {
        NetworkError::frame_with_source("Binary serialization failed", error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crosslink_topology::Role;

    #[test]
    fn test_error_categories() {
        let addr = "127.0.0.1:7001".parse().unwrap();
        assert_eq!(NetworkError::dial(addr, "refused").category(), "dial");
        assert_eq!(NetworkError::Closed.category(), "closed");
        assert_eq!(
            NetworkError::call_timed_out(2, std::time::Duration::from_secs(3)).category(),
            "call_timeout"
        );
    }

    #[test]
    fn test_retryable_classification() {
        let addr = "127.0.0.1:7001".parse().unwrap();
        assert!(NetworkError::dial(addr, "refused").is_retryable());
        assert!(NetworkError::registration("timed out").is_retryable());
        assert!(NetworkError::Closed.is_retryable());

        let peer = PeerIdentity::new(Role::Zone, 1, 0);
        assert!(!NetworkError::TopologyDenied { peer }.is_retryable());
        assert!(!NetworkError::DuplicateHandler { kind: 17 }.is_retryable());
    }
}
