//! Inbound message dispatch
//!
//! Maps envelope kinds to registered handlers. The registry is built once at
//! startup through [`DispatcherBuilder`] and immutable afterwards, so lookups
//! during operation are unsynchronized reads. Handler invocations are spawned
//! onto the runtime: a slow or failing handler never stalls the session read
//! loop that delivered the envelope.

use crate::envelope::{kind, Envelope};
use crate::error::{NetworkError, Result};
use crate::session::Session;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Processes inbound envelopes of one registered kind.
///
/// Handlers receive the session the envelope arrived on and may issue their
/// own notifies, calls or replies over it.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, envelope: Envelope, session: Arc<Session>) -> Result<()>;
}

/// Write-once registry construction
#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: HashMap<u16, Arc<dyn MessageHandler>>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an application envelope kind.
    ///
    /// Kinds below [`kind::APP_BASE`] belong to the control plane and are
    /// rejected; registering the same kind twice is an error.
    pub fn register(
        mut self,
        envelope_kind: u16,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self> {
        if envelope_kind < kind::APP_BASE {
            return Err(NetworkError::ReservedKind {
                kind: envelope_kind,
            });
        }
        if self.handlers.contains_key(&envelope_kind) {
            return Err(NetworkError::DuplicateHandler {
                kind: envelope_kind,
            });
        }
        self.handlers.insert(envelope_kind, handler);
        Ok(self)
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            handlers: self.handlers,
        }
    }
}

/// Immutable kind-to-handler mapping serving all sessions of a node
pub struct Dispatcher {
    handlers: HashMap<u16, Arc<dyn MessageHandler>>,
}

impl Dispatcher {
    /// Route one inbound envelope.
    ///
    /// Unknown kinds are reported and dropped; a failure inside a handler is
    /// logged and isolated to that invocation.
    pub fn dispatch(&self, envelope: Envelope, session: Arc<Session>) {
        let Some(handler) = self.handlers.get(&envelope.kind) else {
            warn!(
                kind = envelope.kind,
                peer = %session.peer_addr(),
                "no handler for envelope kind, dropping"
            );
            return;
        };

        let handler = Arc::clone(handler);
        let envelope_kind = envelope.kind;
        tokio::spawn(async move {
            let peer = session.peer_addr();
            if let Err(e) = handler.handle(envelope, session).await {
                warn!(
                    kind = envelope_kind,
                    peer = %peer,
                    error = %e,
                    "handler failed"
                );
            }
        });
    }

    pub fn is_registered(&self, envelope_kind: u16) -> bool {
        self.handlers.contains_key(&envelope_kind)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    #[async_trait]
    impl MessageHandler for NoopHandler {
        async fn handle(&self, _envelope: Envelope, _session: Arc<Session>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let dispatcher = DispatcherBuilder::new()
            .register(kind::APP_BASE, Arc::new(NoopHandler))
            .unwrap()
            .register(kind::APP_BASE + 1, Arc::new(NoopHandler))
            .unwrap()
            .build();

        assert_eq!(dispatcher.len(), 2);
        assert!(dispatcher.is_registered(kind::APP_BASE));
        assert!(!dispatcher.is_registered(kind::APP_BASE + 2));
    }

    #[test]
    fn test_duplicate_handler_rejected() {
        let err = DispatcherBuilder::new()
            .register(kind::APP_BASE, Arc::new(NoopHandler))
            .unwrap()
            .register(kind::APP_BASE, Arc::new(NoopHandler))
            .unwrap_err();

        assert_eq!(err.category(), "duplicate_handler");
    }

    #[test]
    fn test_control_plane_kinds_rejected() {
        for reserved in [kind::REGISTER, kind::HEARTBEAT, kind::APP_BASE - 1] {
            let err = DispatcherBuilder::new()
                .register(reserved, Arc::new(NoopHandler))
                .unwrap_err();
            assert_eq!(err.category(), "reserved_kind");
        }
    }
}
