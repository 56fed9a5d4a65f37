//! Streaming sessions and cooperative cancellation.
//!
//! Every operation runs inside a [`Session`]: it tags emissions with the
//! caller's correlation id, exposes the cancellation flag checked between
//! items, and guarantees a single terminal emission.
//!
//! Operations are started against a [`SessionTarget`]:
//!
//! - [`SessionTarget::External`]: a [`Caller`] who may raise stop events. A
//!   cancellation listener is registered for the lifetime of the session.
//! - [`SessionTarget::Internal`]: an in-process consumer such as a fan-out
//!   aggregator. Nothing is registered and the session is never cancelled.

mod caller;
mod emitter;

pub use caller::{Caller, Listener};
pub use emitter::{ChannelEmitter, Emitter, Subscription};

use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::models::{CorrelationId, Emission, Operation, Payload};

/// Who an operation reports to
#[derive(Clone)]
pub enum SessionTarget {
    External(Arc<Caller>),
    Internal(Arc<dyn Emitter>),
}

impl SessionTarget {
    pub fn external(caller: &Arc<Caller>) -> Self {
        SessionTarget::External(Arc::clone(caller))
    }

    pub fn internal(emitter: Arc<dyn Emitter>) -> Self {
        SessionTarget::Internal(emitter)
    }

    pub fn emitter(&self) -> Arc<dyn Emitter> {
        match self {
            SessionTarget::External(caller) => caller.emitter(),
            SessionTarget::Internal(emitter) => Arc::clone(emitter),
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, SessionTarget::External(_))
    }
}

impl fmt::Debug for SessionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionTarget::External(caller) => f.debug_tuple("External").field(caller).finish(),
            SessionTarget::Internal(_) => f.write_str("Internal"),
        }
    }
}

/// One running operation
pub struct Session {
    operation: Operation,
    correlation_id: CorrelationId,
    source: String,
    emitter: Arc<dyn Emitter>,
    cancel: Option<CancellationToken>,
    listener: Option<Listener>,
    terminated: bool,
}

impl Session {
    /// Open a session, registering a listener for external targets
    pub fn open(
        target: &SessionTarget,
        operation: Operation,
        correlation_id: CorrelationId,
        source: &str,
    ) -> Self {
        let (listener, cancel) = match target {
            SessionTarget::External(caller) => {
                let listener = caller.listen(operation, correlation_id);
                let token = listener.token().clone();
                (Some(listener), Some(token))
            }
            SessionTarget::Internal(_) => (None, None),
        };

        Self {
            operation,
            correlation_id,
            source: source.to_string(),
            emitter: target.emitter(),
            cancel,
            listener,
            terminated: false,
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the caller withdrew interest. Never true for internal targets.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Emit a non-terminal payload. Dropped once the session has terminated.
    pub fn emit(&self, payload: Payload) -> bool {
        if self.terminated {
            tracing::warn!(
                source = %self.source,
                operation = %self.operation,
                "Emission after terminal dropped"
            );
            return false;
        }
        self.send(payload);
        true
    }

    /// Emit the terminal payload and release the listener. Only the first call has effect.
    pub fn terminate(&mut self, payload: Payload) -> bool {
        if self.terminated {
            return false;
        }
        self.terminated = true;
        self.send(payload);
        self.listener.take();
        true
    }

    fn send(&self, payload: Payload) {
        self.emitter.emit(Emission {
            event: self.operation.result_event(),
            correlation_id: self.correlation_id,
            payload,
        });
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("operation", &self.operation)
            .field("correlation_id", &self.correlation_id)
            .field("source", &self.source)
            .field("cancelled", &self.is_cancelled())
            .field("terminated", &self.terminated)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_external_session_registers_and_releases() {
        let (emitter, mut sub) = ChannelEmitter::new();
        let caller = Caller::new(Arc::new(emitter));
        let target = SessionTarget::external(&caller);

        let mut session = Session::open(&target, Operation::Search, 42, "mock");
        assert_eq!(caller.listener_count(), 1);

        assert!(session.terminate(Payload::done()));
        assert_eq!(caller.listener_count(), 0);
        assert!(!session.terminate(Payload::done()));
        assert!(!session.emit(Payload::done()));

        let emitted = sub.drain();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].event, "search-in-sources");
        assert_eq!(emitted[0].correlation_id, 42);
    }

    #[tokio::test]
    async fn test_session_observes_stop_event() {
        let (emitter, _sub) = ChannelEmitter::new();
        let caller = Caller::new(Arc::new(emitter));
        let session = Session::open(
            &SessionTarget::external(&caller),
            Operation::Chapter,
            1,
            "mock",
        );

        assert!(!session.is_cancelled());
        caller.handle_stop_event("stop-show-chapter");
        assert!(session.is_cancelled());
    }

    #[tokio::test]
    async fn test_internal_session_is_never_cancelled() {
        let (emitter, mut sub) = ChannelEmitter::new();
        let mut session = Session::open(
            &SessionTarget::internal(Arc::new(emitter)),
            Operation::Recommend,
            5,
            "mock",
        );

        assert!(!session.is_cancelled());
        session.emit(Payload::done());
        session.terminate(Payload::done());
        assert_eq!(sub.drain_for(5).len(), 2);
    }

    #[tokio::test]
    async fn test_dropping_session_releases_listener() {
        let (emitter, _sub) = ChannelEmitter::new();
        let caller = Caller::new(Arc::new(emitter));
        {
            let _session = Session::open(
                &SessionTarget::external(&caller),
                Operation::Manga,
                1,
                "mock",
            );
            assert_eq!(caller.listener_count(), 1);
        }
        assert_eq!(caller.listener_count(), 0);
    }
}
