//! External callers and their cancellation listeners.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use super::emitter::Emitter;
use crate::models::{CorrelationId, Operation};

struct ListenerEntry {
    operation: Operation,
    correlation_id: CorrelationId,
    token: CancellationToken,
}

/// An external party running operations.
///
/// Owns the emitter results are delivered to and the registry of
/// cancellation listeners, one per running operation. Raising an
/// operation's stop event cancels every running operation of that kind.
pub struct Caller {
    emitter: Arc<dyn Emitter>,
    root: CancellationToken,
    listeners: Mutex<HashMap<u64, ListenerEntry>>,
    next_key: AtomicU64,
}

impl Caller {
    pub fn new(emitter: Arc<dyn Emitter>) -> Arc<Self> {
        Arc::new(Self {
            emitter,
            root: CancellationToken::new(),
            listeners: Mutex::new(HashMap::new()),
            next_key: AtomicU64::new(0),
        })
    }

    pub fn emitter(&self) -> Arc<dyn Emitter> {
        Arc::clone(&self.emitter)
    }

    /// Register a listener for one running operation
    pub fn listen(self: &Arc<Self>, operation: Operation, correlation_id: CorrelationId) -> Listener {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();

        self.entries().insert(
            key,
            ListenerEntry {
                operation,
                correlation_id,
                token: token.clone(),
            },
        );

        Listener {
            caller: Arc::clone(self),
            key,
            token,
        }
    }

    /// Raise the stop event of `operation`; returns how many operations were signalled
    pub fn stop(&self, operation: Operation) -> usize {
        let entries = self.entries();
        let mut count = 0;
        for entry in entries.values().filter(|e| e.operation == operation) {
            entry.token.cancel();
            count += 1;
        }
        tracing::debug!("{} raised, {} operation(s) signalled", operation.stop_event(), count);
        count
    }

    /// Cancel a single operation by correlation id
    pub fn cancel(&self, operation: Operation, correlation_id: CorrelationId) -> bool {
        let entries = self.entries();
        let mut found = false;
        for entry in entries
            .values()
            .filter(|e| e.operation == operation && e.correlation_id == correlation_id)
        {
            entry.token.cancel();
            found = true;
        }
        found
    }

    /// Dispatch a raw stop event name such as `stop-search`
    pub fn handle_stop_event(&self, name: &str) -> usize {
        match Operation::from_stop_event(name) {
            Some(operation) => self.stop(operation),
            None => {
                tracing::debug!("Ignoring unknown stop event {}", name);
                0
            }
        }
    }

    /// Cancel everything, now and for operations started later
    pub fn disconnect(&self) {
        self.root.cancel();
    }

    pub fn is_disconnected(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.entries().len()
    }

    fn unregister(&self, key: u64) {
        self.entries().remove(&key);
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<u64, ListenerEntry>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Caller")
            .field("listeners", &self.listener_count())
            .field("disconnected", &self.is_disconnected())
            .finish()
    }
}

/// Registration of one operation with its caller.
///
/// Dropping it unregisters the listener.
#[derive(Debug)]
pub struct Listener {
    caller: Arc<Caller>,
    key: u64,
    token: CancellationToken,
}

impl Listener {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.caller.unregister(self.key);
    }
}
