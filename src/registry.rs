//! # Callback Registry
//!
//! The registry tracks pending correlation IDs awaiting an acknowledgment.
//! When a channel publishes an event with a reply handler, the handler is
//! stored here under a freshly allocated ID; when the matching ack envelope
//! arrives, [`CallbackRegistry::resolve`] removes the entry and invokes the
//! handler with the reply arguments.
//!
//! ## Guarantees
//!
//! - **Monotonic IDs**: allocated from an atomic counter starting at 0, so
//!   every pending entry is addressed by a unique ID.
//! - **At-most-once invocation**: resolving removes the entry before the
//!   handler runs; a duplicate or late ack for the same ID finds nothing and
//!   is silently ignored.
//! - **No expiry**: entries stay pending until resolved or explicitly
//!   removed. There is no timeout layer; a reply that never arrives is an
//!   accepted leak under the fire-and-forget contract.
//!
//! One registry instance is owned by each [`Bus`](crate::bus::Bus) and shared
//! by every channel it creates, so correlation IDs form a single flat
//! namespace per bus.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;
use serde_json::Value;
use tracing::trace;

/// Identifier linking a published event to the ack that answers it.
pub type CorrelationId = u64;

type ReplyHandler = Box<dyn FnOnce(Vec<Value>) + Send>;

/// Pending-reply handlers indexed by correlation ID.
pub struct CallbackRegistry {
    next_id: AtomicU64,
    // The boxed `FnOnce` handler is `Send` but not `Sync`; wrapping it in a
    // `Mutex` makes the map value `Sync` so the registry can be shared (via
    // `Arc`) with the spawned dispatch task. Each entry is only ever taken out
    // and invoked once, so the lock is never contended.
    pending: DashMap<CorrelationId, Mutex<ReplyHandler>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            pending: DashMap::new(),
        }
    }

    /// Allocates the next correlation ID and stores `handler` under it.
    ///
    /// Never blocks and never fails.
    pub fn register<F>(&self, handler: F) -> CorrelationId
    where
        F: FnOnce(Vec<Value>) + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pending.insert(id, Mutex::new(Box::new(handler)));
        trace!(id, "registered reply handler");
        id
    }

    /// Invokes and removes the handler registered under `id`, if any.
    ///
    /// An unknown or already-resolved ID is not an error: duplicate and late
    /// acks are possible under unordered delivery, so they are ignored.
    pub fn resolve(&self, id: CorrelationId, args: Vec<Value>) {
        if let Some((_, handler)) = self.pending.remove(&id) {
            trace!(id, "resolving reply handler");
            let handler = handler.into_inner().expect("reply handler mutex poisoned");
            handler(args);
        }
    }

    /// Removes the handler registered under `id` without invoking it.
    ///
    /// Returns whether an entry was present. Used by callers that want to
    /// stop waiting for a reply; a late ack for the ID is then dropped by
    /// [`resolve`](Self::resolve).
    pub fn remove(&self, id: CorrelationId) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Number of entries still awaiting an ack.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("pending", &self.pending.len())
            .finish()
    }
}
