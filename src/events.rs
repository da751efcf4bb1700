//! Observer registry
//!
//! A small `on` / `off` / `emit` registry: each event kind maps to an ordered
//! list of handlers. Handlers run synchronously on the emitting thread, in
//! registration order. The handler list is snapshotted before dispatch so a
//! handler may subscribe or unsubscribe without deadlocking.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Something that can be dispatched through an [`Observers`] registry.
pub trait Event {
    type Kind: Copy + Eq + Hash + Send + std::fmt::Debug;

    fn kind(&self) -> Self::Kind;
}

/// Identity of one registered handler, returned by `on` and passed to `off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

impl SubscriptionId {
    pub fn next() -> Self {
        SubscriptionId(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }
}

pub type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

pub struct Observers<E: Event> {
    handlers: Mutex<HashMap<E::Kind, Vec<(SubscriptionId, Handler<E>)>>>,
}

impl<E: Event> Default for Observers<E> {
    fn default() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
        }
    }
}

impl<E: Event> Observers<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events of `kind`.
    pub fn on<F>(&self, kind: E::Kind, handler: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId::next();
        self.handlers
            .lock()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns `false` if it was not registered for `kind`.
    pub fn off(&self, kind: E::Kind, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock();
        let Some(list) = handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(sid, _)| *sid != id);
        before != list.len()
    }

    /// Invoke every handler registered for the event's kind.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Handler<E>> = match self.handlers.lock().get(&event.kind()) {
            Some(list) => list.iter().map(|(_, h)| h.clone()).collect(),
            None => return,
        };
        for handler in snapshot {
            handler(event);
        }
    }

    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.handlers.lock().get(&kind).map_or(0, |l| l.len())
    }
}
