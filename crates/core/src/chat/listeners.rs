//! Subscriber registry for inbound message dispatch.

use crate::chat::types::Message;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::warn;

/// Callback invoked for every inbound message.
pub type Listener = Arc<dyn Fn(&Message) + Send + Sync>;

struct Entry {
    id: u64,
    active: Arc<AtomicBool>,
    callback: Listener,
}

#[derive(Default)]
struct Inner {
    next_id: AtomicU64,
    entries: Mutex<Vec<Entry>>,
}

impl Inner {
    fn entries(&self) -> MutexGuard<'_, Vec<Entry>> {
        // A panicking listener never runs under this lock, so the data is
        // consistent even if the lock was poisoned elsewhere.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remove(&self, id: u64) {
        self.entries().retain(|entry| entry.id != id);
    }
}

/// Ordered set of message subscribers.
#[derive(Default)]
pub struct ListenerRegistry {
    inner: Arc<Inner>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback. It runs after every callback registered before it.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));

        self.inner.entries().push(Entry {
            id,
            active: active.clone(),
            callback: Arc::new(callback),
        });

        Subscription {
            id,
            active,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver a message to every current subscriber, in subscription order.
    ///
    /// A panicking subscriber is logged and skipped; the rest still run.
    pub fn dispatch(&self, message: &Message) {
        let snapshot: Vec<(Arc<AtomicBool>, Listener)> = self
            .inner
            .entries()
            .iter()
            .map(|entry| (entry.active.clone(), entry.callback.clone()))
            .collect();

        for (active, callback) in snapshot {
            // Unsubscribed while an earlier callback ran
            if !active.load(Ordering::Acquire) {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| callback(message))).is_err() {
                warn!("Message listener panicked while handling {}", message.id);
            }
        }
    }

    /// Remove every subscriber.
    pub fn clear(&self) {
        let mut entries = self.inner.entries();
        for entry in entries.iter() {
            entry.active.store(false, Ordering::Release);
        }
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Disposer returned by [`ListenerRegistry::subscribe`].
///
/// Dropping it does not unsubscribe; call [`Subscription::unsubscribe`].
pub struct Subscription {
    id: u64,
    active: Arc<AtomicBool>,
    registry: Weak<Inner>,
}

impl Subscription {
    /// Remove this subscription's callback. Calling it again is a no-op.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(inner) = self.registry.upgrade() {
            inner.remove(self.id);
        }
    }

    /// Whether the callback is still registered.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
