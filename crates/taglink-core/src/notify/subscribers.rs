// ── Handler subscriber lists ──
//
// Each subscriber owns a slot guarded by a reentrant mutex that is held
// for the duration of every call into the handler. Unsubscribing takes
// the same lock, so once `unsubscribe()` returns the handler is never
// invoked again. Reentrancy lets a handler unsubscribe itself.
//
// Handlers run on the connection task. A panicking handler is contained
// at the slot and logged; it stays subscribed.

use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::ReentrantMutex;
use tracing::warn;

pub(crate) type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Slot<E> {
    handler: ReentrantMutex<RefCell<Option<Handler<E>>>>,
}

impl<E> Slot<E> {
    fn new(handler: Handler<E>) -> Self {
        Self {
            handler: ReentrantMutex::new(RefCell::new(Some(handler))),
        }
    }

    fn call(&self, event: &E) {
        let guard = self.handler.lock();
        let handler = guard.borrow().clone();
        if let Some(handler) = handler {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!("subscriber handler panicked; event skipped for it");
            }
        }
    }

    fn clear(&self) {
        let guard = self.handler.lock();
        guard.borrow_mut().take();
    }
}

/// Handlers for one event type, called in subscription order.
pub(crate) struct SubscriberList<E> {
    slots: DashMap<u64, Arc<Slot<E>>>,
    next_id: AtomicU64,
}

impl<E: 'static> SubscriberList<E> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            slots: DashMap::new(),
            next_id: AtomicU64::new(0),
        })
    }

    pub(crate) fn subscribe(self: &Arc<Self>, handler: Handler<E>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(Slot::new(handler));
        self.slots.insert(id, Arc::clone(&slot));

        let list: Weak<Self> = Arc::downgrade(self);
        Subscription::new(move || {
            slot.clear();
            if let Some(list) = list.upgrade() {
                list.slots.remove(&id);
            }
        })
    }

    /// Call every live handler. Slots are snapshotted first so handlers may
    /// subscribe or unsubscribe while being called.
    pub(crate) fn dispatch(&self, event: &E) {
        let mut slots: Vec<(u64, Arc<Slot<E>>)> = self
            .slots
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        slots.sort_unstable_by_key(|(id, _)| *id);

        for (_, slot) in slots {
            slot.call(event);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Drop every handler. Outstanding `Subscription`s become no-ops.
    pub(crate) fn clear(&self) {
        let slots: Vec<Arc<Slot<E>>> = self
            .slots
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.slots.clear();
        for slot in slots {
            slot.clear();
        }
    }
}

// ── Subscription ─────────────────────────────────────────────────────

/// Unsubscribe capability returned by every `subscribe_*` call.
///
/// Dropping it unsubscribes, tying the handler to its owner's lifetime.
/// Call [`detach`](Self::detach) to keep the handler registered until the
/// endpoint shuts down.
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Remove the handler. It is guaranteed not to run after this returns,
    /// unless called from inside the handler itself, in which case the
    /// current invocation completes.
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    /// Keep the handler for the endpoint's whole lifetime.
    pub fn detach(mut self) {
        self.cancel = None;
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
