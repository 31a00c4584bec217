//! Synchronous multi-listener notification primitive.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// A listener receiving a shared reference to every emitted payload.
pub type Listener<T> = dyn Fn(&T) + Send + Sync + 'static;

type Listeners<T> = Mutex<Vec<(u64, Arc<Listener<T>>)>>;

/// Process-unique listener ids, shared by every emitter.
static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Delivers payloads to every registered listener, synchronously and in
/// registration order.
///
/// There is no replay: a listener only sees payloads emitted after it
/// subscribed. Listeners are not isolated from each other, so a panicking
/// listener unwinds through `emit` and the listeners after it are skipped.
pub struct Emitter<T> {
    listeners: Arc<Listeners<T>>,
}

impl<T> Emitter<T> {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Registers `listener` and returns the handle that removes it again.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Unsubscribe<T> {
        let id = NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((id, Arc::new(listener)));

        Unsubscribe {
            listeners: Arc::downgrade(&self.listeners),
            id,
        }
    }

    /// Invokes every listener registered at the time of the call.
    ///
    /// The listener list is snapshotted first and no lock is held while
    /// listeners run, so a listener may subscribe, unsubscribe or emit again.
    pub fn emit(&self, payload: &T) {
        let snapshot: Vec<Arc<Listener<T>>> = self
            .listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in snapshot {
            listener(payload);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Drops every listener.
    pub fn clear(&self) {
        self.listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }
}

impl<T> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            listeners: Arc::clone(&self.listeners),
        }
    }
}

impl<T> std::fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Removes exactly one listener from the emitter it came from.
///
/// Dropping the handle without calling [`Unsubscribe::unsubscribe`] leaves the
/// listener registered.
#[must_use = "dropping the handle keeps the listener registered forever"]
pub struct Unsubscribe<T> {
    listeners: Weak<Listeners<T>>,
    id: u64,
}

impl<T> Unsubscribe<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl<T> std::fmt::Debug for Unsubscribe<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_reaches_every_listener_in_order() {
        let emitter = Emitter::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = seen.clone();
        let _a = emitter.subscribe(move |n| first.lock().unwrap().push(("a", *n)));
        let second = seen.clone();
        let _b = emitter.subscribe(move |n| second.lock().unwrap().push(("b", *n)));

        emitter.emit(&7);

        assert_eq!(*seen.lock().unwrap(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn test_unsubscribe_removes_only_that_listener() {
        let emitter = Emitter::<()>::new();
        let count = Arc::new(AtomicU64::new(0));

        let c1 = count.clone();
        let a = emitter.subscribe(move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = count.clone();
        let _b = emitter.subscribe(move |_| {
            c2.fetch_add(10, Ordering::SeqCst);
        });

        a.unsubscribe();
        emitter.emit(&());

        assert_eq!(count.load(Ordering::SeqCst), 10);
        assert_eq!(emitter.listener_count(), 1);
    }

    #[test]
    fn test_no_replay_for_late_subscribers() {
        let emitter = Emitter::<u8>::new();
        emitter.emit(&1);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = emitter.subscribe(move |n| sink.lock().unwrap().push(*n));
        emitter.emit(&2);

        assert_eq!(*seen.lock().unwrap(), vec![2]);
    }

    #[test]
    fn test_ids_are_unique_across_emitters() {
        let a = Emitter::<()>::new().subscribe(|_| {});
        let b = Emitter::<()>::new().subscribe(|_| {});
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_listener_may_unsubscribe_during_emit() {
        let emitter = Emitter::<()>::new();
        let handle: Arc<Mutex<Option<Unsubscribe<()>>>> = Arc::new(Mutex::new(None));
        let count = Arc::new(AtomicU64::new(0));

        let slot = handle.clone();
        let c = count.clone();
        let sub = emitter.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = slot.lock().unwrap().take() {
                sub.unsubscribe();
            }
        });
        *handle.lock().unwrap() = Some(sub);

        emitter.emit(&());
        emitter.emit(&());

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_listener_stops_later_listeners() {
        let emitter = Emitter::<()>::new();
        let reached = Arc::new(AtomicU64::new(0));

        let _boom = emitter.subscribe(|_| panic!("listener failure"));
        let r = reached.clone();
        let _after = emitter.subscribe(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        });

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| emitter.emit(&())));

        assert!(result.is_err());
        assert_eq!(reached.load(Ordering::SeqCst), 0);
    }
}
