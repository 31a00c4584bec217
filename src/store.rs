//! The state container contract.
//!
//! A [`Store`] owns exactly one [`Value`] and one [`Emitter`]. Every committed
//! update replaces the stored reference (state is never mutated in place) and,
//! unless the update is silent, notifies subscribers with the previous and next
//! state.

use std::borrow::Cow;
use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock, Weak};

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;

use crate::emitter::{Emitter, Unsubscribe};
use crate::persist::Backend;
use crate::{Result, Value};

// -------------------------------------------------------------------------------------------------
// Change payload
// -------------------------------------------------------------------------------------------------

/// Where a committed update came from.
///
/// The location is captured with `#[track_caller]`, so it points at the code
/// that called `set_state` (typically a mutation method of a container). The
/// optional label is supplied explicitly through [`Store::set_state_as`].
#[derive(Debug, Clone)]
pub struct Origin {
    label: Option<Cow<'static, str>>,
    location: &'static Location<'static>,
}

impl Origin {
    fn new(label: Option<Cow<'static, str>>, location: &'static Location<'static>) -> Self {
        Self { label, location }
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// The label if one was given, otherwise `file:line` of the caller.
    pub fn method_name(&self) -> String {
        match &self.label {
            Some(label) => label.to_string(),
            None => format!("{}:{}", self.location.file(), self.location.line()),
        }
    }
}

/// Payload delivered to subscribers on every non-silent commit.
#[derive(Debug, Clone)]
pub struct Change {
    pub prev_state: Arc<Value>,
    pub next_state: Arc<Value>,
    pub origin: Origin,
}

// -------------------------------------------------------------------------------------------------
// Updater
// -------------------------------------------------------------------------------------------------

type ComputeFn = Box<dyn FnOnce(&Value) -> Option<Value> + Send>;

/// What `set_state` applies: a ready patch, or a function of the current state.
///
/// `None` from a compute function, or a `Null` patch, means "no change": nothing
/// is committed, written or emitted.
pub enum Updater {
    Patch(Value),
    Compute(ComputeFn),
}

impl Updater {
    pub fn with(f: impl FnOnce(&Value) -> Option<Value> + Send + 'static) -> Self {
        Updater::Compute(Box::new(f))
    }

    fn resolve(self, current: &Value) -> Option<Value> {
        match self {
            Updater::Patch(patch) => Some(patch),
            Updater::Compute(f) => f(current),
        }
    }
}

impl From<Value> for Updater {
    fn from(patch: Value) -> Self {
        Updater::Patch(patch)
    }
}

impl fmt::Debug for Updater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Updater::Patch(patch) => f.debug_tuple("Patch").field(patch).finish(),
            Updater::Compute(_) => f.write_str("Compute(..)"),
        }
    }
}

#[derive(Clone, Copy)]
struct Commit {
    notify: bool,
    write_through: bool,
}

impl Commit {
    const NORMAL: Commit = Commit {
        notify: true,
        write_through: true,
    };
    const SILENT: Commit = Commit {
        notify: false,
        write_through: true,
    };
    const HYDRATE: Commit = Commit {
        notify: true,
        write_through: false,
    };
}

// -------------------------------------------------------------------------------------------------
// Store
// -------------------------------------------------------------------------------------------------

struct StoreInner {
    name: String,
    state: RwLock<Arc<Value>>,
    emitter: Emitter<Change>,
    backend: OnceLock<Arc<dyn Backend>>,
    destroyed: AtomicBool,
}

/// A state container: one value, one emitter, optionally a backing store.
///
/// `Store` is a cheap handle; clones share the same state.
///
/// # Examples
///
/// ```rust
/// use singletn::{value, Store};
///
/// let store = Store::new("Profile", value!({ "a": 0, "b": 2 }));
/// store.set_state(value!({ "a": 1 }));
///
/// assert_eq!(*store.get_state(), value!({ "a": 1, "b": 2 }));
/// ```
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Creates an in-memory store. `name` identifies the store in traces and
    /// inspection records.
    pub fn new(name: impl Into<String>, initial: impl Into<Value>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                name: name.into(),
                state: RwLock::new(Arc::new(initial.into())),
                emitter: Emitter::new(),
                backend: OnceLock::new(),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The current state reference. Never a copy.
    pub fn get_state(&self) -> Arc<Value> {
        Arc::clone(&self.inner.state.read().unwrap_or_else(|p| p.into_inner()))
    }

    /// The current state converted into a typed value.
    pub fn get_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(self.get_state().deserialize_into()?)
    }

    /// Applies `updater` and notifies subscribers. Returns whether anything
    /// was committed.
    #[track_caller]
    pub fn set_state(&self, updater: impl Into<Updater>) -> bool {
        let origin = Origin::new(None, Location::caller());
        self.apply(updater.into(), Commit::NORMAL, origin)
    }

    /// Like [`Store::set_state`], with an explicit label recorded in the
    /// change origin.
    #[track_caller]
    pub fn set_state_as(
        &self,
        label: impl Into<Cow<'static, str>>,
        updater: impl Into<Updater>,
    ) -> bool {
        let origin = Origin::new(Some(label.into()), Location::caller());
        self.apply(updater.into(), Commit::NORMAL, origin)
    }

    /// Computes the patch from the current state.
    #[track_caller]
    pub fn set_state_with(&self, f: impl FnOnce(&Value) -> Option<Value> + Send + 'static) -> bool {
        let origin = Origin::new(None, Location::caller());
        self.apply(Updater::with(f), Commit::NORMAL, origin)
    }

    /// Commits and writes through without notifying subscribers.
    #[track_caller]
    pub fn set_state_silently(&self, updater: impl Into<Updater>) -> bool {
        let origin = Origin::new(None, Location::caller());
        self.apply(updater.into(), Commit::SILENT, origin)
    }

    /// Computes the patch with a fallible function. On error nothing is
    /// committed and the error is returned as is.
    #[track_caller]
    pub fn try_set_state<E>(
        &self,
        f: impl FnOnce(&Value) -> std::result::Result<Option<Value>, E>,
    ) -> std::result::Result<bool, E> {
        let origin = Origin::new(None, Location::caller());
        let current = self.get_state();
        let patch = f(&current)?;
        Ok(self.commit(patch, Commit::NORMAL, origin))
    }

    /// Registers a listener for every non-silent commit.
    pub fn subscribe(&self, listener: impl Fn(&Change) + Send + Sync + 'static) -> Subscription {
        Subscription::new(self.inner.emitter.subscribe(listener))
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.emitter.listener_count()
    }

    /// Resolves once every backing-store write queued so far has landed.
    /// Immediate for stores without an asynchronous backend.
    pub fn flush(&self) -> BoxFuture<'static, ()> {
        match self.inner.backend.get() {
            Some(backend) => backend.flush(),
            None => Box::pin(futures::future::ready(())),
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    pub fn ptr_eq(&self, other: &Store) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn downgrade(&self) -> WeakStore {
        WeakStore {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // ---------------------------------------------------------------------------------------------
    // Crate internals
    // ---------------------------------------------------------------------------------------------

    pub(crate) fn attach_backend(&self, backend: Arc<dyn Backend>) {
        if self.inner.backend.set(backend).is_err() {
            tracing::warn!(store = %self.name(), "backing store already attached, ignoring");
        }
    }

    /// Merges values loaded from a backing store: notifies, never writes back.
    ///
    /// `loaded` runs under the state lock, so no update can land between the
    /// backend deciding what to merge and the merge itself.
    pub(crate) fn hydrate(&self, loaded: impl FnOnce(&Value) -> Option<Value>) -> bool {
        let origin = Origin::new(Some(Cow::Borrowed("hydrate")), Location::caller());
        self.commit_locked(loaded, Commit::HYDRATE, origin)
    }

    /// Flags the store as destroyed. Returns `false` if it already was.
    pub(crate) fn begin_teardown(&self) -> bool {
        !self.inner.destroyed.swap(true, Ordering::SeqCst)
    }

    /// Releases the backing store, if any.
    pub(crate) fn cleanup(&self) {
        if let Some(backend) = self.inner.backend.get() {
            backend.cleanup();
        }
    }

    fn apply(&self, updater: Updater, mode: Commit, origin: Origin) -> bool {
        let current = self.get_state();
        let patch = updater.resolve(&current);
        self.commit(patch, mode, origin)
    }

    fn commit(&self, patch: Option<Value>, mode: Commit, origin: Origin) -> bool {
        self.commit_locked(move |_| patch, mode, origin)
    }

    /// Computes the patch from the current state and commits it under the
    /// state lock. Write-through also happens under the lock, so backends see
    /// patches in commit order. Neither `patch` nor a backend may call back
    /// into the store.
    fn commit_locked(
        &self,
        patch: impl FnOnce(&Value) -> Option<Value>,
        mode: Commit,
        origin: Origin,
    ) -> bool {
        let (prev_state, next_state) = {
            let mut state = self.inner.state.write().unwrap_or_else(|p| p.into_inner());
            let Some(patch) = patch(&**state).filter(|p| !p.is_null()) else {
                tracing::trace!(store = %self.name(), "no-op update skipped");
                return false;
            };

            let prev = Arc::clone(&state);
            let next = Arc::new(prev.merged(&patch));
            *state = Arc::clone(&next);

            if mode.write_through && !self.is_destroyed() {
                if let Some(backend) = self.inner.backend.get() {
                    backend.write(&patch, &next);
                }
            }
            (prev, next)
        };

        if mode.notify {
            self.inner.emitter.emit(&Change {
                prev_state,
                next_state,
                origin,
            });
        }

        true
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.inner.name)
            .field("state", &self.get_state())
            .field("subscribers", &self.subscriber_count())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

/// A non-owning reference to a [`Store`].
#[derive(Clone)]
pub struct WeakStore {
    inner: Weak<StoreInner>,
}

impl WeakStore {
    pub fn upgrade(&self) -> Option<Store> {
        self.inner.upgrade().map(|inner| Store { inner })
    }
}

// -------------------------------------------------------------------------------------------------
// Subscription
// -------------------------------------------------------------------------------------------------

/// Handle returned by every subscribe call.
///
/// [`Subscription::unsubscribe`] removes the listener, then runs the teardown
/// attached to the subscription, if any (used to destroy a container whose
/// lifetime is bound to a single observer).
#[must_use = "dropping the subscription keeps the listener registered forever"]
pub struct Subscription {
    handle: Unsubscribe<Change>,
    on_unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    fn new(handle: Unsubscribe<Change>) -> Self {
        Self {
            handle,
            on_unsubscribe: None,
        }
    }

    pub(crate) fn with_teardown(mut self, teardown: impl FnOnce() + Send + 'static) -> Self {
        self.on_unsubscribe = Some(Box::new(teardown));
        self
    }

    pub fn unsubscribe(self) {
        self.handle.unsubscribe();
        if let Some(teardown) = self.on_unsubscribe {
            teardown();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.handle.id())
            .field("teardown", &self.on_unsubscribe.is_some())
            .finish()
    }
}

// -------------------------------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------------------------------
