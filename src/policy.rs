//! Change-detection policies for external observers.
//!
//! An observer (a UI binding, a cache, anything re-rendering from a store)
//! subscribes through [`observe`] and only hears about changes its [`Policy`]
//! lets through. Reading the current snapshot stays `Store::get_state`.

use std::fmt;
use std::sync::Arc;

use crate::equality::deep_equals;
use crate::{Store, Subscription, Value};

static ABSENT: Value = Value::Null;

/// Decides from `(prev_state, next_state)` whether to propagate.
pub type Predicate = dyn Fn(&Value, &Value) -> bool + Send + Sync;

/// Receives the next state of every propagated change.
pub type OnUpdate = dyn Fn(&Value) + Send + Sync;

/// Which committed changes an observer hears about.
#[derive(Clone, Default)]
pub enum Policy {
    /// Every change.
    #[default]
    Always,
    /// Changes for which the predicate returns `true`. A panicking predicate
    /// unwinds into whoever committed the change.
    Predicate(Arc<Predicate>),
    /// Changes where at least one watched field differs under deep equality.
    /// Missing fields compare as `Null`. An empty list never propagates.
    WatchKeys(Vec<String>),
}

impl Policy {
    pub fn predicate(f: impl Fn(&Value, &Value) -> bool + Send + Sync + 'static) -> Self {
        Policy::Predicate(Arc::new(f))
    }

    pub fn watch_key(key: impl Into<String>) -> Self {
        Policy::WatchKeys(vec![key.into()])
    }

    pub fn watch_keys<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Policy::WatchKeys(keys.into_iter().map(Into::into).collect())
    }

    pub fn should_propagate(&self, prev: &Value, next: &Value) -> bool {
        match self {
            Policy::Always => true,
            Policy::Predicate(f) => f(prev, next),
            Policy::WatchKeys(keys) => keys.iter().any(|key| {
                let before = prev.get(key).unwrap_or(&ABSENT);
                let after = next.get(key).unwrap_or(&ABSENT);
                !deep_equals(before, after)
            }),
        }
    }
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Always => f.write_str("Always"),
            Policy::Predicate(_) => f.write_str("Predicate(..)"),
            Policy::WatchKeys(keys) => f.debug_tuple("WatchKeys").field(keys).finish(),
        }
    }
}

/// How an observer subscribes.
#[derive(Clone, Default)]
pub struct ObserveOptions {
    pub policy: Policy,
    pub on_update: Option<Arc<OnUpdate>>,
    /// Destroy the container when the observer unsubscribes. Only honoured by
    /// [`Registry::observe`](crate::Registry::observe), which knows how to
    /// remove it.
    pub delete_on_unsubscribe: bool,
}

impl ObserveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub fn on_update(mut self, f: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.on_update = Some(Arc::new(f));
        self
    }

    pub fn delete_on_unsubscribe(mut self, delete: bool) -> Self {
        self.delete_on_unsubscribe = delete;
        self
    }
}

impl fmt::Debug for ObserveOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserveOptions")
            .field("policy", &self.policy)
            .field("on_update", &self.on_update.is_some())
            .field("delete_on_unsubscribe", &self.delete_on_unsubscribe)
            .finish()
    }
}

/// Subscribes `notify` to `store`, filtered by `options.policy`.
///
/// For every propagated change `on_update` runs first with the next state,
/// then `notify`.
///
/// # Examples
///
/// ```rust
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use singletn::{observe, value, ObserveOptions, Policy, Store};
///
/// let store = Store::new("Profile", value!({ "name": "", "age": 0 }));
/// let renders = Arc::new(AtomicUsize::new(0));
/// let r = renders.clone();
///
/// let options = ObserveOptions::new().policy(Policy::watch_key("name"));
/// let sub = observe(&store, options, move || {
///     r.fetch_add(1, Ordering::SeqCst);
/// });
///
/// store.set_state(value!({ "age": 1 }));
/// store.set_state(value!({ "name": "x" }));
/// assert_eq!(renders.load(Ordering::SeqCst), 1);
/// sub.unsubscribe();
/// ```
pub fn observe(
    store: &Store,
    options: ObserveOptions,
    notify: impl Fn() + Send + Sync + 'static,
) -> Subscription {
    let ObserveOptions {
        policy, on_update, ..
    } = options;

    store.subscribe(move |change| {
        if !policy.should_propagate(&change.prev_state, &change.next_state) {
            return;
        }
        if let Some(on_update) = &on_update {
            on_update(&change.next_state);
        }
        notify();
    })
}
