//! Class-keyed registry holding at most one live container per type.
//!
//! The registry is an explicit object owned by the composition root, not a
//! hidden global: create one, hand it (or clones of it, which share storage)
//! to whatever needs containers, and call [`Registry::clear`] at test or
//! process boundaries.
//!
//! [`Registry::child`] opens a nested scope: lookups that miss in the child
//! fall back to its ancestors, while containers first constructed through the
//! child live in the child only.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use singletn::{value, Container, Create, Registry, Store};
//!
//! struct Num {
//!     store: Store,
//! }
//!
//! impl Container for Num {
//!     fn store(&self) -> &Store {
//!         &self.store
//!     }
//! }
//!
//! impl Create for Num {
//!     fn create(_: ()) -> Self {
//!         Num {
//!             store: Store::new("Num", value!({ "num": 0 })),
//!         }
//!     }
//! }
//!
//! let registry = Registry::new();
//! let a: Arc<Num> = registry.find().unwrap();
//! let b: Arc<Num> = registry.find().unwrap();
//! assert!(Arc::ptr_eq(&a, &b));
//! ```

use std::any::{Any, TypeId};
use std::collections::hash_map::Entry as MapEntry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use crate::container::{teardown, validate, Container, Create};
use crate::policy::{self, ObserveOptions};
use crate::store::{Change, Subscription};
use crate::{RegistryEvent, Result, SingletnError};

/// Type alias for the user-supplied tracing callback.
///
/// The callback receives a reference to a `RegistryEvent` every time the
/// registry is interacted with.
pub type TraceCallback = dyn Fn(&RegistryEvent) + Send + Sync + 'static;

/// How a caller designates a container: by type, constructing it with `A` on
/// first use, or by an instance it already holds.
pub enum Lookup<C, A = ()> {
    Ref(A),
    Instance(Arc<C>),
}

/// One registered container, kept both as `Any` (for typed retrieval) and as
/// `dyn Container` (for type-erased teardown).
struct Entry {
    instance: Arc<dyn Any + Send + Sync>,
    container: Arc<dyn Container>,
}

impl Entry {
    fn new<C: Container>(instance: Arc<C>) -> Self {
        Self {
            instance: instance.clone(),
            container: instance,
        }
    }

    fn points_at(&self, target: *const ()) -> bool {
        Arc::as_ptr(&self.container).cast::<()>() == target
    }
}

#[derive(Default)]
struct RegistryInner {
    entries: Mutex<HashMap<TypeId, Entry>>,
    trace: Mutex<Option<Arc<TraceCallback>>>,
    parent: Option<Registry>,
}

/// Map from container type to its singleton instance.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A nested scope inheriting every instance visible from `self`.
    ///
    /// Instances the child constructs or registers stay in the child, and
    /// shadow the parent's for lookups through the child. [`Registry::delete`],
    /// [`Registry::clear`] and [`Registry::len`] only see the child's own
    /// entries.
    pub fn child(&self) -> Registry {
        Registry {
            inner: Arc::new(RegistryInner {
                parent: Some(self.clone()),
                ..RegistryInner::default()
            }),
        }
    }

    pub fn parent(&self) -> Option<&Registry> {
        self.inner.parent.as_ref()
    }

    /// This scope followed by its ancestors, innermost first.
    fn scopes(&self) -> impl Iterator<Item = &Registry> {
        std::iter::successors(Some(self), |scope| scope.inner.parent.as_ref())
    }

    // -------------------------------------------------------------------------------------------------
    // Tracing
    // -------------------------------------------------------------------------------------------------

    /// Set a tracing callback for registry operations.
    ///
    /// # Lock Poisoning Recovery
    ///
    /// If the trace lock is poisoned, this method automatically recovers by
    /// extracting the inner value.
    pub fn set_trace_callback(&self, callback: impl Fn(&RegistryEvent) + Send + Sync + 'static) {
        let mut guard = self.inner.trace.lock().unwrap_or_else(|p| p.into_inner());
        *guard = Some(Arc::new(callback));
    }

    /// Clear the tracing callback.
    pub fn clear_trace_callback(&self) {
        let mut guard = self.inner.trace.lock().unwrap_or_else(|p| p.into_inner());
        *guard = None;
    }

    /// Invokes the current callback, if any. The trace lock is released before
    /// the callback runs, so a callback may use the registry.
    fn emit_event(&self, event: &RegistryEvent) {
        let callback = self
            .inner
            .trace
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        if let Some(callback) = callback {
            callback(event);
        }
    }

    // -------------------------------------------------------------------------------------------------
    // Registry
    // -------------------------------------------------------------------------------------------------

    /// Returns the singleton of `C`, constructing it on first use.
    pub fn find<C: Create>(&self) -> Result<Arc<C>> {
        self.find_with::<C, ()>(())
    }

    /// Returns the singleton of `C`, constructing it with `args` on first use.
    ///
    /// Arguments of later calls are ignored once an instance exists.
    ///
    /// # Errors
    ///
    /// - The constructed container violates the container contract
    /// - The entry for `C` holds a different type (should never happen)
    pub fn find_with<C: Create<A>, A>(&self, args: A) -> Result<Arc<C>> {
        let type_name = std::any::type_name::<C>();

        if let Some(existing) = self.get::<C>()? {
            self.emit_event(&RegistryEvent::Find {
                type_name,
                found: true,
            });
            return Ok(existing);
        }

        self.emit_event(&RegistryEvent::Find {
            type_name,
            found: false,
        });

        // Constructed outside the lock: a constructor may itself look up
        // other containers.
        let created = Arc::new(C::create(args));
        validate(&*created)?;

        let raced = {
            let mut entries = self.inner.entries.lock().unwrap_or_else(|p| p.into_inner());
            let raced = match entries.entry(TypeId::of::<C>()) {
                MapEntry::Occupied(existing) => Some(downcast::<C>(existing.get())),
                MapEntry::Vacant(slot) => {
                    slot.insert(Entry::new(created.clone()));
                    None
                }
            };
            raced
        };

        if let Some(existing) = raced {
            tracing::debug!(type_name, "lost construction race, using the registered instance");
            return existing;
        }

        tracing::debug!(type_name, store = %created.store().name(), "container created");
        self.emit_event(&RegistryEvent::Create { type_name });
        Ok(created)
    }

    /// Resolves a [`Lookup`]: an instance is returned as is, a type goes
    /// through [`Registry::find_with`].
    pub fn resolve<C: Create<A>, A>(&self, lookup: Lookup<C, A>) -> Result<Arc<C>> {
        match lookup {
            Lookup::Ref(args) => self.find_with::<C, A>(args),
            Lookup::Instance(instance) => Ok(instance),
        }
    }

    /// Returns the instance of `C` visible from this scope without
    /// constructing one.
    pub fn get<C: Container>(&self) -> Result<Option<Arc<C>>> {
        for scope in self.scopes() {
            if let Some(found) = scope.get_local::<C>()? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    fn get_local<C: Container>(&self) -> Result<Option<Arc<C>>> {
        let entries = self.inner.entries.lock().unwrap_or_else(|p| p.into_inner());
        let found = entries.get(&TypeId::of::<C>()).map(downcast::<C>).transpose();
        found
    }

    /// Whether an instance of `C` is visible from this scope.
    pub fn contains<C: Container>(&self) -> bool {
        self.scopes().any(|scope| {
            scope
                .inner
                .entries
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .contains_key(&TypeId::of::<C>())
        })
    }

    /// Registers an instance constructed elsewhere as the singleton of `C`.
    ///
    /// Returns the instance it replaced, if any. The replaced instance is not
    /// destroyed.
    pub fn register<C: Container>(&self, instance: Arc<C>) -> Result<Option<Arc<C>>> {
        validate(&*instance)?;
        let previous = self
            .inner
            .entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(TypeId::of::<C>(), Entry::new(instance));

        self.emit_event(&RegistryEvent::Create {
            type_name: std::any::type_name::<C>(),
        });

        previous.as_ref().map(downcast::<C>).transpose()
    }

    /// Removes and destroys the singleton of `C`. Returns `false` if there was
    /// none.
    pub fn delete<C: Container>(&self) -> bool {
        let removed = self
            .inner
            .entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&TypeId::of::<C>());

        match removed {
            Some(entry) => {
                let target = Arc::as_ptr(&entry.container).cast::<()>();
                self.destroy(std::any::type_name::<C>(), target, entry.container)
            }
            None => false,
        }
    }

    /// Removes every entry pointing at `instance`, in this scope and its
    /// ancestors, then destroys it.
    ///
    /// Works for instances that were never registered too. Returns `false`
    /// if the instance was already destroyed.
    pub fn delete_instance<C: Container>(&self, instance: &Arc<C>) -> bool {
        let target = Arc::as_ptr(instance).cast::<()>();
        let container: Arc<dyn Container> = instance.clone();
        self.destroy(std::any::type_name::<C>(), target, container)
    }

    /// Destroys every registered instance and empties the registry.
    pub fn clear(&self) {
        self.emit_event(&RegistryEvent::Clear {});

        let drained: Vec<Entry> = self
            .inner
            .entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .drain()
            .map(|(_, entry)| entry)
            .collect();

        let mut seen: Vec<*const ()> = Vec::with_capacity(drained.len());
        for entry in drained {
            let target = Arc::as_ptr(&entry.container).cast::<()>();
            if seen.contains(&target) {
                continue;
            }
            seen.push(target);
            teardown(&*entry.container);
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribes to `instance`'s changes.
    ///
    /// With `delete_on_unsubscribe`, unsubscribing also deletes and destroys
    /// the container, binding its lifetime to this one listener.
    pub fn subscribe<C: Container>(
        &self,
        instance: &Arc<C>,
        listener: impl Fn(&Change) + Send + Sync + 'static,
        delete_on_unsubscribe: bool,
    ) -> Subscription {
        let subscription = instance.store().subscribe(listener);
        if delete_on_unsubscribe {
            self.bind_lifetime(instance, subscription)
        } else {
            subscription
        }
    }

    /// Observes `instance` through a change-detection policy, honouring
    /// `options.delete_on_unsubscribe`.
    pub fn observe<C: Container>(
        &self,
        instance: &Arc<C>,
        options: ObserveOptions,
        notify: impl Fn() + Send + Sync + 'static,
    ) -> Subscription {
        let delete = options.delete_on_unsubscribe;
        let subscription = policy::observe(instance.store(), options, notify);
        if delete {
            self.bind_lifetime(instance, subscription)
        } else {
            subscription
        }
    }

    fn bind_lifetime<C: Container>(&self, instance: &Arc<C>, subscription: Subscription) -> Subscription {
        let registry: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let instance = Arc::clone(instance);

        subscription.with_teardown(move || match registry.upgrade() {
            Some(inner) => {
                Registry { inner }.delete_instance(&instance);
            }
            None => {
                teardown(&*instance);
            }
        })
    }

    fn destroy(&self, type_name: &'static str, target: *const (), container: Arc<dyn Container>) -> bool {
        for scope in self.scopes() {
            scope
                .inner
                .entries
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .retain(|_, entry| !entry.points_at(target));
        }

        if !teardown(&*container) {
            return false;
        }

        self.emit_event(&RegistryEvent::Delete { type_name });
        true
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("len", &self.len())
            .field("nested", &self.inner.parent.is_some())
            .finish()
    }
}

fn downcast<C: Container>(entry: &Entry) -> Result<Arc<C>> {
    Arc::clone(&entry.instance)
        .downcast::<C>()
        .map_err(|_| SingletnError::TypeMismatch {
            type_name: std::any::type_name::<C>(),
        })
}

// -------------------------------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{value, Store, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Num {
        store: Store,
    }

    impl Container for Num {
        fn store(&self) -> &Store {
            &self.store
        }
    }

    impl Create for Num {
        fn create(_: ()) -> Self {
            Num {
                store: Store::new("Num", value!({ "num": 0 })),
            }
        }
    }

    impl Create<i64> for Num {
        fn create(start: i64) -> Self {
            Num {
                store: Store::new("Num", value!({ "num": start })),
            }
        }
    }

    struct Broken {
        store: Store,
    }

    impl Container for Broken {
        fn store(&self) -> &Store {
            &self.store
        }
    }

    impl Create for Broken {
        fn create(_: ()) -> Self {
            Broken {
                store: Store::new("Broken", Value::Null),
            }
        }
    }

    #[test]
    fn test_find_returns_same_instance() -> Result<()> {
        let registry = Registry::new();
        let a: Arc<Num> = registry.find()?;
        let b: Arc<Num> = registry.find()?;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
        Ok(())
    }

    #[test]
    fn test_constructor_args_only_used_first_time() -> Result<()> {
        let registry = Registry::new();
        let first: Arc<Num> = registry.find_with(7i64)?;
        let second: Arc<Num> = registry.find_with(99i64)?;

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.store().get_state().get("num"), Some(&Value::from(7)));
        Ok(())
    }

    #[test]
    fn test_contract_violation_is_rejected() {
        let registry = Registry::new();
        let result = registry.find::<Broken>();
        assert!(matches!(result, Err(SingletnError::Contract { .. })));
        assert!(!registry.contains::<Broken>());
    }

    #[test]
    fn test_delete_then_find_constructs_new_instance() -> Result<()> {
        let registry = Registry::new();
        let first: Arc<Num> = registry.find()?;

        assert!(registry.delete_instance(&first));
        assert!(first.store().is_destroyed());

        let second: Arc<Num> = registry.find()?;
        assert!(!Arc::ptr_eq(&first, &second));
        Ok(())
    }

    #[test]
    fn test_delete_by_type() -> Result<()> {
        let registry = Registry::new();
        let num: Arc<Num> = registry.find()?;

        assert!(registry.delete::<Num>());
        assert!(!registry.delete::<Num>());
        assert!(num.store().is_destroyed());
        assert!(registry.is_empty());
        Ok(())
    }

    #[test]
    fn test_resolve_instance_bypasses_registry() -> Result<()> {
        let registry = Registry::new();
        let local = Arc::new(<Num as Create>::create(()));

        let resolved = registry.resolve(Lookup::<Num>::Instance(local.clone()))?;

        assert!(Arc::ptr_eq(&local, &resolved));
        assert!(!registry.contains::<Num>());
        Ok(())
    }

    #[test]
    fn test_register_replaces_without_destroying() -> Result<()> {
        let registry = Registry::new();
        let first: Arc<Num> = registry.find()?;
        let replacement = Arc::new(<Num as Create>::create(()));

        let previous = registry.register(replacement.clone())?;

        assert!(Arc::ptr_eq(&previous.unwrap(), &first));
        assert!(!first.store().is_destroyed());
        assert!(Arc::ptr_eq(&registry.find::<Num>()?, &replacement));
        Ok(())
    }

    #[test]
    fn test_clear_destroys_everything() -> Result<()> {
        let registry = Registry::new();
        let num: Arc<Num> = registry.find()?;

        registry.clear();

        assert!(registry.is_empty());
        assert!(num.store().is_destroyed());
        Ok(())
    }

    #[test]
    fn test_delete_on_unsubscribe() -> Result<()> {
        let registry = Registry::new();
        let num: Arc<Num> = registry.find()?;
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();

        let sub = registry.subscribe(
            &num,
            move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            },
            true,
        );
        num.store().set_state(value!({ "num": 1 }));
        sub.unsubscribe();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(num.store().is_destroyed());
        assert!(!registry.contains::<Num>());
        Ok(())
    }

    #[test]
    fn test_trace_events() -> Result<()> {
        let registry = Registry::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        registry.set_trace_callback(move |e| sink.lock().unwrap().push(e.to_string()));

        let _: Arc<Num> = registry.find()?;
        let _: Arc<Num> = registry.find()?;
        registry.delete::<Num>();
        registry.clear();

        let type_name = std::any::type_name::<Num>();
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                format!("find {{ type_name: {type_name}, found: false }}"),
                format!("create {{ type_name: {type_name} }}"),
                format!("find {{ type_name: {type_name}, found: true }}"),
                format!("delete {{ type_name: {type_name} }}"),
                "Clearing the Registry".to_string(),
            ]
        );

        registry.clear_trace_callback();
        Ok(())
    }

    #[test]
    fn test_clones_share_storage() -> Result<()> {
        let registry = Registry::new();
        let other = registry.clone();
        let a: Arc<Num> = registry.find()?;
        let b: Arc<Num> = other.find()?;
        assert!(Arc::ptr_eq(&a, &b));
        Ok(())
    }

    #[test]
    fn test_child_inherits_parent_instances() -> Result<()> {
        let parent = Registry::new();
        let outer: Arc<Num> = parent.find()?;

        let child = parent.child();
        let inner: Arc<Num> = child.find()?;

        assert!(Arc::ptr_eq(&outer, &inner));
        assert!(child.contains::<Num>());
        assert!(child.is_empty());
        Ok(())
    }

    #[test]
    fn test_child_constructions_stay_in_child() -> Result<()> {
        let parent = Registry::new();
        let child = parent.child();

        let scoped: Arc<Num> = child.find_with(3i64)?;

        assert!(!parent.contains::<Num>());
        assert_eq!(child.len(), 1);

        let outer: Arc<Num> = parent.find()?;
        assert!(!Arc::ptr_eq(&scoped, &outer));
        assert!(Arc::ptr_eq(&child.find::<Num>()?, &scoped));
        Ok(())
    }

    #[test]
    fn test_delete_instance_through_child_unregisters_from_parent() -> Result<()> {
        let parent = Registry::new();
        let outer: Arc<Num> = parent.find()?;
        let child = parent.child();

        assert!(child.delete_instance(&outer));

        assert!(!parent.contains::<Num>());
        assert!(outer.store().is_destroyed());
        Ok(())
    }

    #[test]
    fn test_clearing_child_keeps_parent() -> Result<()> {
        let parent = Registry::new();
        let outer: Arc<Num> = parent.find()?;
        let child = parent.child();
        let _: Arc<Num> = child.find()?;

        child.clear();

        assert!(!outer.store().is_destroyed());
        assert!(parent.contains::<Num>());
        assert!(child.parent().is_some());
        Ok(())
    }
}
