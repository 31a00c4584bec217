//! Capability traits every container type implements.

use crate::{Result, SingletnError, Store};

/// A state container: a type owning one [`Store`] plus its mutation methods.
///
/// # Examples
///
/// ```rust
/// use singletn::{value, Container, Create, Store};
///
/// struct Counter {
///     store: Store,
/// }
///
/// impl Counter {
///     fn increment(&self) {
///         self.store.set_state_with(|s| {
///             let count = s.get("count")?.as_f64()?;
///             Some(value!({ "count": count + 1.0 }))
///         });
///     }
/// }
///
/// impl Container for Counter {
///     fn store(&self) -> &Store {
///         &self.store
///     }
/// }
///
/// impl Create for Counter {
///     fn create(_: ()) -> Self {
///         Counter {
///             store: Store::new("Counter", value!({ "count": 0 })),
///         }
///     }
/// }
///
/// let counter = Counter::create(());
/// counter.increment();
/// assert_eq!(*counter.store().get_state(), value!({ "count": 1 }));
/// ```
pub trait Container: Send + Sync + 'static {
    fn store(&self) -> &Store;

    /// User teardown hook. Runs once, before the store releases its backing
    /// store.
    fn destroy(&self) {}
}

/// Construction used by the registry on first lookup.
///
/// `Args` are forwarded only when the container is first created; later
/// lookups return the existing instance and ignore their arguments.
pub trait Create<Args = ()>: Container + Sized {
    fn create(args: Args) -> Self;
}

/// Checks what the type system cannot: a live container has a state.
pub(crate) fn validate<C: Container>(container: &C) -> Result<()> {
    if container.store().get_state().is_null() {
        return Err(SingletnError::Contract {
            type_name: std::any::type_name::<C>(),
            reason: "state must not be null after construction",
        });
    }
    Ok(())
}

/// Destroys a container: its own `destroy` hook first, then the store's
/// internal cleanup. Only the first call has an effect.
///
/// This is for containers created directly and never registered. It knows
/// nothing about registries: a registered container torn down here stays
/// registered, and later lookups return the destroyed instance. Destroy
/// registered containers with
/// [`Registry::delete_instance`](crate::Registry::delete_instance) or
/// [`Registry::delete`](crate::Registry::delete) instead.
pub fn teardown(container: &dyn Container) -> bool {
    let store = container.store();
    if !store.begin_teardown() {
        return false;
    }

    container.destroy();
    store.cleanup();
    tracing::debug!(store = %store.name(), "container destroyed");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{value, Value};
    use std::sync::{Arc, Mutex};

    struct Gauge {
        store: Store,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Container for Gauge {
        fn store(&self) -> &Store {
            &self.store
        }

        fn destroy(&self) {
            self.log.lock().unwrap().push("destroy");
        }
    }

    #[test]
    fn test_teardown_runs_destroy_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let gauge = Gauge {
            store: Store::new("Gauge", value!({})),
            log: log.clone(),
        };

        assert!(teardown(&gauge));
        assert!(!teardown(&gauge));

        assert_eq!(*log.lock().unwrap(), vec!["destroy"]);
        assert!(gauge.store().is_destroyed());
    }

    #[test]
    fn test_validate_rejects_null_state() {
        let gauge = Gauge {
            store: Store::new("Gauge", Value::Null),
            log: Arc::new(Mutex::new(Vec::new())),
        };

        let err = validate(&gauge).unwrap_err();
        assert!(matches!(err, SingletnError::Contract { .. }));
    }
}
