//! Development-time inspection bridge.
//!
//! An [`Inspector`] relays every committed change of the stores it tracks to
//! its own listeners as serializable [`ChangeRecord`]s, and accepts
//! [`Command`]s that revert a tracked store to a given state. A disabled
//! inspector tracks nothing, so production code can keep the calls in place.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::emitter::{Emitter, Unsubscribe};
use crate::store::WeakStore;
use crate::{Config, Result, SingletnError, Store, Subscription, Value};

/// Outbound record of one committed change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub id: String,
    pub singletn_name: String,
    /// The label passed to `set_state_as`, or the caller's `file:line`.
    pub method_name: String,
    pub prev_state: Value,
    pub next_state: Value,
}

/// Inbound command: merge `revert_to_state` into the store tracked as `id`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub id: String,
    pub revert_to_state: Value,
}

struct Tracked {
    store: WeakStore,
    subscription: Subscription,
}

impl Tracked {
    /// The store, unless it was dropped or destroyed.
    fn live(&self) -> Option<Store> {
        self.store.upgrade().filter(|store| !store.is_destroyed())
    }
}

/// Forgets every tracked store that is no longer live.
fn prune(instances: &mut HashMap<String, Tracked>) {
    let dead: Vec<String> = instances
        .iter()
        .filter(|(_, tracked)| tracked.live().is_none())
        .map(|(id, _)| id.clone())
        .collect();

    for id in dead {
        if let Some(tracked) = instances.remove(&id) {
            tracked.subscription.unsubscribe();
            tracing::debug!(id = %id, "forgot store that is no longer live");
        }
    }
}

struct InspectorInner {
    enabled: bool,
    channel: Emitter<ChangeRecord>,
    instances: Mutex<HashMap<String, Tracked>>,
}

#[derive(Clone)]
pub struct Inspector {
    inner: Arc<InspectorInner>,
}

impl Inspector {
    pub fn new(enabled: bool) -> Self {
        Self {
            inner: Arc::new(InspectorInner {
                enabled,
                channel: Emitter::new(),
                instances: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.devtools)
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    /// Starts relaying `store`'s changes. Returns the id assigned to it, or
    /// `None` when the inspector is disabled.
    pub fn track(&self, store: &Store) -> Option<String> {
        if !self.inner.enabled {
            return None;
        }

        let id = Uuid::new_v4().to_string();
        let inspector: Weak<InspectorInner> = Arc::downgrade(&self.inner);
        let record_id = id.clone();
        let name = store.name().to_owned();

        let subscription = store.subscribe(move |change| {
            let Some(inspector) = inspector.upgrade() else {
                return;
            };
            inspector.channel.emit(&ChangeRecord {
                id: record_id.clone(),
                singletn_name: name.clone(),
                method_name: change.origin.method_name(),
                prev_state: (*change.prev_state).clone(),
                next_state: (*change.next_state).clone(),
            });
        });

        tracing::debug!(store = %store.name(), id = %id, "tracking store");
        let mut instances = self.inner.instances.lock().unwrap_or_else(|p| p.into_inner());
        prune(&mut instances);
        instances.insert(
            id.clone(),
            Tracked {
                store: store.downgrade(),
                subscription,
            },
        );
        Some(id)
    }

    /// Stops relaying the store tracked as `id`. Returns `false` if there was
    /// no such store.
    pub fn untrack(&self, id: &str) -> bool {
        let removed = self
            .inner
            .instances
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(id);

        match removed {
            Some(tracked) => {
                tracked.subscription.unsubscribe();
                true
            }
            None => false,
        }
    }

    /// Number of tracked stores that are still live.
    pub fn tracked_count(&self) -> usize {
        let mut instances = self.inner.instances.lock().unwrap_or_else(|p| p.into_inner());
        prune(&mut instances);
        instances.len()
    }

    /// Listens to the outbound change records.
    pub fn subscribe(
        &self,
        listener: impl Fn(&ChangeRecord) + Send + Sync + 'static,
    ) -> Unsubscribe<ChangeRecord> {
        self.inner.channel.subscribe(listener)
    }

    /// Applies `command` through the store's normal merge path, so the revert
    /// is itself relayed as a change labelled `revert`.
    ///
    /// # Errors
    ///
    /// [`SingletnError::UnknownInstance`] if nothing is tracked under the
    /// command's id, or the store tracked there was dropped or destroyed.
    pub fn dispatch(&self, command: Command) -> Result<bool> {
        let store = {
            let mut instances = self.inner.instances.lock().unwrap_or_else(|p| p.into_inner());
            prune(&mut instances);
            let store = instances.get(&command.id).and_then(Tracked::live);
            store
        };

        let Some(store) = store else {
            return Err(SingletnError::UnknownInstance(command.id));
        };

        tracing::debug!(store = %store.name(), id = %command.id, "reverting store");
        Ok(store.set_state_as("revert", command.revert_to_state))
    }

    /// Parses a JSON command (`{"id": "...", "revertToState": {...}}`) and
    /// dispatches it.
    pub fn dispatch_json(&self, command: &str) -> Result<bool> {
        let command: Command = serde_json::from_str(command)?;
        self.dispatch(command)
    }
}

impl Default for Inspector {
    fn default() -> Self {
        Self::new(false)
    }
}

impl std::fmt::Debug for Inspector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inspector")
            .field("enabled", &self.inner.enabled)
            .field("tracked", &self.tracked_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value;

    fn recording(inspector: &Inspector) -> (Arc<Mutex<Vec<ChangeRecord>>>, Unsubscribe<ChangeRecord>) {
        let records = Arc::new(Mutex::new(Vec::new()));
        let sink = records.clone();
        let handle = inspector.subscribe(move |r| sink.lock().unwrap().push(r.clone()));
        (records, handle)
    }

    #[test]
    fn test_disabled_inspector_tracks_nothing() {
        let inspector = Inspector::new(false);
        let store = Store::new("Quiet", value!({ "n": 0 }));

        assert_eq!(inspector.track(&store), None);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn test_records_carry_label_and_states() {
        let inspector = Inspector::new(true);
        let store = Store::new("Profile", value!({ "name": "" }));
        let id = inspector.track(&store).unwrap();
        let (records, _handle) = recording(&inspector);

        store.set_state_as("rename", value!({ "name": "Nic" }));

        let records = records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, id);
        assert_eq!(records[0].singletn_name, "Profile");
        assert_eq!(records[0].method_name, "rename");
        assert_eq!(records[0].prev_state, value!({ "name": "" }));
        assert_eq!(records[0].next_state, value!({ "name": "Nic" }));
    }

    #[test]
    fn test_silent_updates_are_not_relayed() {
        let inspector = Inspector::new(true);
        let store = Store::new("Silent", value!({ "n": 0 }));
        inspector.track(&store);
        let (records, _handle) = recording(&inspector);

        store.set_state_silently(value!({ "n": 1 }));

        assert!(records.lock().unwrap().is_empty());
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = ChangeRecord {
            id: "1".into(),
            singletn_name: "S".into(),
            method_name: "m".into(),
            prev_state: value!({ "a": 0 }),
            next_state: value!({ "a": 1 }),
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": "1",
                "singletnName": "S",
                "methodName": "m",
                "prevState": { "a": 0 },
                "nextState": { "a": 1 }
            })
        );
    }

    #[test]
    fn test_dispatch_json_merges_revert_state() -> Result<()> {
        let inspector = Inspector::new(true);
        let store = Store::new("Revert", value!({ "a": 1, "b": 2 }));
        let id = inspector.track(&store).unwrap();
        let (records, _handle) = recording(&inspector);

        let command = format!(r#"{{ "id": "{id}", "revertToState": {{ "a": 0 }} }}"#);
        assert!(inspector.dispatch_json(&command)?);

        assert_eq!(*store.get_state(), value!({ "a": 0, "b": 2 }));
        assert_eq!(records.lock().unwrap()[0].method_name, "revert");
        Ok(())
    }

    #[test]
    fn test_dispatch_unknown_id() {
        let inspector = Inspector::new(true);
        let result = inspector.dispatch(Command {
            id: "missing".into(),
            revert_to_state: value!({}),
        });
        assert!(matches!(result, Err(SingletnError::UnknownInstance(id)) if id == "missing"));
    }

    #[test]
    fn test_dispatch_json_rejects_malformed_command() {
        let inspector = Inspector::new(true);
        let result = inspector.dispatch_json("{ not json");
        assert!(matches!(result, Err(SingletnError::Conversion(_))));
    }

    #[test]
    fn test_untrack_stops_relay() {
        let inspector = Inspector::new(true);
        let store = Store::new("Untracked", value!({ "n": 0 }));
        let id = inspector.track(&store).unwrap();
        let (records, _handle) = recording(&inspector);

        assert!(inspector.untrack(&id));
        assert!(!inspector.untrack(&id));
        store.set_state(value!({ "n": 1 }));

        assert!(records.lock().unwrap().is_empty());
        assert_eq!(inspector.tracked_count(), 0);
    }

    #[test]
    fn test_dropped_store_is_forgotten() {
        let inspector = Inspector::new(true);
        let kept = Store::new("Kept", value!({ "n": 0 }));
        inspector.track(&kept);
        let id = {
            let dropped = Store::new("Dropped", value!({ "n": 0 }));
            inspector.track(&dropped).unwrap()
        };

        assert_eq!(inspector.tracked_count(), 1);
        let result = inspector.dispatch(Command {
            id,
            revert_to_state: value!({ "n": 1 }),
        });
        assert!(matches!(result, Err(SingletnError::UnknownInstance(_))));
    }

    #[test]
    fn test_destroyed_store_rejects_revert() {
        struct Widget {
            store: Store,
        }

        impl crate::Container for Widget {
            fn store(&self) -> &Store {
                &self.store
            }
        }

        let inspector = Inspector::new(true);
        let widget = Widget {
            store: Store::new("Destroyed", value!({ "n": 0 })),
        };
        let id = inspector.track(&widget.store).unwrap();

        crate::teardown(&widget);
        let result = inspector.dispatch(Command {
            id,
            revert_to_state: value!({ "n": 1 }),
        });

        assert!(matches!(result, Err(SingletnError::UnknownInstance(_))));
        assert_eq!(*widget.store.get_state(), value!({ "n": 0 }));
        assert_eq!(inspector.tracked_count(), 0);
    }
}
