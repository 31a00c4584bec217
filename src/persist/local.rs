use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use super::{persisted_fields, Backend};
use crate::error::StorageError;
use crate::storage::KvDriver;
use crate::value::Record;
use crate::{Store, Value};

/// Writes each field to `<namespace>-<field>` as JSON text.
///
/// Keys are only ever derived from field names this store knows about, never
/// matched by prefix: `Profile-Extra-age` belongs to a store named
/// `Profile-Extra`, not to the `Extra-age` field of `Profile`.
struct LocalBackend {
    namespace: String,
    driver: Arc<dyn KvDriver>,
    /// Default fields plus every field written since construction.
    fields: Mutex<BTreeSet<String>>,
}

impl LocalBackend {
    fn new(namespace: String, driver: Arc<dyn KvDriver>, defaults: &Value) -> Self {
        Self {
            namespace,
            driver,
            fields: Mutex::new(defaults.fields().map(str::to_owned).collect()),
        }
    }

    fn key(&self, field: &str) -> String {
        format!("{}-{field}", self.namespace)
    }

    /// The persisted values of the default fields. Entries that are empty or
    /// do not parse are skipped.
    fn load(&self, defaults: &Value) -> Result<Record, StorageError> {
        let mut found = Record::new();

        for field in defaults.fields() {
            let key = self.key(field);
            let Some(raw) = self.driver.get_item(&key)? else {
                continue;
            };
            if raw.is_empty() || raw == "undefined" {
                continue;
            }
            match serde_json::from_str::<Value>(&raw) {
                Ok(value) => {
                    found.insert(field.to_owned(), value);
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "skipping unreadable persisted field");
                }
            }
        }

        Ok(found)
    }
}

impl Backend for LocalBackend {
    fn write(&self, patch: &Value, _next: &Value) {
        let written = persisted_fields(patch);
        self.fields
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend(written.iter().map(|(field, _)| (*field).to_owned()));

        for (field, value) in written {
            let result = serde_json::to_string(value)
                .map_err(StorageError::from)
                .and_then(|raw| self.driver.set_item(&self.key(field), &raw));

            if let Err(e) = result {
                tracing::warn!(namespace = %self.namespace, field, error = %e, "write-through failed");
            }
        }
    }

    fn cleanup(&self) {
        let fields = std::mem::take(&mut *self.fields.lock().unwrap_or_else(|p| p.into_inner()));

        for field in &fields {
            let key = self.key(field);
            if let Err(e) = self.driver.remove_item(&key) {
                tracing::warn!(key = %key, error = %e, "failed to remove persisted field");
            }
        }

        tracing::debug!(namespace = %self.namespace, fields = fields.len(), "removed persisted fields");
    }
}

impl Store {
    /// A store persisted field by field in a synchronous key-value store.
    ///
    /// Every field of `defaults` found under `<name>-<field>` is restored;
    /// fields never written keep their default. Fields outside `defaults` are
    /// written through but not restored. Every committed update writes the
    /// patched fields back as JSON, and teardown removes the key of every
    /// default or written field.
    ///
    /// Without a driver, or if the driver cannot be read, the store starts
    /// from `defaults` and stays in memory.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use singletn::{value, KvDriver, MemoryKv, Store};
    ///
    /// let kv = Arc::new(MemoryKv::new());
    ///
    /// let store = Store::local("Profile", value!({ "age": 0 }), Some(kv.clone()));
    /// store.set_state(value!({ "age": 25 }));
    /// assert_eq!(kv.get_item("Profile-age").unwrap().as_deref(), Some("25"));
    ///
    /// let restored = Store::local("Profile", value!({ "age": 0 }), Some(kv));
    /// assert_eq!(*restored.get_state(), value!({ "age": 25 }));
    /// ```
    pub fn local(
        name: impl Into<String>,
        defaults: impl Into<Value>,
        driver: Option<Arc<dyn KvDriver>>,
    ) -> Store {
        let name = name.into();
        let defaults = defaults.into();

        let Some(driver) = driver else {
            tracing::debug!(store = %name, "no key-value store available, keeping state in memory");
            return Store::new(name, defaults);
        };

        let backend = LocalBackend::new(name.clone(), driver, &defaults);

        let initial = match backend.load(&defaults) {
            Ok(found) if found.is_empty() => defaults,
            Ok(found) => defaults.merged(&Value::Record(found)),
            Err(e) => {
                tracing::warn!(store = %name, error = %e, "hydration failed, starting from defaults");
                defaults
            }
        };

        let store = Store::new(name, initial);
        store.attach_backend(Arc::new(backend));
        store
    }
}
