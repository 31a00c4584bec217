use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{AsyncKvDriver, KvDriver};
use crate::error::StorageError;
use crate::Value;

/// In-process [`KvDriver`].
#[derive(Debug, Default)]
pub struct MemoryKv {
    items: Mutex<BTreeMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvDriver for MemoryKv {
    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let items = self.items.lock().unwrap_or_else(|p| p.into_inner());
        Ok(items.keys().cloned().collect())
    }

    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let items = self.items.lock().unwrap_or_else(|p| p.into_inner());
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.items
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.items
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(key);
        Ok(())
    }
}

/// In-process [`AsyncKvDriver`].
#[derive(Debug, Default)]
pub struct MemoryDb {
    namespaces: Mutex<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.namespaces
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(namespace)
    }
}

#[async_trait]
impl AsyncKvDriver for MemoryDb {
    async fn keys(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
        let namespaces = self.namespaces.lock().unwrap_or_else(|p| p.into_inner());
        Ok(namespaces
            .get(namespace)
            .map(|items| items.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_item(&self, namespace: &str, key: &str) -> Result<Option<Value>, StorageError> {
        let namespaces = self.namespaces.lock().unwrap_or_else(|p| p.into_inner());
        Ok(namespaces
            .get(namespace)
            .and_then(|items| items.get(key))
            .cloned())
    }

    async fn set_item(&self, namespace: &str, key: &str, value: Value) -> Result<(), StorageError> {
        self.namespaces
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(namespace.to_owned())
            .or_default()
            .insert(key.to_owned(), value);
        Ok(())
    }

    async fn drop_namespace(&self, namespace: &str) -> Result<(), StorageError> {
        self.namespaces
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(namespace);
        Ok(())
    }
}
