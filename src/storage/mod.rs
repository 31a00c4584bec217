//! Backing-store drivers for the persistent adapters.
//!
//! Two flavours mirror the two adapters: [`KvDriver`] is a synchronous
//! string-to-string store with a flat key space, [`AsyncKvDriver`] is an
//! asynchronous store partitioned into named namespaces holding structured
//! values.

mod file;
mod memory;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::Value;

pub use file::FileKv;
pub use memory::{MemoryDb, MemoryKv};

/// A synchronous key-value store with string values.
pub trait KvDriver: Send + Sync {
    fn keys(&self) -> Result<Vec<String>, StorageError>;

    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

/// An asynchronous, namespaced key-value store with structured values.
///
/// A namespace is created implicitly by its first write.
#[async_trait]
pub trait AsyncKvDriver: Send + Sync {
    async fn keys(&self, namespace: &str) -> Result<Vec<String>, StorageError>;

    async fn get_item(&self, namespace: &str, key: &str) -> Result<Option<Value>, StorageError>;

    async fn set_item(&self, namespace: &str, key: &str, value: Value) -> Result<(), StorageError>;

    /// Removes the namespace and everything in it.
    async fn drop_namespace(&self, namespace: &str) -> Result<(), StorageError>;
}
