//! Persistent adapters: hydration on construction, write-through on commit.
//!
//! Both adapters are constructors on [`Store`](crate::Store) that attach a
//! [`Backend`] to an otherwise ordinary store:
//!
//! - [`Store::local`](crate::Store::local) over a synchronous [`KvDriver`](crate::KvDriver)
//! - [`Store::durable`](crate::Store::durable) over an asynchronous [`AsyncKvDriver`](crate::AsyncKvDriver)
//!
//! The store name is the storage namespace. Two stores sharing a name share
//! (and overwrite) each other's persisted fields, last write wins.

mod durable;
mod local;

use futures::future::BoxFuture;

use crate::Value;

/// Write-through hook attached to a store.
pub(crate) trait Backend: Send + Sync {
    /// Called for every committed, non-hydration update with the applied
    /// patch and the resulting state. Runs under the store's state lock, in
    /// commit order, and must not call back into the store.
    fn write(&self, patch: &Value, next: &Value);

    /// Releases the backing store. Runs once, after the container's own
    /// `destroy` hook.
    fn cleanup(&self);

    fn flush(&self) -> BoxFuture<'static, ()> {
        Box::pin(futures::future::ready(()))
    }
}

/// The top-level fields a patch writes. Only record patches persist field by
/// field; a wholesale non-record replacement has no fields to store.
fn persisted_fields(patch: &Value) -> Vec<(&str, &Value)> {
    match patch.as_record() {
        Some(fields) => fields.iter().map(|(k, v)| (k.as_str(), v)).collect(),
        None => {
            tracing::debug!("non-record state is kept in memory only");
            Vec::new()
        }
    }
}
