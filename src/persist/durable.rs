use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use futures::future::{join_all, BoxFuture};
use tokio::sync::{mpsc, oneshot};

use super::{persisted_fields, Backend};
use crate::error::StorageError;
use crate::storage::AsyncKvDriver;
use crate::store::WeakStore;
use crate::value::Record;
use crate::{Store, Value};

/// Work for the per-store worker, processed strictly in order.
enum Op {
    Hydrate(Value),
    Write(Vec<(String, Value)>),
    Drop,
    Flush(oneshot::Sender<()>),
}

/// Fields committed through this store since construction. Hydration never
/// overwrites them: their stored values are older than the live ones, and the
/// live ones are already queued for writing.
type Written = Arc<Mutex<BTreeSet<String>>>;

struct DurableBackend {
    namespace: String,
    ops: mpsc::UnboundedSender<Op>,
    written: Written,
}

impl DurableBackend {
    fn send(&self, op: Op) -> bool {
        if self.ops.send(op).is_err() {
            tracing::warn!(namespace = %self.namespace, "durable worker is gone, operation dropped");
            return false;
        }
        true
    }
}

impl Backend for DurableBackend {
    fn write(&self, patch: &Value, _next: &Value) {
        let fields: Vec<_> = persisted_fields(patch)
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v.clone()))
            .collect();

        if fields.is_empty() {
            return;
        }
        self.written
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend(fields.iter().map(|(field, _)| field.clone()));
        self.send(Op::Write(fields));
    }

    fn cleanup(&self) {
        self.send(Op::Drop);
    }

    fn flush(&self) -> BoxFuture<'static, ()> {
        let (done, landed) = oneshot::channel();
        if !self.send(Op::Flush(done)) {
            return Box::pin(futures::future::ready(()));
        }
        Box::pin(async move {
            let _ = landed.await;
        })
    }
}

struct Worker {
    namespace: String,
    driver: Arc<dyn AsyncKvDriver>,
    store: WeakStore,
    written: Written,
}

impl Worker {
    async fn run(self, mut ops: mpsc::UnboundedReceiver<Op>) {
        while let Some(op) = ops.recv().await {
            match op {
                Op::Hydrate(defaults) => {
                    if let Err(e) = self.hydrate(&defaults).await {
                        tracing::warn!(namespace = %self.namespace, error = %e, "hydration failed, keeping defaults");
                    }
                }
                Op::Write(fields) => {
                    for (field, value) in fields {
                        if let Err(e) = self.driver.set_item(&self.namespace, &field, value).await {
                            tracing::warn!(namespace = %self.namespace, field = %field, error = %e, "write-through failed");
                        }
                    }
                }
                Op::Drop => match self.driver.drop_namespace(&self.namespace).await {
                    Ok(()) => tracing::debug!(namespace = %self.namespace, "dropped durable namespace"),
                    Err(e) => tracing::warn!(namespace = %self.namespace, error = %e, "failed to drop namespace"),
                },
                Op::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        tracing::trace!(namespace = %self.namespace, "durable worker stopped");
    }

    /// Seeds defaults missing from the namespace, then merges whatever was
    /// already stored into the live state with a single notification. Fields
    /// updated since construction keep their live value.
    async fn hydrate(&self, defaults: &Value) -> Result<(), StorageError> {
        let keys = self.driver.keys(&self.namespace).await?;

        if let Some(fields) = defaults.as_record() {
            for (field, value) in fields.iter().filter(|(field, _)| !keys.iter().any(|k| k == *field)) {
                self.driver
                    .set_item(&self.namespace, field, value.clone())
                    .await?;
            }
        }

        if keys.is_empty() {
            return Ok(());
        }

        let reads = keys.iter().map(|key| async move {
            (key, self.driver.get_item(&self.namespace, key).await)
        });

        let mut loaded = Record::new();
        for (key, item) in join_all(reads).await {
            match item {
                Ok(Some(value)) => {
                    loaded.insert(key.clone(), value);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(namespace = %self.namespace, key = %key, error = %e, "skipping unreadable field");
                }
            }
        }

        if let Some(store) = self.store.upgrade() {
            let written = Arc::clone(&self.written);
            store.hydrate(move |_| {
                let written = written.lock().unwrap_or_else(|p| p.into_inner());
                loaded.retain(|field, _| !written.contains(field));
                (!loaded.is_empty()).then_some(Value::Record(loaded))
            });
        }
        Ok(())
    }
}

impl Store {
    /// A store persisted in an asynchronous, namespaced key-value store.
    ///
    /// The namespace is the store name and keys are bare field names. A
    /// background task owned by this store:
    ///
    /// 1. seeds every default field the namespace does not have yet,
    /// 2. if the namespace already had entries, reads them all and merges
    ///    them into the live state, emitting one notification,
    /// 3. writes the patched fields of every committed update,
    /// 4. drops the namespace on teardown.
    ///
    /// All of this is queued in order, so [`Store::flush`] resolves once every
    /// earlier operation has landed. Until hydration lands, `get_state`
    /// returns the defaults.
    ///
    /// Must be called inside a tokio runtime. Without a runtime or without a
    /// driver the store stays in memory.
    pub fn durable(
        name: impl Into<String>,
        defaults: impl Into<Value>,
        driver: Option<Arc<dyn AsyncKvDriver>>,
    ) -> Store {
        let store = Store::new(name, defaults);

        let Some(driver) = driver else {
            tracing::debug!(store = %store.name(), "no durable store available, keeping state in memory");
            return store;
        };

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::warn!(store = %store.name(), error = %e, "no async runtime, keeping state in memory");
                return store;
            }
        };

        let (ops, queue) = mpsc::unbounded_channel();
        let written = Written::default();
        let worker = Worker {
            namespace: store.name().to_owned(),
            driver,
            store: store.downgrade(),
            written: Arc::clone(&written),
        };
        runtime.spawn(worker.run(queue));

        let backend = DurableBackend {
            namespace: store.name().to_owned(),
            ops,
            written,
        };
        backend.send(Op::Hydrate((*store.get_state()).clone()));
        store.attach_backend(Arc::new(backend));
        store
    }
}
