//! # Singletn
//!
//! Lazily-instantiated singleton state containers with synchronous pub/sub
//! change notification and optional persistence.
//!
//! A container is any type owning one [`Store`]. The [`Registry`] hands out at
//! most one live instance per container type, constructing it on first use.
//! Stores merge partial updates into their state and notify subscribers with
//! the previous and next snapshots.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use singletn::{value, Container, Create, Registry, Store};
//!
//! struct Counter {
//!     store: Store,
//! }
//!
//! impl Counter {
//!     fn increment(&self) {
//!         self.store.set_state_with(|s| {
//!             let count = s.get("count")?.as_f64()?;
//!             Some(value!({ "count": count + 1.0 }))
//!         });
//!     }
//! }
//!
//! impl Container for Counter {
//!     fn store(&self) -> &Store {
//!         &self.store
//!     }
//! }
//!
//! impl Create for Counter {
//!     fn create(_: ()) -> Self {
//!         Counter {
//!             store: Store::new("Counter", value!({ "count": 0 })),
//!         }
//!     }
//! }
//!
//! let registry = Registry::new();
//! let counter: Arc<Counter> = registry.find().unwrap();
//!
//! let sub = counter.store().subscribe(|change| {
//!     println!("{} -> {}", change.prev_state, change.next_state);
//! });
//!
//! counter.increment();
//! assert_eq!(*counter.store().get_state(), value!({ "count": 1 }));
//!
//! sub.unsubscribe();
//! registry.clear();
//! ```
//!
//! ## Features
//!
//! - **Shallow merge**: updates patch top-level fields, untouched fields survive
//! - **Synchronous notification**: listeners run before `set_state` returns
//! - **Persistence**: [`Store::local`] for synchronous key-value stores,
//!   [`Store::durable`] for asynchronous namespaced ones, with an awaitable
//!   [`Store::flush`]
//! - **Change detection**: [`Policy`] filters what an observer hears about
//! - **Inspection**: [`Inspector`] relays changes and accepts revert commands
//! - **Tracing support**: optional callback system for monitoring registry operations
//!
//! ## Main Types
//!
//! - [`Store`] - The state, its update operations and its subscribers
//! - [`Container`] / [`Create`] - What a registry-managed type implements
//! - [`Registry`] - Per-type singleton lookup, deletion and clearing
//! - [`Value`] - The dynamic state value, built with [`value!`]
//! - [`observe`] - Subscribe through a change-detection policy
//! - [`Config`] - Devtools switch and storage location

#[macro_use]
mod macros;

mod config;
mod container;
mod emitter;
mod equality;
mod error;
mod inspect;
mod persist;
mod policy;
mod registry;
mod registry_event;
mod storage;
mod store;
mod value;

pub use config::{Config, ENV_DEVTOOLS, ENV_STORAGE_DIR, STORAGE_FILE};
pub use container::{teardown, Container, Create};
pub use emitter::{Emitter, Listener, Unsubscribe};
pub use equality::deep_equals;
pub use error::{Result, SingletnError, StorageError};
pub use inspect::{ChangeRecord, Command, Inspector};
pub use policy::{observe, ObserveOptions, OnUpdate, Policy, Predicate};
pub use registry::{Lookup, Registry, TraceCallback};
pub use registry_event::RegistryEvent;
pub use storage::{AsyncKvDriver, FileKv, KvDriver, MemoryDb, MemoryKv};
pub use store::{Change, Origin, Store, Subscription, Updater, WeakStore};
pub use value::{Record, Value};

#[doc(hidden)]
pub use serde_json as __serde_json;
