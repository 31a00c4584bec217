//! A persisted counter shared through the registry.
//!
//! Run twice with `SINGLETN_STORAGE_DIR` set to see the count survive:
//!
//! ```text
//! SINGLETN_STORAGE_DIR=/tmp/singletn SINGLETN_DEVTOOLS=1 cargo run --example counter
//! ```

use std::sync::Arc;

use singletn::{
    value, Config, Container, Create, Inspector, KvDriver, ObserveOptions, Policy, Registry, Store,
    Updater, Value,
};

struct Counter {
    store: Store,
}

impl Counter {
    fn increment(&self) {
        let step = Updater::with(|s| {
            let count = s.get("count")?.as_f64()?;
            Some(value!({ "count": count + 1.0 }))
        });
        self.store.set_state_as("increment", step);
    }

    fn rename(&self, label: &str) {
        self.store.set_state_as("rename", value!({ "label": label }));
    }

    fn count(&self) -> f64 {
        self.store
            .get_state()
            .get("count")
            .and_then(|v| v.as_f64())
            .unwrap_or_default()
    }
}

impl Container for Counter {
    fn store(&self) -> &Store {
        &self.store
    }

    fn destroy(&self) {
        println!("counter destroyed at {}", self.count());
    }
}

impl Create<Option<Arc<dyn KvDriver>>> for Counter {
    fn create(kv: Option<Arc<dyn KvDriver>>) -> Self {
        Counter {
            store: Store::local("Counter", value!({ "count": 0, "label": "clicks" }), kv),
        }
    }
}

fn main() -> singletn::Result<()> {
    let config = Config::from_env();
    let registry = Registry::new();
    let inspector = Inspector::from_config(&config);

    registry.set_trace_callback(|event| println!("[registry] {event}"));
    let _records = inspector.subscribe(|record| {
        println!(
            "[devtools] {} {}: {} -> {}",
            record.singletn_name, record.method_name, record.prev_state, record.next_state
        );
    });

    let counter: Arc<Counter> = registry.find_with(config.kv_driver())?;
    inspector.track(counter.store());
    println!("starting at {}", counter.count());

    let options = ObserveOptions::new()
        .policy(Policy::watch_key("label"))
        .on_update(|next| println!("label is now {}", next.get("label").unwrap_or(&Value::Null)));
    let label_watch = registry.observe(&counter, options, || {});

    for _ in 0..3 {
        counter.increment();
    }
    counter.rename("taps");

    // Another part of the program gets the same instance.
    let same: Arc<Counter> = registry.find_with(None)?;
    println!("shared count: {}", same.count());

    // Leaves the persisted fields in place; `registry.clear()` would remove
    // them along with the instance.
    label_watch.unsubscribe();
    Ok(())
}
