//! Benchmark utilities.

use std::rc::Rc;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use typedidb_core::{Database, DatabaseFactory, IndexSpec, KeyPathSpec, Schema, StoreSpec};
use typedidb_storage::InMemoryEngine;

/// Store used by the request benchmarks.
pub const BENCH_STORE: &str = "bench";

/// Record written by the benchmarks, keyed by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Inline key.
    pub id: i64,
    /// Indexed name.
    pub name: String,
    /// Filler text.
    pub body: String,
}

/// Generate random alphanumeric text of the specified length.
pub fn random_text(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generate payloads with ids `0..count` and bodies of `body_size` bytes.
pub fn generate_payloads(count: usize, body_size: usize) -> Vec<Payload> {
    (0..count)
        .map(|i| Payload {
            id: i as i64,
            name: format!("name-{i}"),
            body: random_text(body_size),
        })
        .collect()
}

/// A schema of `stores` stores, each keyed by `id` with a `by_name` index.
///
/// The first store is [`BENCH_STORE`].
pub fn bench_schema(stores: usize) -> Schema {
    (0..stores.max(1)).fold(Schema::new(), |schema, i| {
        let name = if i == 0 {
            BENCH_STORE.to_string()
        } else {
            format!("{BENCH_STORE}_{i}")
        };
        schema.store(
            StoreSpec::new(name)
                .key_path(path("id"))
                .index(IndexSpec::new("by_name", path("name"))),
        )
    })
}

fn path(p: &str) -> KeyPathSpec {
    KeyPathSpec::parse(p).expect("valid key path")
}

/// A factory over a fresh engine.
pub fn factory(schema: Schema) -> (InMemoryEngine, DatabaseFactory) {
    let engine = InMemoryEngine::new();
    let factory =
        DatabaseFactory::new(Rc::new(engine.clone()), schema).expect("valid bench schema");
    (engine, factory)
}

/// Opens `name` at `version`, driving the engine until it resolves.
pub fn open(engine: &InMemoryEngine, factory: &DatabaseFactory, name: &str, version: u64) -> Database {
    engine
        .block_on(factory.open(name, Some(version)))
        .expect("engine stalled")
        .expect("open failed")
}
