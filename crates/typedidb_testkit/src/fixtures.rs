//! Test fixtures and database helpers.
//!
//! Provides an in-memory engine wired to a factory, a sample schema that
//! covers inline, nested, composite and generated keys, and helpers that
//! drive the engine until a future resolves.

use std::future::Future;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use typedidb_core::{
    Config, CoreResult, Database, DatabaseFactory, IndexSpec, KeyPathSpec, Schema, StoreSpec,
};
use typedidb_storage::InMemoryEngine;

/// Store keyed by the nested path `key1.key2`.
pub const NESTED_STORE: &str = "store1";
/// Store keyed by the composite path `["key1.key2", "key3"]`.
pub const COMPOSITE_STORE: &str = "store2";
/// Store with generated keys written into `id`.
pub const GENERATED_STORE: &str = "generated";
/// Store with out-of-line keys.
pub const OUT_OF_LINE_STORE: &str = "loose";

/// The record shape used across integration tests:
/// `{ key1: { key2: "hello" }, key3: 5 }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRecord {
    /// Nested part of the key.
    pub key1: Inner,
    /// Second composite key member.
    pub key3: i64,
}

/// Nested object of a [`SampleRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inner {
    /// The nested key.
    pub key2: String,
}

impl SampleRecord {
    /// Creates a record with the given nested key and number.
    pub fn new(key2: impl Into<String>, key3: i64) -> Self {
        Self {
            key1: Inner { key2: key2.into() },
            key3,
        }
    }

    /// The canonical `{key1:{key2:"hello"}, key3:5}` record.
    #[must_use]
    pub fn hello() -> Self {
        Self::new("hello", 5)
    }
}

/// A record for stores with generated keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Generated key; absent until the engine assigns one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Note text, indexed uniquely.
    pub title: String,
    /// Tags, indexed per element.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Note {
    /// A note without a key.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            tags: Vec::new(),
        }
    }

    /// Adds tags.
    #[must_use]
    pub fn tagged(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|tag| (*tag).to_string()).collect();
        self
    }
}

fn path(path: &str) -> KeyPathSpec {
    KeyPathSpec::parse(path).expect("fixture key path")
}

/// Schema with one store per key style.
pub fn sample_schema() -> Schema {
    Schema::new()
        .store(
            StoreSpec::new(NESTED_STORE)
                .key_path(path("key1.key2"))
                .index(IndexSpec::new("by_number", path("key3"))),
        )
        .store(
            StoreSpec::new(COMPOSITE_STORE)
                .key_path(KeyPathSpec::composite(["key1.key2", "key3"]).expect("fixture key path")),
        )
        .store(
            StoreSpec::new(GENERATED_STORE)
                .key_path(path("id"))
                .auto_increment(true)
                .index(IndexSpec::new("by_title", path("title")).unique(true))
                .index(IndexSpec::new("by_tag", path("tags")).multi_entry(true)),
        )
        .store(StoreSpec::new(OUT_OF_LINE_STORE))
}

/// A database name no other test uses.
pub fn unique_db_name(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}

/// An in-memory engine and a factory over it.
pub struct TestEnv {
    /// The engine; drive it with [`TestEnv::run`].
    pub engine: InMemoryEngine,
    /// Factory bound to the environment's schema.
    pub factory: DatabaseFactory,
}

impl TestEnv {
    /// Environment with the [`sample_schema`].
    pub fn new() -> Self {
        Self::with_schema(sample_schema())
    }

    /// Environment with a custom schema.
    pub fn with_schema(schema: Schema) -> Self {
        Self::with_config(schema, Config::default())
    }

    /// Environment with a custom schema and configuration.
    pub fn with_config(schema: Schema, config: Config) -> Self {
        let engine = InMemoryEngine::new().with_event_log();
        let factory = DatabaseFactory::new(Rc::new(engine.clone()), schema)
            .expect("fixture schema is valid")
            .with_config(config);
        Self { engine, factory }
    }

    /// A second factory over the same engine with another schema.
    pub fn factory_for(&self, schema: Schema) -> DatabaseFactory {
        DatabaseFactory::new(Rc::new(self.engine.clone()), schema)
            .expect("schema is valid")
            .with_config(self.factory.config().clone())
    }

    /// Drives the engine until `future` resolves.
    pub fn run<F: Future>(&self, future: F) -> F::Output {
        self.engine.block_on(future).expect("engine stalled")
    }

    /// Opens a database, panicking on failure.
    pub fn open(&self, name: &str, version: Option<u64>) -> Database {
        self.try_open(name, version).expect("open failed")
    }

    /// Opens a database.
    pub fn try_open(&self, name: &str, version: Option<u64>) -> CoreResult<Database> {
        self.run(self.factory.open(name, version))
    }

    /// Runs every queued engine task.
    pub fn settle(&self) {
        self.engine.run_until_idle();
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a test against a freshly opened database with the sample schema.
pub fn with_test_db<F, R>(f: F) -> R
where
    F: FnOnce(&TestEnv, &Database) -> R,
{
    let env = TestEnv::new();
    let db = env.open(&unique_db_name("test"), Some(1));
    f(&env, &db)
}
