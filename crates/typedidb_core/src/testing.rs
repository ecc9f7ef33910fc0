//! Shared helpers for unit tests.

use std::rc::Rc;

use serde::{Deserialize, Serialize};
use typedidb_storage::{InMemoryEngine, KeyPathSpec};

use crate::{Config, Database, DatabaseFactory, IndexSpec, Schema, StoreSpec};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: i64,
    pub name: String,
}

impl Person {
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    pub data: String,
}

pub fn path(p: &str) -> KeyPathSpec {
    KeyPathSpec::parse(p).unwrap()
}

/// `people` keyed by `id` with a unique `by_name` index, and out-of-line
/// `blobs`.
pub fn schema() -> Schema {
    Schema::new()
        .store(
            StoreSpec::new("people")
                .key_path(path("id"))
                .index(IndexSpec::new("by_name", path("name")).unique(true)),
        )
        .store(StoreSpec::new("blobs"))
}

pub fn factory(engine: &InMemoryEngine, config: Config) -> DatabaseFactory {
    DatabaseFactory::new(Rc::new(engine.clone()), schema())
        .unwrap()
        .with_config(config)
}

pub fn open(engine: &InMemoryEngine, name: &str, version: u64) -> Database {
    let factory = factory(engine, Config::default());
    engine.block_on(factory.open(name, Some(version))).unwrap().unwrap()
}
