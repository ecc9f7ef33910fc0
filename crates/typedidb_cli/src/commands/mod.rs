//! CLI command implementations.

pub mod delete;
pub mod inspect;
pub mod reconcile;

use clap::ValueEnum;

/// How command output is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// Pretty-printed JSON.
    Json,
}

#[cfg(test)]
pub(crate) mod tests {
    use std::path::{Path, PathBuf};
    use std::rc::Rc;

    use serde::{Deserialize, Serialize};
    use typedidb_core::{DatabaseFactory, IndexSpec, KeyPathSpec, Schema, StoreSpec, TransactionMode};
    use typedidb_storage::InMemoryEngine;

    use crate::snapshot;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Person {
        id: i64,
        name: String,
    }

    pub(crate) fn people_schema() -> Schema {
        Schema::new().store(
            StoreSpec::new("people")
                .key_path(KeyPathSpec::parse("id").unwrap())
                .index(IndexSpec::new("by_name", KeyPathSpec::parse("name").unwrap()).unique(true)),
        )
    }

    /// Writes a snapshot holding database `app` at version 1 with two
    /// people.
    pub(crate) fn seeded_snapshot(dir: &Path) -> PathBuf {
        let engine = InMemoryEngine::new();
        let factory = DatabaseFactory::new(Rc::new(engine.clone()), people_schema()).unwrap();
        let db = engine.block_on(factory.open("app", Some(1))).unwrap().unwrap();

        let scope = db.transaction(&["people"], TransactionMode::ReadWrite).unwrap();
        let people = scope.store::<Person>("people").unwrap();
        let written = people
            .add_all(vec![
                Person { id: 1, name: "ada".into() },
                Person { id: 2, name: "grace".into() },
            ])
            .unwrap();
        engine.block_on(scope.after_commit(written)).unwrap().unwrap();
        db.close();

        let path = dir.join("app.snapshot");
        snapshot::save(&engine, &path).unwrap();
        path
    }
}
