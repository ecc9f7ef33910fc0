//! Declared schema: the object stores and indexes a database should have.
//!
//! A [`Schema`] is plain data. It is checked once when a factory is built
//! and then compared against the physical schema during every upgrade by
//! [`reconcile`](crate::reconcile).
//!
//! Schemas can be built in code or read from JSON:
//!
//! ```json
//! { "stores": [
//!     { "name": "people", "keyPath": "id", "autoIncrement": true,
//!       "indexes": [ { "name": "by_name", "keyPath": ["last", "first"] } ] } ] }
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use typedidb_storage::{KeyPathSpec, StoreParameters};

use crate::error::{CoreError, CoreResult};

/// The declared object stores of a database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Stores, in the order they are reconciled.
    pub stores: Vec<StoreSpec>,
}

impl Schema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a store declaration.
    #[must_use]
    pub fn store(mut self, store: StoreSpec) -> Self {
        self.stores.push(store);
        self
    }

    /// Looks up a store declaration by name.
    #[must_use]
    pub fn find_store(&self, name: &str) -> Option<&StoreSpec> {
        self.stores.iter().find(|store| store.name == name)
    }

    /// Declared store names, in declaration order.
    #[must_use]
    pub fn store_names(&self) -> Vec<String> {
        self.stores.iter().map(|store| store.name.clone()).collect()
    }

    /// Checks that names are present and unique and that composite key
    /// paths do not repeat a member.
    ///
    /// Combinations the engine itself refuses, such as auto-increment over a
    /// composite key path, are left to surface during reconciliation.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSchema`] describing the first problem.
    pub fn validate(&self) -> CoreResult<()> {
        let mut stores = HashSet::new();
        for store in &self.stores {
            if store.name.is_empty() {
                return Err(CoreError::invalid_schema("object store with an empty name"));
            }
            if !stores.insert(store.name.as_str()) {
                return Err(CoreError::invalid_schema(format!(
                    "object store '{}' is declared twice",
                    store.name
                )));
            }
            if let Some(path) = &store.key_path {
                check_composite(path, &store.name)?;
            }

            let mut indexes = HashSet::new();
            for index in &store.indexes {
                if index.name.is_empty() {
                    return Err(CoreError::invalid_schema(format!(
                        "index with an empty name on '{}'",
                        store.name
                    )));
                }
                if !indexes.insert(index.name.as_str()) {
                    return Err(CoreError::invalid_schema(format!(
                        "index '{}' is declared twice on '{}'",
                        index.name, store.name
                    )));
                }
                check_composite(&index.key_path, &format!("{}.{}", store.name, index.name))?;
            }
        }
        Ok(())
    }
}

fn check_composite(path: &KeyPathSpec, owner: &str) -> CoreResult<()> {
    let mut seen = HashSet::new();
    for member in path.paths() {
        if !seen.insert(member) {
            return Err(CoreError::invalid_schema(format!(
                "key path of '{owner}' repeats '{member}'"
            )));
        }
    }
    Ok(())
}

/// A declared object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSpec {
    /// Store name.
    pub name: String,
    /// Where records keep their key; `None` for out-of-line keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<KeyPathSpec>,
    /// Whether the engine generates keys.
    #[serde(default)]
    pub auto_increment: bool,
    /// Declared indexes.
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
}

impl StoreSpec {
    /// Declares a store with out-of-line keys and no indexes.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: None,
            auto_increment: false,
            indexes: Vec::new(),
        }
    }

    /// Sets the key path.
    #[must_use]
    pub fn key_path(mut self, path: KeyPathSpec) -> Self {
        self.key_path = Some(path);
        self
    }

    /// Sets whether keys are generated.
    #[must_use]
    pub fn auto_increment(mut self, value: bool) -> Self {
        self.auto_increment = value;
        self
    }

    /// Adds an index declaration.
    #[must_use]
    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    /// Looks up an index declaration by name.
    #[must_use]
    pub fn find_index(&self, name: &str) -> Option<&IndexSpec> {
        self.indexes.iter().find(|index| index.name == name)
    }

    /// Engine parameters for creating this store.
    #[must_use]
    pub fn parameters(&self) -> StoreParameters {
        StoreParameters {
            key_path: self.key_path.clone(),
            auto_increment: self.auto_increment,
        }
    }
}

/// A declared index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSpec {
    /// Index name.
    pub name: String,
    /// Path of the indexed value.
    pub key_path: KeyPathSpec,
    /// Whether two records may share an index key.
    #[serde(default)]
    pub unique: bool,
    /// Whether an array value is indexed per element.
    #[serde(default)]
    pub multi_entry: bool,
}

impl IndexSpec {
    /// Declares a non-unique, single-entry index.
    pub fn new(name: impl Into<String>, key_path: KeyPathSpec) -> Self {
        Self {
            name: name.into(),
            key_path,
            unique: false,
            multi_entry: false,
        }
    }

    /// Sets uniqueness.
    #[must_use]
    pub fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    /// Sets multi-entry.
    #[must_use]
    pub fn multi_entry(mut self, value: bool) -> Self {
        self.multi_entry = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(p: &str) -> KeyPathSpec {
        KeyPathSpec::parse(p).unwrap()
    }

    #[test]
    fn builder_and_lookup() {
        let schema = Schema::new()
            .store(
                StoreSpec::new("people")
                    .key_path(path("id"))
                    .auto_increment(true)
                    .index(IndexSpec::new("by_email", path("email")).unique(true)),
            )
            .store(StoreSpec::new("blobs"));

        assert!(schema.validate().is_ok());
        assert_eq!(schema.store_names(), vec!["people", "blobs"]);
        let people = schema.find_store("people").unwrap();
        assert!(people.find_index("by_email").unwrap().unique);
        assert!(people.parameters().auto_increment);
        assert!(schema.find_store("missing").is_none());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let schema = Schema::new()
            .store(StoreSpec::new("a"))
            .store(StoreSpec::new("a"));
        assert!(matches!(
            schema.validate(),
            Err(CoreError::InvalidSchema { .. })
        ));

        let schema = Schema::new().store(
            StoreSpec::new("a")
                .index(IndexSpec::new("i", path("x")))
                .index(IndexSpec::new("i", path("y"))),
        );
        assert!(schema.validate().is_err());
    }

    #[test]
    fn repeated_composite_member_is_rejected() {
        let schema = Schema::new()
            .store(StoreSpec::new("a").key_path(KeyPathSpec::composite(["x", "y", "x"]).unwrap()));
        assert!(schema.validate().is_err());
    }

    #[test]
    fn empty_composite_key_path_is_rejected_in_json() {
        let json = r#"{ "stores": [ { "name": "people", "keyPath": [] } ] }"#;
        let err = serde_json::from_str::<Schema>(json).unwrap_err();
        assert!(err.to_string().contains("no members"), "{err}");

        let json = r#"{ "stores": [ { "name": "people",
            "indexes": [ { "name": "by_nothing", "keyPath": [] } ] } ] }"#;
        assert!(serde_json::from_str::<Schema>(json).is_err());
    }

    #[test]
    fn json_form() {
        let json = r#"{ "stores": [
            { "name": "people", "keyPath": "id", "autoIncrement": true,
              "indexes": [ { "name": "by_name", "keyPath": ["last", "first"] } ] },
            { "name": "blobs" } ] }"#;
        let schema: Schema = serde_json::from_str(json).unwrap();

        let people = &schema.stores[0];
        assert_eq!(people.key_path, Some(path("id")));
        assert!(people.auto_increment);
        let index = &people.indexes[0];
        assert!(index.key_path.is_composite());
        assert!(!index.unique && !index.multi_entry);
        assert_eq!(schema.stores[1].key_path, None);

        let back: Schema = serde_json::from_str(&serde_json::to_string(&schema).unwrap()).unwrap();
        assert_eq!(back, schema);
    }
}
