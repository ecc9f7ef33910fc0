//! Database contents: stores, indexes and records.

use std::collections::BTreeMap;

use typedidb_codec::{from_cbor, to_canonical_cbor, Key, Value};

use crate::engine::{IndexParameters, StoreParameters};
use crate::error::{StorageError, StorageResult};
use crate::key_path::KeyPathSpec;

/// Largest key a generator hands out (2^53).
pub(crate) const MAX_GENERATED_KEY: i64 = 9_007_199_254_740_992;

/// One database's committed or working state.
#[derive(Debug, Clone, Default)]
pub(crate) struct DatabaseState {
    pub version: u64,
    pub stores: BTreeMap<String, StoreData>,
    next_id: u64,
}

impl DatabaseState {
    pub fn new(version: u64) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn store_names(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }

    pub fn store(&self, name: &str) -> StorageResult<&StoreData> {
        self.stores
            .get(name)
            .ok_or_else(|| StorageError::not_found("object store", name))
    }

    pub fn store_mut(&mut self, name: &str) -> StorageResult<&mut StoreData> {
        self.stores
            .get_mut(name)
            .ok_or_else(|| StorageError::not_found("object store", name))
    }

    pub fn create_store(&mut self, name: &str, parameters: &StoreParameters) -> StorageResult<u64> {
        if self.stores.contains_key(name) {
            return Err(StorageError::constraint(format!(
                "object store '{name}' already exists"
            )));
        }
        if parameters.auto_increment
            && parameters.key_path.as_ref().is_some_and(KeyPathSpec::is_composite)
        {
            return Err(StorageError::invalid_access(
                "auto-increment stores cannot use a composite key path",
            ));
        }
        let id = self.allocate_id();
        self.stores.insert(
            name.to_string(),
            StoreData {
                id,
                key_path: parameters.key_path.clone(),
                auto_increment: parameters.auto_increment,
                next_key: 1,
                records: BTreeMap::new(),
                indexes: BTreeMap::new(),
            },
        );
        Ok(id)
    }

    pub fn delete_store(&mut self, name: &str) -> StorageResult<()> {
        self.stores
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found("object store", name))
    }

    pub fn create_index(
        &mut self,
        store: &str,
        name: &str,
        key_path: &KeyPathSpec,
        parameters: IndexParameters,
    ) -> StorageResult<u64> {
        if parameters.multi_entry && key_path.is_composite() {
            return Err(StorageError::invalid_access(
                "multi-entry indexes cannot use a composite key path",
            ));
        }
        let id = self.allocate_id();
        let data = self.store_mut(store)?;
        if data.indexes.contains_key(name) {
            return Err(StorageError::constraint(format!(
                "index '{name}' already exists on '{store}'"
            )));
        }
        let meta = IndexMeta {
            id,
            key_path: key_path.clone(),
            unique: parameters.unique,
            multi_entry: parameters.multi_entry,
        };
        if meta.unique && data.has_duplicates(&meta)? {
            return Err(StorageError::constraint(format!(
                "existing records violate unique index '{name}'"
            )));
        }
        data.indexes.insert(name.to_string(), meta);
        Ok(id)
    }
}

/// Index definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IndexMeta {
    pub id: u64,
    pub key_path: KeyPathSpec,
    pub unique: bool,
    pub multi_entry: bool,
}

impl IndexMeta {
    /// Keys this index holds for `record`.
    pub fn keys_of(&self, record: &Value) -> Vec<Key> {
        if self.multi_entry {
            self.key_path.multi_entry_keys(record)
        } else {
            self.key_path.resolve(record).ok().into_iter().collect()
        }
    }
}

/// An object store's definition and records.
#[derive(Debug, Clone)]
pub(crate) struct StoreData {
    pub id: u64,
    pub key_path: Option<KeyPathSpec>,
    pub auto_increment: bool,
    pub next_key: i64,
    pub records: BTreeMap<Key, Vec<u8>>,
    pub indexes: BTreeMap<String, IndexMeta>,
}

impl StoreData {
    /// Check a write before it is queued.
    ///
    /// Returns the record's key when it is already known, or `None` when the
    /// generator will supply it.
    pub fn check_key(&self, value: &Value, key: Option<Key>) -> StorageResult<Option<Key>> {
        match (&self.key_path, key) {
            (Some(_), Some(_)) => Err(StorageError::data(
                "store uses in-line keys and a key was supplied",
            )),
            (None, Some(key)) => Ok(Some(key)),
            (None, None) if self.auto_increment => Ok(None),
            (None, None) => Err(StorageError::data(
                "store uses out-of-line keys and no key was supplied",
            )),
            (Some(path), None) => match path.resolve(value) {
                Ok(key) => Ok(Some(key)),
                Err(err) if !self.auto_increment => Err(StorageError::data(err.to_string())),
                Err(err) => {
                    let injectable = path.paths().iter().all(|single| {
                        single.lookup(value).is_none()
                            && single.inject(&mut value.clone(), &Key::Number(0)).is_ok()
                    });
                    if injectable {
                        Ok(None)
                    } else {
                        Err(StorageError::data(err.to_string()))
                    }
                }
            },
        }
    }

    fn generate_key(&mut self) -> StorageResult<Key> {
        if self.next_key > MAX_GENERATED_KEY {
            return Err(StorageError::constraint("key generator is exhausted"));
        }
        let key = Key::Number(self.next_key);
        self.next_key += 1;
        Ok(key)
    }

    /// Write a record. `overwrite` distinguishes put from add.
    pub fn write(&mut self, value: Value, key: Option<Key>, overwrite: bool) -> StorageResult<Key> {
        let mut value = value;
        let inline = match (key.is_none(), &self.key_path) {
            (true, Some(path)) => match path.resolve(&value) {
                Ok(key) => Some(key),
                Err(err) if !self.auto_increment => {
                    return Err(StorageError::data(err.to_string()))
                }
                Err(_) => None,
            },
            _ => None,
        };
        let key = match key.or(inline) {
            Some(key) => key,
            None if !self.auto_increment => {
                return Err(StorageError::data(
                    "store uses out-of-line keys and no key was supplied",
                ))
            }
            None => {
                let key = self.generate_key()?;
                if let Some(path) = &self.key_path {
                    for single in path.paths() {
                        single
                            .inject(&mut value, &key)
                            .map_err(|err| StorageError::data(err.to_string()))?;
                    }
                }
                key
            }
        };

        if !overwrite && self.records.contains_key(&key) {
            return Err(StorageError::constraint(format!(
                "key {key} already exists in the store"
            )));
        }
        for (name, meta) in &self.indexes {
            if !meta.unique {
                continue;
            }
            for index_key in meta.keys_of(&value) {
                if let Some(owner) = self.lookup(meta, &index_key)? {
                    if owner.0 != key {
                        return Err(StorageError::constraint(format!(
                            "unique index '{name}' already holds {index_key}"
                        )));
                    }
                }
            }
        }

        if self.auto_increment {
            if let Key::Number(n) = key {
                if n >= self.next_key {
                    self.next_key = n.saturating_add(1);
                }
            }
        }
        self.records.insert(key.clone(), to_canonical_cbor(&value));
        Ok(key)
    }

    pub fn read(&self, key: &Key) -> StorageResult<Option<Value>> {
        self.records.get(key).map(|bytes| decode_record(bytes)).transpose()
    }

    pub fn remove(&mut self, key: &Key) {
        self.records.remove(key);
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Decoded records in primary key order.
    pub fn iter_records(&self) -> impl Iterator<Item = StorageResult<(&Key, Value)>> {
        self.records
            .iter()
            .map(|(key, bytes)| decode_record(bytes).map(|value| (key, value)))
    }

    /// The first record, by primary key, indexed under `key`.
    pub fn lookup(&self, meta: &IndexMeta, key: &Key) -> StorageResult<Option<(Key, Value)>> {
        for entry in self.iter_records() {
            let (primary, value) = entry?;
            if meta.keys_of(&value).contains(key) {
                return Ok(Some((primary.clone(), value)));
            }
        }
        Ok(None)
    }

    /// Number of records indexed under `key`.
    pub fn count_indexed(&self, meta: &IndexMeta, key: &Key) -> StorageResult<u64> {
        let mut count = 0;
        for entry in self.iter_records() {
            let (_, value) = entry?;
            if meta.keys_of(&value).contains(key) {
                count += 1;
            }
        }
        Ok(count)
    }

    fn has_duplicates(&self, meta: &IndexMeta) -> StorageResult<bool> {
        let mut seen = std::collections::BTreeSet::new();
        for entry in self.iter_records() {
            let (_, value) = entry?;
            for key in meta.keys_of(&value) {
                if !seen.insert(key) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

fn decode_record(bytes: &[u8]) -> StorageResult<Value> {
    from_cbor(bytes).map_err(|err| StorageError::unknown(format!("stored record is corrupt: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(path: &str) -> KeyPathSpec {
        KeyPathSpec::parse(path).unwrap()
    }

    fn store_with(key_path: Option<&str>, auto_increment: bool) -> (DatabaseState, String) {
        let mut db = DatabaseState::new(1);
        db.create_store(
            "s",
            &StoreParameters {
                key_path: key_path.map(spec),
                auto_increment,
            },
        )
        .unwrap();
        (db, "s".to_string())
    }

    #[test]
    fn inline_keys_come_from_the_record() {
        let (db, name) = store_with(Some("id"), false);
        let store = db.store(&name).unwrap();
        let record = Value::object([("id", Value::from("a"))]);
        assert_eq!(store.check_key(&record, None).unwrap(), Some(Key::from("a")));

        let err = store.check_key(&record, Some(Key::from(1))).unwrap_err();
        assert_eq!(err.name(), "DataError");

        let missing = Value::object([("other", Value::from(1))]);
        assert_eq!(store.check_key(&missing, None).unwrap_err().name(), "DataError");
    }

    #[test]
    fn generated_keys_are_injected() {
        let (mut db, name) = store_with(Some("meta.id"), true);
        let store = db.store_mut(&name).unwrap();
        let record = Value::object([("v", Value::from(1))]);
        assert_eq!(store.check_key(&record, None).unwrap(), None);

        let key = store.write(record, None, false).unwrap();
        assert_eq!(key, Key::Number(1));
        let stored = store.read(&key).unwrap().unwrap();
        assert_eq!(
            stored.field("meta").and_then(|m| m.field("id")),
            Some(&Value::Integer(1))
        );
    }

    #[test]
    fn explicit_numeric_keys_advance_the_generator() {
        let (mut db, name) = store_with(None, true);
        let store = db.store_mut(&name).unwrap();
        store.write(Value::Null, Some(Key::Number(10)), false).unwrap();
        assert_eq!(store.write(Value::Null, None, false).unwrap(), Key::Number(11));
    }

    #[test]
    fn add_rejects_existing_keys_put_replaces() {
        let (mut db, name) = store_with(None, false);
        let store = db.store_mut(&name).unwrap();
        store.write(Value::from(1), Some(Key::from("k")), false).unwrap();
        let err = store.write(Value::from(2), Some(Key::from("k")), false).unwrap_err();
        assert_eq!(err.name(), "ConstraintError");

        store.write(Value::from(3), Some(Key::from("k")), true).unwrap();
        assert_eq!(store.read(&Key::from("k")).unwrap(), Some(Value::from(3)));
    }

    #[test]
    fn unique_index_blocks_duplicates() {
        let (mut db, name) = store_with(Some("id"), false);
        db.create_index(
            &name,
            "by_email",
            &spec("email"),
            IndexParameters {
                unique: true,
                multi_entry: false,
            },
        )
        .unwrap();
        let store = db.store_mut(&name).unwrap();
        let first = Value::object([("id", Value::from(1)), ("email", Value::from("x@y"))]);
        let second = Value::object([("id", Value::from(2)), ("email", Value::from("x@y"))]);
        store.write(first.clone(), None, false).unwrap();
        assert!(store.write(second, None, false).is_err());
        // Rewriting the owner is fine.
        store.write(first, None, true).unwrap();
        let owner = store.read(&Key::from(1)).unwrap().unwrap();
        assert_eq!(owner.field("email"), Some(&Value::from("x@y")));
        assert_eq!(store.read(&Key::from(2)).unwrap(), None);
    }

    #[test]
    fn keyless_writes_need_a_key_source() {
        let (mut db, name) = store_with(Some("id"), false);
        let store = db.store_mut(&name).unwrap();
        let err = store
            .write(Value::object([("v", Value::from(1))]), None, false)
            .unwrap_err();
        assert_eq!(err.name(), "DataError");

        let (mut db, name) = store_with(None, false);
        let store = db.store_mut(&name).unwrap();
        let err = store.write(Value::from(1), None, false).unwrap_err();
        assert_eq!(err.name(), "DataError");
    }

    #[test]
    fn creating_unique_index_over_duplicates_fails() {
        let (mut db, name) = store_with(None, false);
        let store = db.store_mut(&name).unwrap();
        store.write(Value::object([("t", Value::from("a"))]), Some(Key::from(1)), false).unwrap();
        store.write(Value::object([("t", Value::from("a"))]), Some(Key::from(2)), false).unwrap();

        let err = db
            .create_index(
                &name,
                "by_t",
                &spec("t"),
                IndexParameters {
                    unique: true,
                    multi_entry: false,
                },
            )
            .unwrap_err();
        assert_eq!(err.name(), "ConstraintError");
    }

    #[test]
    fn multi_entry_index_lookup() {
        let (mut db, name) = store_with(Some("id"), false);
        db.create_index(
            &name,
            "by_tag",
            &spec("tags"),
            IndexParameters {
                unique: false,
                multi_entry: true,
            },
        )
        .unwrap();
        let store = db.store_mut(&name).unwrap();
        let tags = |items: &[&str]| Value::Array(items.iter().map(|t| Value::from(*t)).collect());
        store
            .write(Value::object([("id", Value::from(2)), ("tags", tags(&["a", "b"]))]), None, false)
            .unwrap();
        store
            .write(Value::object([("id", Value::from(1)), ("tags", tags(&["b"]))]), None, false)
            .unwrap();

        let meta = store.indexes["by_tag"].clone();
        let (primary, _) = store.lookup(&meta, &Key::from("b")).unwrap().unwrap();
        assert_eq!(primary, Key::from(1));
        assert_eq!(store.count_indexed(&meta, &Key::from("b")).unwrap(), 2);
        assert_eq!(store.count_indexed(&meta, &Key::from("a")).unwrap(), 1);
    }

    #[test]
    fn auto_increment_with_composite_path_is_rejected() {
        let mut db = DatabaseState::new(1);
        let err = db
            .create_store(
                "s",
                &StoreParameters {
                    key_path: Some(KeyPathSpec::composite(["a", "b"]).unwrap()),
                    auto_increment: true,
                },
            )
            .unwrap_err();
        assert_eq!(err.name(), "InvalidAccessError");
    }

    #[test]
    fn generator_exhaustion() {
        let (mut db, name) = store_with(None, true);
        let store = db.store_mut(&name).unwrap();
        store.next_key = MAX_GENERATED_KEY + 1;
        assert_eq!(
            store.write(Value::Null, None, false).unwrap_err().name(),
            "ConstraintError"
        );
    }
}
