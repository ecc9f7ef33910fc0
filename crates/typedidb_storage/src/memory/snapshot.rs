//! Snapshot format: every committed database as one canonical CBOR value.
//!
//! ```text
//! { "format": 1,
//!   "databases": [ { "name", "version",
//!     "stores": [ { "name", "keyPath", "autoIncrement", "nextKey",
//!       "indexes": [ { "name", "keyPath", "unique", "multiEntry" } ],
//!       "records": [ [key, value], ... ] } ] } ] }
//! ```
//!
//! A key path is `null`, a string, or an array of strings.

use std::collections::BTreeMap;

use typedidb_codec::{from_cbor, to_canonical_cbor, Key, Value};

use crate::engine::{IndexParameters, StoreParameters};
use crate::error::{StorageError, StorageResult};
use crate::key_path::KeyPathSpec;

use super::state::DatabaseState;

/// Snapshot format version written by this engine.
pub const SNAPSHOT_FORMAT_VERSION: i64 = 1;

fn key_path_value(path: Option<&KeyPathSpec>) -> Value {
    match path {
        None => Value::Null,
        Some(KeyPathSpec::Single(path)) => Value::Text(path.to_string()),
        Some(KeyPathSpec::Composite(paths)) => {
            Value::Array(paths.iter().map(|p| Value::Text(p.to_string())).collect())
        }
    }
}

pub(super) fn encode(databases: &BTreeMap<String, DatabaseState>) -> Vec<u8> {
    let databases = databases
        .iter()
        .map(|(name, db)| {
            let stores = db
                .stores
                .iter()
                .map(|(store_name, store)| {
                    let indexes = store
                        .indexes
                        .iter()
                        .map(|(index_name, index)| {
                            Value::object([
                                ("name", Value::from(index_name.as_str())),
                                ("keyPath", key_path_value(Some(&index.key_path))),
                                ("unique", Value::Bool(index.unique)),
                                ("multiEntry", Value::Bool(index.multi_entry)),
                            ])
                        })
                        .collect();
                    let records = store
                        .iter_records()
                        .filter_map(Result::ok)
                        .map(|(key, value)| Value::Array(vec![key.to_value(), value]))
                        .collect();
                    Value::object([
                        ("name", Value::from(store_name.as_str())),
                        ("keyPath", key_path_value(store.key_path.as_ref())),
                        ("autoIncrement", Value::Bool(store.auto_increment)),
                        ("nextKey", Value::Integer(store.next_key)),
                        ("indexes", Value::Array(indexes)),
                        ("records", Value::Array(records)),
                    ])
                })
                .collect();
            Value::object([
                ("name", Value::from(name.as_str())),
                ("version", Value::Integer(i64::try_from(db.version).unwrap_or(i64::MAX))),
                ("stores", Value::Array(stores)),
            ])
        })
        .collect();

    to_canonical_cbor(&Value::object([
        ("format", Value::Integer(SNAPSHOT_FORMAT_VERSION)),
        ("databases", Value::Array(databases)),
    ]))
}

fn malformed(detail: impl std::fmt::Display) -> StorageError {
    StorageError::data(format!("malformed snapshot: {detail}"))
}

fn field<'a>(value: &'a Value, name: &str) -> StorageResult<&'a Value> {
    value
        .field(name)
        .ok_or_else(|| malformed(format!("missing field '{name}'")))
}

fn text<'a>(value: &'a Value, name: &str) -> StorageResult<&'a str> {
    field(value, name)?
        .as_text()
        .ok_or_else(|| malformed(format!("'{name}' is not text")))
}

fn boolean(value: &Value, name: &str) -> StorageResult<bool> {
    field(value, name)?
        .as_bool()
        .ok_or_else(|| malformed(format!("'{name}' is not a boolean")))
}

fn integer(value: &Value, name: &str) -> StorageResult<i64> {
    field(value, name)?
        .as_integer()
        .ok_or_else(|| malformed(format!("'{name}' is not an integer")))
}

fn array<'a>(value: &'a Value, name: &str) -> StorageResult<&'a [Value]> {
    field(value, name)?
        .as_array()
        .ok_or_else(|| malformed(format!("'{name}' is not an array")))
}

fn key_path(value: &Value) -> StorageResult<Option<KeyPathSpec>> {
    let parsed = match value {
        Value::Null => return Ok(None),
        Value::Text(path) => KeyPathSpec::parse(path),
        Value::Array(items) => {
            let paths = items
                .iter()
                .map(|item| item.as_text().ok_or_else(|| malformed("key path member is not text")))
                .collect::<StorageResult<Vec<_>>>()?;
            KeyPathSpec::composite(paths)
        }
        other => return Err(malformed(format!("key path is {}", other.type_name()))),
    };
    parsed.map(Some).map_err(malformed)
}

pub(super) fn decode(bytes: &[u8]) -> StorageResult<BTreeMap<String, DatabaseState>> {
    let root = from_cbor(bytes).map_err(malformed)?;
    let format = integer(&root, "format")?;
    if format != SNAPSHOT_FORMAT_VERSION {
        return Err(malformed(format!("unsupported format {format}")));
    }

    let mut databases = BTreeMap::new();
    for entry in array(&root, "databases")? {
        let name = text(entry, "name")?;
        let version = u64::try_from(integer(entry, "version")?).map_err(malformed)?;
        let mut db = DatabaseState::new(version);

        for store in array(entry, "stores")? {
            let store_name = text(store, "name")?;
            let parameters = StoreParameters {
                key_path: key_path(field(store, "keyPath")?)?,
                auto_increment: boolean(store, "autoIncrement")?,
            };
            db.create_store(store_name, &parameters)?;

            for index in array(store, "indexes")? {
                let index_path = key_path(field(index, "keyPath")?)?
                    .ok_or_else(|| malformed("index without a key path"))?;
                db.create_index(
                    store_name,
                    text(index, "name")?,
                    &index_path,
                    IndexParameters {
                        unique: boolean(index, "unique")?,
                        multi_entry: boolean(index, "multiEntry")?,
                    },
                )?;
            }

            let next_key = integer(store, "nextKey")?;
            let data = db.store_mut(store_name)?;
            for record in array(store, "records")? {
                let [key, value] = record.as_array().unwrap_or_default() else {
                    return Err(malformed("record is not a [key, value] pair"));
                };
                let key = Key::from_value(key).map_err(malformed)?;
                data.records.insert(key, to_canonical_cbor(value));
            }
            data.next_key = next_key;
        }
        databases.insert(name.to_string(), db);
    }
    Ok(databases)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_restores_schema_and_records() {
        let mut db = DatabaseState::new(3);
        db.create_store(
            "people",
            &StoreParameters {
                key_path: Some(KeyPathSpec::parse("id").unwrap()),
                auto_increment: true,
            },
        )
        .unwrap();
        db.create_index(
            "people",
            "by_name",
            &KeyPathSpec::composite(["last", "first"]).unwrap(),
            IndexParameters::default(),
        )
        .unwrap();
        let store = db.store_mut("people").unwrap();
        store
            .write(Value::object([("first", Value::from("Ada"))]), None, false)
            .unwrap();

        let mut databases = BTreeMap::new();
        databases.insert("app".to_string(), db);
        let restored = decode(&encode(&databases)).unwrap();

        let app = &restored["app"];
        assert_eq!(app.version, 3);
        let people = app.store("people").unwrap();
        assert!(people.auto_increment);
        assert_eq!(people.next_key, 2);
        assert_eq!(people.records.len(), 1);
        assert!(people.indexes["by_name"].key_path.is_composite());
        let record = people.read(&Key::Number(1)).unwrap().unwrap();
        assert_eq!(record.field("id"), Some(&Value::Integer(1)));
    }

    #[test]
    fn garbage_is_rejected() {
        assert_eq!(decode(&[0xff]).unwrap_err().name(), "DataError");

        let wrong_format = to_canonical_cbor(&Value::object([
            ("format", Value::Integer(99)),
            ("databases", Value::Array(Vec::new())),
        ]));
        assert!(decode(&wrong_format).is_err());
    }
}
