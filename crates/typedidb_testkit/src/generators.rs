//! Property-based test generators using proptest.
//!
//! Provides strategies for keys, key paths, records and whole schemas.

use proptest::prelude::*;
use typedidb_codec::{Key, Value};
use typedidb_core::{IndexSpec, KeyPathSpec, Schema, StoreSpec};

/// Strategy for valid key path segments.
pub fn segment_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,7}").expect("Invalid regex")
}

/// Strategy for dotted key paths of one to three segments.
pub fn key_path_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(segment_strategy(), 1..=3)
}

/// Strategy for scalar keys.
pub fn scalar_key_strategy() -> impl Strategy<Value = Key> {
    prop_oneof![
        any::<i64>().prop_map(Key::Number),
        any::<i64>().prop_map(Key::Date),
        "[a-zA-Z0-9 ]{0,12}".prop_map(Key::Text),
        prop::collection::vec(any::<u8>(), 0..8).prop_map(Key::Binary),
    ]
}

/// Strategy for keys, including nested arrays.
pub fn key_strategy() -> impl Strategy<Value = Key> {
    scalar_key_strategy().prop_recursive(2, 8, 4, |inner| {
        prop::collection::vec(inner, 0..4).prop_map(Key::Array)
    })
}

/// Builds a record holding `key` at the dotted `segments`.
pub fn record_with_key(segments: &[String], key: &Key) -> Value {
    segments.iter().rev().fold(key.to_value(), |value, segment| {
        Value::object([(segment.as_str(), value)])
    })
}

/// Strategy for a single or composite key path over short segments.
pub fn key_path_spec_strategy() -> impl Strategy<Value = KeyPathSpec> {
    prop_oneof![
        2 => segment_strategy().prop_map(|s| KeyPathSpec::parse(&s).expect("generated path")),
        1 => prop::collection::btree_set(segment_strategy(), 2..=3).prop_map(|members| {
            KeyPathSpec::composite(members.iter().map(String::as_str)).expect("generated path")
        }),
    ]
}

/// Strategy for a declared index.
pub fn index_spec_strategy() -> impl Strategy<Value = IndexSpec> {
    (segment_strategy(), segment_strategy(), any::<bool>(), any::<bool>()).prop_map(
        |(name, path, unique, multi_entry)| {
            IndexSpec::new(
                format!("idx_{name}"),
                KeyPathSpec::parse(&path).expect("generated path"),
            )
            .unique(unique)
            .multi_entry(multi_entry)
        },
    )
}

/// Strategy for a declared store the engine will accept.
pub fn store_spec_strategy() -> impl Strategy<Value = StoreSpec> {
    (
        segment_strategy(),
        prop::option::of(key_path_spec_strategy()),
        any::<bool>(),
        prop::collection::vec(index_spec_strategy(), 0..3),
    )
        .prop_map(|(name, key_path, auto_increment, indexes)| {
            // Generated keys need a single path or none at all.
            let auto_increment =
                auto_increment && !key_path.as_ref().is_some_and(KeyPathSpec::is_composite);
            let mut spec = StoreSpec::new(format!("s_{name}")).auto_increment(auto_increment);
            spec.key_path = key_path;
            for index in indexes {
                if spec.find_index(&index.name).is_none() {
                    spec = spec.index(index);
                }
            }
            spec
        })
}

/// Strategy for valid schemas of up to four stores.
pub fn schema_strategy() -> impl Strategy<Value = Schema> {
    prop::collection::vec(store_spec_strategy(), 1..4).prop_map(|stores| {
        let mut schema = Schema::new();
        for store in stores {
            if schema.find_store(&store.name).is_none() {
                schema = schema.store(store);
            }
        }
        schema
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_schemas_validate(schema in schema_strategy()) {
            prop_assert!(schema.validate().is_ok());
        }

        #[test]
        fn generated_records_resolve(segments in key_path_strategy(), key in key_strategy()) {
            let path = KeyPathSpec::parse(&segments.join(".")).unwrap();
            let record = record_with_key(&segments, &key);
            prop_assert_eq!(path.resolve(&record).unwrap(), key);
        }
    }
}
