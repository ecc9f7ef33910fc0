//! Fuzz testing harnesses for typedidb.
//!
//! This module provides fuzz targets that can be used with cargo-fuzz
//! or other fuzzing frameworks.

use typedidb_codec::{from_cbor, to_canonical_cbor};
use typedidb_core::{Database, KeyPathSpec, Schema, TransactionMode};
use typedidb_storage::InMemoryEngine;

use crate::fixtures::{SampleRecord, TestEnv, NESTED_STORE};

/// Fuzz target for CBOR decoding.
///
/// Arbitrary bytes either decode to a value or return an error.
pub fn fuzz_cbor_decode(data: &[u8]) {
    let _ = from_cbor(data);
}

/// Fuzz target for CBOR roundtrip.
///
/// Whatever decodes re-encodes to bytes that decode to the same value.
pub fn fuzz_cbor_roundtrip(data: &[u8]) {
    if let Ok(value) = from_cbor(data) {
        let encoded = to_canonical_cbor(&value);
        let decoded = from_cbor(&encoded).expect("canonical bytes decode");
        assert_eq!(value, decoded, "Roundtrip mismatch");
    }
}

/// Fuzz target for key path parsing and resolution.
pub fn fuzz_key_path(data: &[u8]) {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(path) = KeyPathSpec::parse(text) else {
        return;
    };
    if let Ok(record) = from_cbor(data) {
        let _ = path.resolve(&record);
        let _ = path.multi_entry_keys(&record);
    }
}

/// Fuzz target for engine snapshots.
///
/// A snapshot that loads must snapshot back to the same bytes.
pub fn fuzz_snapshot(data: &[u8]) {
    if let Ok(engine) = InMemoryEngine::from_snapshot(data) {
        let again = engine.snapshot();
        let reloaded = InMemoryEngine::from_snapshot(&again).expect("own snapshot loads");
        assert_eq!(reloaded.snapshot(), again);
    }
}

/// Fuzz target for schema documents.
pub fn fuzz_schema_json(data: &[u8]) {
    if let Ok(schema) = serde_json::from_slice::<Schema>(data) {
        let _ = schema.validate();
    }
}

/// Fuzz target for request sequences against an open database.
pub fn fuzz_database_operations(data: &[u8]) {
    let env = TestEnv::new();
    let Ok(db) = env.try_open("fuzz", Some(1)) else {
        return;
    };
    let ops = FuzzOp::parse_sequence(data);
    FuzzOp::execute_sequence(&ops, &env, &db);
}

/// Fuzz operation types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FuzzOp {
    /// Put a record.
    Put {
        /// Key selector.
        key: u8,
        /// Payload number.
        number: u8,
    },
    /// Get a record.
    Get {
        /// Key selector.
        key: u8,
    },
    /// Delete a record.
    Delete {
        /// Key selector.
        key: u8,
    },
    /// Count records.
    Count,
    /// Chain `length` puts in one scope.
    Chain {
        /// Number of chained puts.
        length: u8,
    },
    /// Put, then abort the scope.
    Abort {
        /// Key selector.
        key: u8,
    },
}

fn key_name(key: u8) -> String {
    format!("k{}", key % 32)
}

impl FuzzOp {
    /// Parse operations from fuzzer input.
    pub fn parse_sequence(data: &[u8]) -> Vec<FuzzOp> {
        let mut ops = Vec::new();
        let mut bytes = data.iter().copied();

        while let Some(op_type) = bytes.next() {
            let op = match op_type % 6 {
                0 => match (bytes.next(), bytes.next()) {
                    (Some(key), Some(number)) => FuzzOp::Put { key, number },
                    _ => break,
                },
                1 => match bytes.next() {
                    Some(key) => FuzzOp::Get { key },
                    None => break,
                },
                2 => match bytes.next() {
                    Some(key) => FuzzOp::Delete { key },
                    None => break,
                },
                3 => FuzzOp::Count,
                4 => match bytes.next() {
                    Some(length) => FuzzOp::Chain { length },
                    None => break,
                },
                _ => match bytes.next() {
                    Some(key) => FuzzOp::Abort { key },
                    None => break,
                },
            };
            ops.push(op);
        }

        ops
    }

    /// Execute operations, each in its own scope, ignoring errors.
    pub fn execute_sequence(ops: &[FuzzOp], env: &TestEnv, db: &Database) {
        for op in ops {
            let Ok(scope) = db.transaction(&[NESTED_STORE], TransactionMode::ReadWrite) else {
                return;
            };
            let Ok(store) = scope.store::<SampleRecord>(NESTED_STORE) else {
                return;
            };
            let _ = match op {
                FuzzOp::Put { key, number } => store
                    .put(&SampleRecord::new(key_name(*key), i64::from(*number)))
                    .map(|_| ()),
                FuzzOp::Get { key } => store.get(key_name(*key)).map(|_| ()),
                FuzzOp::Delete { key } => store.delete(key_name(*key)).map(|_| ()),
                FuzzOp::Count => store.count().map(|_| ()),
                FuzzOp::Chain { length } => store
                    .put_all((0..*length).map(|i| SampleRecord::new(key_name(i), i64::from(i))))
                    .map(|_| ()),
                FuzzOp::Abort { key } => store
                    .put(&SampleRecord::new(key_name(*key), 0))
                    .and_then(|_| scope.abort()),
            };
            let _ = env.run(scope.completion());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::hash::{DefaultHasher, Hash, Hasher};

    /// Generate pseudo-random data for fuzzing based on a seed.
    fn generate_random_data(seed: u64, len: usize) -> Vec<u8> {
        let mut hasher = DefaultHasher::new();
        let mut result = Vec::with_capacity(len);
        let mut state = seed;

        for _ in 0..len {
            state.hash(&mut hasher);
            state = hasher.finish();
            hasher = DefaultHasher::new();
            result.push((state & 0xFF) as u8);
        }

        result
    }

    #[test]
    fn test_fuzz_cbor_decode_empty() {
        fuzz_cbor_decode(&[]);
    }

    #[test]
    fn test_fuzz_cbor_decode_random() {
        for seed in 0..200 {
            fuzz_cbor_decode(&generate_random_data(seed, 64));
        }
    }

    #[test]
    fn test_fuzz_cbor_roundtrip_valid() {
        let map = to_canonical_cbor(&typedidb_codec::Value::object([
            ("b", typedidb_codec::Value::from(2)),
            ("a", typedidb_codec::Value::from("x")),
        ]));
        fuzz_cbor_roundtrip(&map);
    }

    #[test]
    fn test_fuzz_cbor_roundtrip_random() {
        for seed in 0..200 {
            fuzz_cbor_roundtrip(&generate_random_data(seed, 32));
        }
    }

    #[test]
    fn test_fuzz_key_path_inputs() {
        for input in ["", ".", "a..b", "a.b", "key1.key2", "\u{0}", "1abc"] {
            fuzz_key_path(input.as_bytes());
        }
    }

    #[test]
    fn test_fuzz_snapshot_random() {
        fuzz_snapshot(&[]);
        for seed in 0..100 {
            fuzz_snapshot(&generate_random_data(seed, 48));
        }
    }

    #[test]
    fn test_fuzz_snapshot_valid() {
        let env = TestEnv::new();
        drop(env.open("snap", Some(1)));
        env.settle();
        fuzz_snapshot(&env.engine.snapshot());
    }

    #[test]
    fn test_fuzz_schema_json() {
        fuzz_schema_json(b"{}");
        fuzz_schema_json(br#"{"stores":[{"name":""}]}"#);
        fuzz_schema_json(br#"{"stores":[{"name":"a","keyPath":"x","indexes":[]}]}"#);
        fuzz_schema_json(b"not json");
    }

    #[test]
    fn test_parse_sequence() {
        let ops = FuzzOp::parse_sequence(&[0, 1, 2, 3, 4, 10, 1]);
        assert_eq!(
            ops,
            vec![
                FuzzOp::Put { key: 1, number: 2 },
                FuzzOp::Count,
                FuzzOp::Chain { length: 10 },
            ]
        );
    }

    #[test]
    fn test_fuzz_database_operations_random() {
        for seed in 0..20 {
            fuzz_database_operations(&generate_random_data(seed, 64));
        }
    }
}
