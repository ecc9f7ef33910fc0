//! Shared test vectors for typedidb.
//!
//! Bindings to a real engine must agree with these byte for byte: canonical
//! record encodings, key ordering and key path extraction.

use serde::{Deserialize, Serialize};

/// An encoding vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestVector {
    /// Unique identifier for this vector.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Input data (hex-encoded).
    pub input_hex: String,
    /// Expected output data (hex-encoded).
    pub expected_hex: String,
    /// Expected error message (if this should fail).
    pub expected_error: Option<String>,
}

/// Two keys in ascending order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyOrderVector {
    /// Unique identifier for this vector.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// The smaller key, as canonical CBOR (hex-encoded).
    pub lower_hex: String,
    /// The larger key, as canonical CBOR (hex-encoded).
    pub higher_hex: String,
}

/// A key extracted from a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPathVector {
    /// Unique identifier for this vector.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Dotted paths; more than one makes a composite path.
    pub key_path: Vec<String>,
    /// The record, as canonical CBOR (hex-encoded).
    pub record_hex: String,
    /// The extracted key, as canonical CBOR (hex-encoded).
    pub expected_key_hex: Option<String>,
}

/// Encodes bytes as lowercase hexadecimal.
pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Decodes a hexadecimal string to bytes.
pub fn hex_decode(hex: &str) -> Vec<u8> {
    let hex = hex.replace([' ', '\n', '\r'], "");
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).expect("Invalid hex"))
        .collect()
}

fn vector(id: &str, description: &str, input: &str, expected: &str) -> TestVector {
    TestVector {
        id: id.into(),
        description: description.into(),
        input_hex: input.into(),
        expected_hex: expected.into(),
        expected_error: None,
    }
}

fn rejected(id: &str, description: &str, input: &str, error: &str) -> TestVector {
    TestVector {
        id: id.into(),
        description: description.into(),
        input_hex: input.into(),
        expected_hex: String::new(),
        expected_error: Some(error.into()),
    }
}

/// Canonical record encoding vectors.
pub fn cbor_encoding_vectors() -> Vec<TestVector> {
    vec![
        vector("cbor_int_neg1", "integer -1", "20", "20"),
        vector("cbor_date_epoch", "date at the epoch uses tag 1", "c100", "c100"),
        vector("cbor_date_1s", "date one second after the epoch", "c11903e8", "c11903e8"),
        vector(
            "cbor_map_length_first",
            "map {'bb': 1, 'a': 2} sorts the shorter key first",
            "a261610262626201",
            "a261610262626201",
        ),
        vector(
            "cbor_sample_record",
            "record {key1: {key2: 'hello'}, key3: 5}",
            "a2646b657931a1646b6579326568656c6c6f646b65793305",
            "a2646b657931a1646b6579326568656c6c6f646b65793305",
        ),
        rejected(
            "cbor_map_unsorted",
            "map keys out of canonical order",
            "a2616202616101",
            "non-canonical",
        ),
        rejected(
            "cbor_int_long_form",
            "integer 1 in a two-byte head",
            "1801",
            "non-canonical",
        ),
    ]
}

fn ordered(id: &str, description: &str, lower: &str, higher: &str) -> KeyOrderVector {
    KeyOrderVector {
        id: id.into(),
        description: description.into(),
        lower_hex: lower.into(),
        higher_hex: higher.into(),
    }
}

/// Key ordering vectors.
pub fn key_order_vectors() -> Vec<KeyOrderVector> {
    vec![
        ordered("number_negative", "-1 < 0", "20", "00"),
        ordered("number_before_date", "5 < date(0)", "05", "c100"),
        ordered("date_before_text", "date(1000) < ''", "c11903e8", "60"),
        ordered("text_before_binary", "'b' < h''", "6162", "40"),
        ordered("binary_before_array", "h'ff' < []", "41ff", "80"),
        ordered(
            "text_utf16_order",
            "U+10000 < U+FFFF by UTF-16 code units",
            "64f0908080",
            "63efbfbf",
        ),
        ordered("array_prefix", "[1] < [1, 2]", "8101", "820102"),
        ordered("array_elementwise", "['a', 9] < ['b', 0]", "82616109", "82616200"),
    ]
}

fn extracted(id: &str, description: &str, path: &[&str], key: Option<&str>) -> KeyPathVector {
    KeyPathVector {
        id: id.into(),
        description: description.into(),
        key_path: path.iter().map(|p| (*p).to_string()).collect(),
        record_hex: "a2646b657931a1646b6579326568656c6c6f646b65793305".into(),
        expected_key_hex: key.map(Into::into),
    }
}

/// Key path extraction vectors over the sample record.
pub fn key_path_vectors() -> Vec<KeyPathVector> {
    vec![
        extracted("nested", "key1.key2", &["key1.key2"], Some("6568656c6c6f")),
        extracted("top_level", "key3", &["key3"], Some("05")),
        extracted(
            "composite",
            "[key1.key2, key3]",
            &["key1.key2", "key3"],
            Some("826568656c6c6f05"),
        ),
        extracted("missing", "no value at key4", &["key4"], None),
        extracted("not_a_key", "a map is not a key", &["key1"], None),
    ]
}

/// Generate all test vectors as JSON for use by other bindings.
pub fn all_vectors_json() -> String {
    let vectors = AllTestVectors {
        cbor: cbor_encoding_vectors(),
        key_order: key_order_vectors(),
        key_path: key_path_vectors(),
    };

    serde_json::to_string_pretty(&vectors).expect("Failed to serialize vectors")
}

#[derive(Debug, Serialize, Deserialize)]
struct AllTestVectors {
    cbor: Vec<TestVector>,
    key_order: Vec<KeyOrderVector>,
    key_path: Vec<KeyPathVector>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use typedidb_codec::{from_cbor, to_canonical_cbor, Key};
    use typedidb_core::KeyPathSpec;

    fn key(hex: &str) -> Key {
        Key::from_value(&from_cbor(&hex_decode(hex)).unwrap()).unwrap()
    }

    #[test]
    fn test_cbor_vectors() {
        for vector in cbor_encoding_vectors() {
            let decoded = from_cbor(&hex_decode(&vector.input_hex));
            match &vector.expected_error {
                Some(expected) => {
                    let err = decoded.expect_err(&vector.id);
                    assert!(
                        err.to_string().contains(expected.as_str()),
                        "Vector {} failed: {}",
                        vector.id,
                        err
                    );
                }
                None => {
                    let value = decoded.unwrap();
                    assert_eq!(
                        hex_encode(&to_canonical_cbor(&value)),
                        vector.expected_hex,
                        "Vector {} failed: {}",
                        vector.id,
                        vector.description
                    );
                }
            }
        }
    }

    #[test]
    fn test_key_order_vectors() {
        for vector in key_order_vectors() {
            assert!(
                key(&vector.lower_hex) < key(&vector.higher_hex),
                "Vector {} failed: {}",
                vector.id,
                vector.description
            );
        }
    }

    #[test]
    fn test_key_path_vectors() {
        for vector in key_path_vectors() {
            let path = match vector.key_path.as_slice() {
                [single] => KeyPathSpec::parse(single).unwrap(),
                many => KeyPathSpec::composite(many.iter().map(String::as_str)).unwrap(),
            };
            let record = from_cbor(&hex_decode(&vector.record_hex)).unwrap();
            let resolved = path.resolve(&record).ok();
            assert_eq!(
                resolved.map(|k| hex_encode(&to_canonical_cbor(&k.to_value()))),
                vector.expected_key_hex,
                "Vector {} failed: {}",
                vector.id,
                vector.description
            );
        }
    }

    #[test]
    fn test_all_vectors_json() {
        let json = all_vectors_json();
        assert!(json.contains("key_order"));
        assert!(json.contains("text_utf16_order"));
    }
}
