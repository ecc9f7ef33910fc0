//! Canonical CBOR encoder.

use crate::value::Value;

/// CBOR tag for epoch-based date/time (RFC 8949 §3.4.2).
pub(crate) const TAG_EPOCH_DATE: u64 = 1;

/// Encode a value to canonical CBOR bytes.
///
/// Output is deterministic (RFC 8949 §4.2.1): shortest-form heads, definite
/// lengths only, and map entries sorted by their encoded keys (length-first,
/// then bytewise). Every [`Value`] is encodable, so this cannot fail.
pub fn to_canonical_cbor(value: &Value) -> Vec<u8> {
    let mut encoder = CanonicalEncoder::new();
    encoder.encode(value);
    encoder.into_bytes()
}

/// A canonical CBOR encoder writing into an owned buffer.
#[derive(Debug, Default)]
pub struct CanonicalEncoder {
    buffer: Vec<u8>,
}

impl CanonicalEncoder {
    /// Create a new encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new encoder with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Append the encoding of `value`.
    pub fn encode(&mut self, value: &Value) {
        match value {
            Value::Null => self.buffer.push(0xf6),
            Value::Bool(false) => self.buffer.push(0xf4),
            Value::Bool(true) => self.buffer.push(0xf5),
            Value::Integer(n) => self.write_integer(*n),
            Value::Date(ms) => {
                self.write_head(6, TAG_EPOCH_DATE);
                self.write_integer(*ms);
            }
            Value::Bytes(b) => {
                self.write_head(2, b.len() as u64);
                self.buffer.extend_from_slice(b);
            }
            Value::Text(s) => {
                self.write_head(3, s.len() as u64);
                self.buffer.extend_from_slice(s.as_bytes());
            }
            Value::Array(items) => {
                self.write_head(4, items.len() as u64);
                for item in items {
                    self.encode(item);
                }
            }
            Value::Map(pairs) => self.write_map(pairs),
        }
    }

    /// Consume this encoder and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get a reference to the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    #[allow(clippy::cast_sign_loss)]
    fn write_integer(&mut self, n: i64) {
        if n >= 0 {
            self.write_head(0, n as u64);
        } else {
            // -1 - n never overflows for negative n
            self.write_head(1, (-1 - n) as u64);
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write_head(&mut self, major: u8, argument: u64) {
        let major = major << 5;
        match argument {
            0..=23 => self.buffer.push(major | argument as u8),
            24..=0xff => self.buffer.extend_from_slice(&[major | 24, argument as u8]),
            0x100..=0xffff => {
                self.buffer.push(major | 25);
                self.buffer
                    .extend_from_slice(&(argument as u16).to_be_bytes());
            }
            0x1_0000..=0xffff_ffff => {
                self.buffer.push(major | 26);
                self.buffer
                    .extend_from_slice(&(argument as u32).to_be_bytes());
            }
            _ => {
                self.buffer.push(major | 27);
                self.buffer.extend_from_slice(&argument.to_be_bytes());
            }
        }
    }

    fn write_map(&mut self, pairs: &[(Value, Value)]) {
        let mut entries: Vec<(Vec<u8>, &Value)> = pairs
            .iter()
            .map(|(key, value)| (to_canonical_cbor(key), value))
            .collect();
        entries.sort_by(|a, b| a.0.len().cmp(&b.0.len()).then_with(|| a.0.cmp(&b.0)));

        self.write_head(5, entries.len() as u64);
        for (key, value) in entries {
            self.buffer.extend_from_slice(&key);
            self.encode(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_values() {
        assert_eq!(to_canonical_cbor(&Value::Null), vec![0xf6]);
        assert_eq!(to_canonical_cbor(&Value::Bool(false)), vec![0xf4]);
        assert_eq!(to_canonical_cbor(&Value::Bool(true)), vec![0xf5]);
    }

    #[test]
    fn integer_heads_use_shortest_form() {
        assert_eq!(to_canonical_cbor(&Value::Integer(23)), vec![0x17]);
        assert_eq!(to_canonical_cbor(&Value::Integer(24)), vec![0x18, 24]);
        assert_eq!(
            to_canonical_cbor(&Value::Integer(256)),
            vec![0x19, 0x01, 0x00]
        );
        assert_eq!(
            to_canonical_cbor(&Value::Integer(65536)),
            vec![0x1a, 0x00, 0x01, 0x00, 0x00]
        );
        assert_eq!(to_canonical_cbor(&Value::Integer(-1)), vec![0x20]);
        assert_eq!(to_canonical_cbor(&Value::Integer(-100)), vec![0x38, 99]);
    }

    #[test]
    fn date_is_tagged() {
        // tag 1, then unsigned 1000
        assert_eq!(
            to_canonical_cbor(&Value::Date(1000)),
            vec![0xc1, 0x19, 0x03, 0xe8]
        );
    }

    #[test]
    fn strings_and_arrays() {
        assert_eq!(
            to_canonical_cbor(&Value::from("hello")),
            vec![0x65, b'h', b'e', b'l', b'l', b'o']
        );
        assert_eq!(to_canonical_cbor(&Value::Bytes(vec![1, 2])), vec![0x42, 1, 2]);
        assert_eq!(
            to_canonical_cbor(&Value::Array(vec![Value::Integer(1), Value::Integer(2)])),
            vec![0x82, 0x01, 0x02]
        );
    }

    #[test]
    fn map_entries_sorted_regardless_of_input_order() {
        let unsorted = Value::Map(vec![
            (Value::from("bb"), Value::Integer(2)),
            (Value::from("a"), Value::Integer(1)),
        ]);
        let sorted = Value::object([("a", Value::Integer(1)), ("bb", Value::Integer(2))]);

        let bytes = to_canonical_cbor(&unsorted);
        assert_eq!(bytes, vec![0xa2, 0x61, b'a', 0x01, 0x62, b'b', b'b', 0x02]);
        assert_eq!(bytes, to_canonical_cbor(&sorted));
    }
}
