//! Canonical CBOR decoder.

use crate::encoder::TAG_EPOCH_DATE;
use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// Largest array or map length accepted from untrusted input.
const MAX_CONTAINER_ELEMENTS: u64 = 16 * 1024 * 1024;

/// Largest byte or text string length accepted from untrusted input.
const MAX_BYTES_LENGTH: u64 = 256 * 1024 * 1024;

/// Decode exactly one value from CBOR bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not canonical CBOR, contain constructs
/// a record cannot hold (floats, indefinite lengths, tags other than
/// epoch dates), or continue past the first value.
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Value> {
    let mut decoder = CanonicalDecoder::new(bytes);
    let value = decoder.decode()?;
    if !decoder.is_empty() {
        return Err(CodecError::TrailingBytes {
            remaining: decoder.remaining().len(),
        });
    }
    Ok(value)
}

/// A validating canonical CBOR decoder.
pub struct CanonicalDecoder<'a> {
    data: &'a [u8],
    pos: usize,
}

/// Initial byte split into major type and additional information.
#[derive(Clone, Copy)]
struct Head {
    major: u8,
    info: u8,
}

impl<'a> CanonicalDecoder<'a> {
    /// Create a new decoder for the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Check if all bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Get remaining bytes.
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    /// Decode the next value.
    pub fn decode(&mut self) -> CodecResult<Value> {
        let head = self.read_head()?;
        match head.major {
            0 => {
                let n = self.read_argument(head)?;
                i64::try_from(n)
                    .map(Value::Integer)
                    .map_err(|_| CodecError::IntegerOverflow)
            }
            1 => {
                let n = self.read_argument(head)?;
                i64::try_from(n)
                    .map(|n| Value::Integer(-1 - n))
                    .map_err(|_| CodecError::IntegerOverflow)
            }
            2 => {
                let len = self.read_length(head, MAX_BYTES_LENGTH)?;
                Ok(Value::Bytes(self.take(len)?.to_vec()))
            }
            3 => {
                let len = self.read_length(head, MAX_BYTES_LENGTH)?;
                let text = std::str::from_utf8(self.take(len)?)
                    .map_err(|_| CodecError::InvalidUtf8)?;
                Ok(Value::Text(text.to_string()))
            }
            4 => {
                let len = self.read_length(head, MAX_CONTAINER_ELEMENTS)?;
                let mut items = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    items.push(self.decode()?);
                }
                Ok(Value::Array(items))
            }
            5 => self.decode_map(head),
            6 => self.decode_tagged(head),
            _ => self.decode_simple(head),
        }
    }

    fn decode_map(&mut self, head: Head) -> CodecResult<Value> {
        let len = self.read_length(head, MAX_CONTAINER_ELEMENTS)?;
        let mut pairs = Vec::with_capacity(len.min(1024));
        let mut previous: Option<&'a [u8]> = None;

        for _ in 0..len {
            let start = self.pos;
            let key = self.decode()?;
            let data = self.data;
            let encoded = &data[start..self.pos];

            if let Some(prev) = previous {
                let ascending = prev.len() < encoded.len()
                    || (prev.len() == encoded.len() && prev < encoded);
                if !ascending {
                    return Err(CodecError::invalid_structure(
                        "non-canonical: map keys not in sorted order",
                    ));
                }
            }
            previous = Some(encoded);

            let value = self.decode()?;
            pairs.push((key, value));
        }
        Ok(Value::Map(pairs))
    }

    fn decode_tagged(&mut self, head: Head) -> CodecResult<Value> {
        let tag = self.read_argument(head)?;
        if tag != TAG_EPOCH_DATE {
            return Err(CodecError::unsupported_type(format!("tag {tag}")));
        }
        match self.decode()? {
            Value::Integer(ms) => Ok(Value::Date(ms)),
            other => Err(CodecError::invalid_structure(format!(
                "date tag must wrap an integer, found {}",
                other.type_name()
            ))),
        }
    }

    fn decode_simple(&mut self, head: Head) -> CodecResult<Value> {
        match head.info {
            20 => Ok(Value::Bool(false)),
            21 => Ok(Value::Bool(true)),
            22 | 23 => Ok(Value::Null),
            24 => {
                let simple = self.read_byte()?;
                if simple < 32 {
                    Err(CodecError::invalid_structure(
                        "non-canonical: simple value should use direct encoding",
                    ))
                } else {
                    Err(CodecError::unsupported_type(format!("simple value {simple}")))
                }
            }
            25..=27 => Err(CodecError::FloatForbidden),
            28..=30 => Err(CodecError::invalid_structure("reserved additional info")),
            31 => Err(CodecError::invalid_structure("break without indefinite")),
            other => Err(CodecError::unsupported_type(format!("simple value {other}"))),
        }
    }

    fn read_head(&mut self) -> CodecResult<Head> {
        let byte = self.read_byte()?;
        Ok(Head {
            major: byte >> 5,
            info: byte & 0x1f,
        })
    }

    /// Reads a head argument, rejecting non-shortest forms.
    fn read_argument(&mut self, head: Head) -> CodecResult<u64> {
        let (value, floor) = match head.info {
            0..=23 => return Ok(u64::from(head.info)),
            24 => (u64::from(self.read_byte()?), 24),
            25 => (u64::from(u16::from_be_bytes(self.take_array()?)), 0x100),
            26 => (u64::from(u32::from_be_bytes(self.take_array()?)), 0x1_0000),
            27 => (u64::from_be_bytes(self.take_array()?), 0x1_0000_0000),
            31 => return Err(CodecError::IndefiniteLengthForbidden),
            _ => return Err(CodecError::invalid_structure("reserved additional info")),
        };
        if value < floor {
            return Err(CodecError::invalid_structure(
                "non-canonical: value could be encoded in fewer bytes",
            ));
        }
        Ok(value)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn read_length(&mut self, head: Head, limit: u64) -> CodecResult<usize> {
        let claimed = self.read_argument(head)?;
        if claimed > limit {
            return Err(CodecError::SizeLimitExceeded {
                claimed,
                max_allowed: limit,
            });
        }
        Ok(claimed as usize)
    }

    fn read_byte(&mut self) -> CodecResult<u8> {
        let byte = *self.data.get(self.pos).ok_or(CodecError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    fn take(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(CodecError::UnexpectedEof)?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_scalars() {
        assert_eq!(from_cbor(&[0xf6]).unwrap(), Value::Null);
        assert_eq!(from_cbor(&[0xf5]).unwrap(), Value::Bool(true));
        assert_eq!(from_cbor(&[0x17]).unwrap(), Value::Integer(23));
        assert_eq!(from_cbor(&[0x19, 0x01, 0x00]).unwrap(), Value::Integer(256));
        assert_eq!(from_cbor(&[0x38, 99]).unwrap(), Value::Integer(-100));
        assert_eq!(
            from_cbor(&[0x65, b'h', b'e', b'l', b'l', b'o']).unwrap(),
            Value::from("hello")
        );
    }

    #[test]
    fn decode_date_tag() {
        assert_eq!(
            from_cbor(&[0xc1, 0x19, 0x03, 0xe8]).unwrap(),
            Value::Date(1000)
        );
        // tag 1 wrapping text is not a date
        assert!(matches!(
            from_cbor(&[0xc1, 0x61, b'x']),
            Err(CodecError::InvalidStructure { .. })
        ));
        // tag 2 (bignum) is not supported
        assert!(matches!(
            from_cbor(&[0xc2, 0x41, 0x01]),
            Err(CodecError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn decode_map() {
        assert_eq!(
            from_cbor(&[0xa1, 0x61, b'a', 0x01]).unwrap(),
            Value::Map(vec![(Value::from("a"), Value::Integer(1))])
        );
    }

    #[test]
    fn reject_float() {
        assert!(matches!(
            from_cbor(&[0xf9, 0x00, 0x00]),
            Err(CodecError::FloatForbidden)
        ));
        assert!(matches!(
            from_cbor(&[0xfb, 0, 0, 0, 0, 0, 0, 0, 0]),
            Err(CodecError::FloatForbidden)
        ));
    }

    #[test]
    fn reject_indefinite_length() {
        assert!(matches!(
            from_cbor(&[0x9f, 0x01, 0xff]),
            Err(CodecError::IndefiniteLengthForbidden)
        ));
        assert!(matches!(
            from_cbor(&[0x7f, 0x61, b'a', 0xff]),
            Err(CodecError::IndefiniteLengthForbidden)
        ));
    }

    #[test]
    fn reject_non_shortest_encoding() {
        assert!(matches!(
            from_cbor(&[0x18, 23]),
            Err(CodecError::InvalidStructure { .. })
        ));
        assert!(matches!(
            from_cbor(&[0x19, 0x00, 0xff]),
            Err(CodecError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn reject_unsorted_map_keys() {
        assert!(matches!(
            from_cbor(&[0xa2, 0x61, b'b', 0x01, 0x61, b'a', 0x02]),
            Err(CodecError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn reject_oversized_length() {
        // byte string claiming 2^32 bytes
        assert!(matches!(
            from_cbor(&[0x5b, 0, 0, 0, 1, 0, 0, 0, 0]),
            Err(CodecError::SizeLimitExceeded { .. })
        ));
    }

    #[test]
    fn truncated_and_trailing_input() {
        assert!(matches!(from_cbor(&[]), Err(CodecError::UnexpectedEof)));
        assert!(matches!(from_cbor(&[0x19, 0x01]), Err(CodecError::UnexpectedEof)));
        assert!(matches!(
            from_cbor(&[0x01, 0x02]),
            Err(CodecError::TrailingBytes { remaining: 1 })
        ));
    }

    #[test]
    fn invalid_utf8_rejected() {
        assert!(matches!(
            from_cbor(&[0x62, 0xff, 0xfe]),
            Err(CodecError::InvalidUtf8)
        ));
    }

    #[test]
    fn unsigned_beyond_i64_overflows() {
        assert!(matches!(
            from_cbor(&[0x1b, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]),
            Err(CodecError::IntegerOverflow)
        ));
    }
}
