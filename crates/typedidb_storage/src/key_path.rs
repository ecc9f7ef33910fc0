//! Key paths and key extraction.
//!
//! A key path names where a record keeps its key: `"id"` for a top-level
//! field, `"key1.key2"` for a nested one. A store may also declare several
//! paths, in which case the key is the array of the resolved values in the
//! declared order.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use typedidb_codec::{Key, Value};

/// Errors from parsing key paths or extracting keys.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyPathError {
    /// The path is not a valid key path.
    #[error("invalid key path '{path}': {reason}")]
    Invalid {
        /// The rejected path text.
        path: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// The record does not hold a valid key at the path.
    #[error("no valid key at '{path}': {detail}")]
    KeyNotFound {
        /// The path that was resolved.
        path: String,
        /// Where resolution stopped.
        detail: String,
    },

    /// A generated key cannot be written into the record.
    #[error("cannot inject key at '{path}': {detail}")]
    Inject {
        /// The path that was written.
        path: String,
        /// Why it could not be written.
        detail: String,
    },
}

/// A single dotted key path, such as `key1.key2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyPath {
    segments: Vec<String>,
}

impl KeyPath {
    /// Parse a dotted path.
    ///
    /// # Errors
    ///
    /// The path must be non-empty and every segment must be an identifier
    /// (`[A-Za-z_$][A-Za-z0-9_$]*`).
    pub fn parse(path: &str) -> Result<Self, KeyPathError> {
        let invalid = |reason| KeyPathError::Invalid {
            path: path.to_string(),
            reason,
        };
        if path.is_empty() {
            return Err(invalid("path is empty"));
        }
        let mut segments = Vec::new();
        for segment in path.split('.') {
            if segment.is_empty() {
                return Err(invalid("empty segment"));
            }
            if !is_identifier(segment) {
                return Err(invalid("segment is not an identifier"));
            }
            segments.push(segment.to_string());
        }
        Ok(Self { segments })
    }

    /// The path's segments in order.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Walk `record` along this path and return what is there.
    #[must_use]
    pub fn lookup<'a>(&self, record: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(record, |current, segment| current.field(segment))
    }

    /// Resolve this path to a key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyPathError::KeyNotFound`] if a segment is missing, an
    /// intermediate value is not a map, or the final value is not a valid key.
    pub fn resolve(&self, record: &Value) -> Result<Key, KeyPathError> {
        let mut current = record;
        for (depth, segment) in self.segments.iter().enumerate() {
            if !matches!(current, Value::Map(_)) {
                let at = if depth == 0 {
                    "record".to_string()
                } else {
                    format!("'{}'", self.segments[..depth].join("."))
                };
                return Err(self.not_found(format!(
                    "{at} is {}, not a map",
                    current.type_name()
                )));
            }
            current = current
                .field(segment)
                .ok_or_else(|| self.not_found(format!("field '{segment}' is missing")))?;
        }
        Key::from_value(current).map_err(|e| self.not_found(e.to_string()))
    }

    /// Write `key` into `record` at this path, creating intermediate maps.
    ///
    /// # Errors
    ///
    /// Fails if the record or an intermediate value exists but is not a map.
    pub fn inject(&self, record: &mut Value, key: &Key) -> Result<(), KeyPathError> {
        let inject_error = |detail: &str| KeyPathError::Inject {
            path: self.to_string(),
            detail: detail.to_string(),
        };
        let (last, parents) = self
            .segments
            .split_last()
            .ok_or_else(|| inject_error("path is empty"))?;

        let mut current = record;
        for segment in parents {
            if !matches!(current, Value::Map(_)) {
                return Err(inject_error("intermediate value is not a map"));
            }
            if current.field(segment).is_none() {
                current.set_field(segment, Value::Map(Vec::new()));
            }
            current = current
                .field_mut(segment)
                .ok_or_else(|| inject_error("intermediate value is not a map"))?;
        }
        if current.set_field(last, key.to_value()) {
            Ok(())
        } else {
            Err(inject_error("target is not a map"))
        }
    }

    fn not_found(&self, detail: String) -> KeyPathError {
        KeyPathError::KeyNotFound {
            path: self.to_string(),
            detail,
        }
    }
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    let starts_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$');
    starts_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl FromStr for KeyPath {
    type Err = KeyPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for KeyPath {
    type Error = KeyPathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<KeyPath> for String {
    fn from(path: KeyPath) -> Self {
        path.to_string()
    }
}

/// A store or index key path: one path, or an ordered composite.
///
/// Serializes as a string or an array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "KeyPathSpecRepr", into = "KeyPathSpecRepr")]
pub enum KeyPathSpec {
    /// One dotted path.
    Single(KeyPath),
    /// Several paths whose values form an array key.
    Composite(Vec<KeyPath>),
}

/// Wire form of [`KeyPathSpec`]; an empty composite is rejected on the way in.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum KeyPathSpecRepr {
    Single(KeyPath),
    Composite(Vec<KeyPath>),
}

impl TryFrom<KeyPathSpecRepr> for KeyPathSpec {
    type Error = KeyPathError;

    fn try_from(repr: KeyPathSpecRepr) -> Result<Self, Self::Error> {
        match repr {
            KeyPathSpecRepr::Single(path) => Ok(Self::Single(path)),
            KeyPathSpecRepr::Composite(paths) if paths.is_empty() => Err(empty_composite()),
            KeyPathSpecRepr::Composite(paths) => Ok(Self::Composite(paths)),
        }
    }
}

impl From<KeyPathSpec> for KeyPathSpecRepr {
    fn from(spec: KeyPathSpec) -> Self {
        match spec {
            KeyPathSpec::Single(path) => Self::Single(path),
            KeyPathSpec::Composite(paths) => Self::Composite(paths),
        }
    }
}

fn empty_composite() -> KeyPathError {
    KeyPathError::Invalid {
        path: "[]".to_string(),
        reason: "composite key path has no members",
    }
}

impl KeyPathSpec {
    /// Parse a single dotted path.
    ///
    /// # Errors
    ///
    /// See [`KeyPath::parse`].
    pub fn parse(path: &str) -> Result<Self, KeyPathError> {
        KeyPath::parse(path).map(Self::Single)
    }

    /// Parse an ordered composite path.
    ///
    /// # Errors
    ///
    /// Fails if the list is empty or any member is invalid.
    pub fn composite<'a, I>(paths: I) -> Result<Self, KeyPathError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let paths = paths
            .into_iter()
            .map(KeyPath::parse)
            .collect::<Result<Vec<_>, _>>()?;
        if paths.is_empty() {
            return Err(empty_composite());
        }
        Ok(Self::Composite(paths))
    }

    /// Whether this is a composite path.
    #[must_use]
    pub fn is_composite(&self) -> bool {
        matches!(self, Self::Composite(_))
    }

    /// The member paths, in declared order.
    #[must_use]
    pub fn paths(&self) -> &[KeyPath] {
        match self {
            Self::Single(path) => std::slice::from_ref(path),
            Self::Composite(paths) => paths,
        }
    }

    /// Resolve the key of `record`.
    ///
    /// A composite path yields [`Key::Array`] of the member keys in declared
    /// order.
    ///
    /// # Errors
    ///
    /// Fails with the first member that does not resolve.
    pub fn resolve(&self, record: &Value) -> Result<Key, KeyPathError> {
        match self {
            Self::Single(path) => path.resolve(record),
            Self::Composite(paths) => paths
                .iter()
                .map(|path| path.resolve(record))
                .collect::<Result<Vec<_>, _>>()
                .map(Key::Array),
        }
    }

    /// Keys a multi-entry index holds for `record`.
    ///
    /// An array value contributes each valid, distinct element; anything else
    /// contributes its own key if it is one.
    #[must_use]
    pub fn multi_entry_keys(&self, record: &Value) -> Vec<Key> {
        let Self::Single(path) = self else {
            return self.resolve(record).into_iter().collect();
        };
        match path.lookup(record) {
            Some(Value::Array(items)) => {
                let mut keys: Vec<Key> = items
                    .iter()
                    .filter_map(|item| Key::from_value(item).ok())
                    .collect();
                keys.sort();
                keys.dedup();
                keys
            }
            Some(value) => Key::from_value(value).into_iter().collect(),
            None => Vec::new(),
        }
    }
}

impl fmt::Display for KeyPathSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(path) => write!(f, "{path}"),
            Self::Composite(paths) => {
                let joined: Vec<String> = paths.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", joined.join(", "))
            }
        }
    }
}

impl From<KeyPath> for KeyPathSpec {
    fn from(path: KeyPath) -> Self {
        Self::Single(path)
    }
}

impl FromStr for KeyPathSpec {
    type Err = KeyPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        Value::object([
            ("key1", Value::object([("key2", Value::from("hello"))])),
            ("key3", Value::Integer(5)),
        ])
    }

    #[test]
    fn parse_rejects_bad_paths() {
        assert!(KeyPath::parse("").is_err());
        assert!(KeyPath::parse("a..b").is_err());
        assert!(KeyPath::parse(".a").is_err());
        assert!(KeyPath::parse("1a").is_err());
        assert!(KeyPath::parse("a-b").is_err());
        assert!(KeyPathSpec::composite(Vec::<&str>::new()).is_err());

        let path = KeyPath::parse("key1.key2").unwrap();
        assert_eq!(path.segments(), ["key1", "key2"]);
        assert_eq!(path.to_string(), "key1.key2");
        assert!(KeyPath::parse("$id").is_ok());
    }

    #[test]
    fn resolves_flat_and_nested() {
        let record = sample();
        assert_eq!(
            KeyPathSpec::parse("key3").unwrap().resolve(&record).unwrap(),
            Key::Number(5)
        );
        assert_eq!(
            KeyPathSpec::parse("key1.key2").unwrap().resolve(&record).unwrap(),
            Key::from("hello")
        );
    }

    #[test]
    fn composite_keeps_declared_order() {
        let record = sample();
        let forward = KeyPathSpec::composite(["key1.key2", "key3"]).unwrap();
        let reverse = KeyPathSpec::composite(["key3", "key1.key2"]).unwrap();

        assert_eq!(forward.resolve(&record).unwrap(), Key::from(("hello", 5)));
        assert_eq!(reverse.resolve(&record).unwrap(), Key::from((5, "hello")));
    }

    #[test]
    fn missing_or_untraversable_is_key_not_found() {
        let record = sample();
        for path in ["nope", "key1.nope", "key3.deeper", "key1"] {
            let err = KeyPathSpec::parse(path).unwrap().resolve(&record).unwrap_err();
            assert!(
                matches!(err, KeyPathError::KeyNotFound { .. }),
                "{path} gave {err:?}"
            );
        }
        let flag = Value::object([("flag", Value::Bool(true))]);
        assert!(KeyPathSpec::parse("flag").unwrap().resolve(&flag).is_err());
    }

    #[test]
    fn inject_creates_intermediate_maps() {
        let path = KeyPath::parse("meta.id").unwrap();
        let mut record = Value::object([("name", Value::from("x"))]);
        path.inject(&mut record, &Key::Number(7)).unwrap();
        assert_eq!(path.resolve(&record).unwrap(), Key::Number(7));

        let mut blocked = Value::object([("meta", Value::Integer(1))]);
        assert!(matches!(
            path.inject(&mut blocked, &Key::Number(7)),
            Err(KeyPathError::Inject { .. })
        ));
    }

    #[test]
    fn multi_entry_spreads_arrays() {
        let record = Value::object([(
            "tags",
            Value::Array(vec![
                Value::from("b"),
                Value::from("a"),
                Value::from("b"),
                Value::Null,
            ]),
        )]);
        let spec = KeyPathSpec::parse("tags").unwrap();
        assert_eq!(
            spec.multi_entry_keys(&record),
            vec![Key::from("a"), Key::from("b")]
        );
        assert!(spec.multi_entry_keys(&Value::object([("x", Value::Null)])).is_empty());
    }
}
