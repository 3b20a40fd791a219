//! Record keys.
//!
//! Keys are integers or strings. Every integer sorts before every string,
//! integers compare numerically and strings by code point. Backends store
//! keys in an encoded text form that keeps this order under plain byte
//! comparison.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

const INT_TAG: char = '0';
const TEXT_TAG: char = '1';
const SIGN_BIT: u64 = 1 << 63;

/// Key of a record inside a partition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    /// Integer key.
    Int(i64),
    /// String key.
    Text(String),
}

/// Reason a key could not be read from a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// The key path names a field the record does not have.
    #[error("record has no value at key path `{0}`")]
    Missing(String),
    /// The field exists but is not a string or an integer.
    #[error("value at key path `{path}` is {found}, expected a string or integer")]
    InvalidType { path: String, found: &'static str },
    /// The integer at the key path does not fit a signed 64-bit key.
    #[error("integer at key path `{path}` is out of range for a key: {value}")]
    OutOfRange { path: String, value: u64 },
    /// An encoded key read back from storage is malformed.
    #[error("malformed stored key `{0}`")]
    Malformed(String),
}

impl Key {
    /// Read the key of `record` at a dotted `path` (`link`, `meta.guid`).
    pub fn from_record(record: &Value, path: &str) -> Result<Self, KeyError> {
        let mut current = record;
        for segment in path.split('.') {
            current = current
                .as_object()
                .and_then(|obj| obj.get(segment))
                .ok_or_else(|| KeyError::Missing(path.to_string()))?;
        }
        match current {
            Value::String(s) => Ok(Self::Text(s.clone())),
            Value::Number(n) => match (n.as_i64(), n.as_u64()) {
                (Some(i), _) => Ok(Self::Int(i)),
                (None, Some(value)) => Err(KeyError::OutOfRange {
                    path: path.to_string(),
                    value,
                }),
                (None, None) => Err(KeyError::InvalidType {
                    path: path.to_string(),
                    found: "a non-integral number",
                }),
            },
            other => Err(KeyError::InvalidType {
                path: path.to_string(),
                found: json_kind(other),
            }),
        }
    }

    /// Order-preserving text form used by the backends.
    pub fn encode(&self) -> String {
        match self {
            Self::Int(n) => format!("{INT_TAG}{:016x}", (*n as u64) ^ SIGN_BIT),
            Self::Text(s) => format!("{TEXT_TAG}{s}"),
        }
    }

    /// Inverse of [`Key::encode`].
    pub fn decode(raw: &str) -> Result<Self, KeyError> {
        let malformed = || KeyError::Malformed(raw.to_string());
        let mut chars = raw.chars();
        match chars.next() {
            Some(INT_TAG) => {
                let hex = chars.as_str();
                if hex.len() != 16 {
                    return Err(malformed());
                }
                let bits = u64::from_str_radix(hex, 16).map_err(|_| malformed())?;
                Ok(Self::Int((bits ^ SIGN_BIT) as i64))
            }
            Some(TEXT_TAG) => Ok(Self::Text(chars.as_str().to_string())),
            _ => Err(malformed()),
        }
    }

    /// The key as a JSON value.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(n) => Value::from(*n),
            Self::Text(s) => Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Self {
        key.clone()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_top_level_field() {
        let record = json!({"link": "https://x/1", "title": "T"});
        assert_eq!(
            Key::from_record(&record, "link").unwrap(),
            Key::Text("https://x/1".into())
        );
    }

    #[test]
    fn extract_integer_and_nested() {
        let record = json!({"id": 7, "meta": {"guid": "g-1"}});
        assert_eq!(Key::from_record(&record, "id").unwrap(), Key::Int(7));
        assert_eq!(
            Key::from_record(&record, "meta.guid").unwrap(),
            Key::Text("g-1".into())
        );
    }

    #[test]
    fn extract_rejects_missing_and_bad_types() {
        let record = json!({"id": null, "score": 1.5, "tags": ["a"]});
        assert_eq!(
            Key::from_record(&record, "link"),
            Err(KeyError::Missing("link".into()))
        );
        assert!(matches!(
            Key::from_record(&record, "id"),
            Err(KeyError::InvalidType { found: "null", .. })
        ));
        assert!(matches!(
            Key::from_record(&record, "score"),
            Err(KeyError::InvalidType { .. })
        ));
        assert!(matches!(
            Key::from_record(&record, "tags"),
            Err(KeyError::InvalidType { found: "an array", .. })
        ));
        assert!(Key::from_record(&json!("scalar"), "id").is_err());
    }

    #[test]
    fn integer_beyond_i64_is_out_of_range() {
        let record = json!({"id": u64::MAX, "edge": i64::MAX});
        let err = Key::from_record(&record, "id").unwrap_err();
        assert_eq!(
            err,
            KeyError::OutOfRange {
                path: "id".into(),
                value: u64::MAX
            }
        );
        assert!(err.to_string().contains("out of range"), "{err}");
        assert_eq!(Key::from_record(&record, "edge").unwrap(), Key::Int(i64::MAX));

        let fractional = Key::from_record(&json!({"id": 2.5}), "id").unwrap_err();
        assert!(fractional.to_string().contains("non-integral"), "{fractional}");
    }

    #[test]
    fn encoding_preserves_order() {
        let mut keys = vec![
            Key::Text("b".into()),
            Key::Int(10),
            Key::Text("a".into()),
            Key::Int(-3),
            Key::Int(i64::MIN),
            Key::Text(String::new()),
            Key::Int(i64::MAX),
            Key::Int(0),
        ];
        let mut encoded: Vec<String> = keys.iter().map(Key::encode).collect();
        keys.sort();
        encoded.sort();

        let decoded: Vec<Key> = encoded.iter().map(|e| Key::decode(e).unwrap()).collect();
        assert_eq!(decoded, keys);
        assert_eq!(keys.first(), Some(&Key::Int(i64::MIN)));
        assert_eq!(keys.last(), Some(&Key::Text("b".into())));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Key::decode("").is_err());
        assert!(Key::decode("x123").is_err());
        assert!(Key::decode("0zz").is_err());
    }

    #[test]
    fn serde_is_untagged() {
        assert_eq!(serde_json::to_string(&Key::Int(3)).unwrap(), "3");
        assert_eq!(serde_json::to_string(&Key::from("k")).unwrap(), "\"k\"");
        let key: Key = serde_json::from_str("\"theme\"").unwrap();
        assert_eq!(key, Key::from("theme"));
    }
}
