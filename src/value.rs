//! Structured payload values.
//!
//! [`Value`] is what an `Event` notification carries and what
//! [`Client::emit`](crate::Client::emit) sends. The variant set mirrors the
//! object kinds a system IPC service exchanges: integers, strings, raw data,
//! UUIDs, arrays and string-keyed dictionaries.
//!
//! # Example
//!
//! ```
//! use ipcwire_client::Value;
//!
//! let value = Value::dictionary([
//!     ("name", Value::from("blued")),
//!     ("pid", Value::from(42)),
//! ]);
//!
//! assert_eq!(value.get("pid").and_then(Value::as_i64), Some(42));
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A structured payload value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    /// Signed 64-bit integer.
    Int64(i64),
    /// UTF-8 string.
    String(String),
    /// Raw bytes (msgpack `bin`).
    Data(#[serde(with = "serde_bytes")] Vec<u8>),
    /// 128-bit UUID.
    Uuid(Uuid),
    /// Ordered list of values.
    Array(Vec<Value>),
    /// String-keyed dictionary.
    Dictionary(BTreeMap<String, Value>),
}

impl Value {
    /// Build a string value, turning upper-case hyphenated UUIDs into [`Value::Uuid`].
    ///
    /// Only the canonical upper-case form (`8-4-4-4-12` hex digits `A-F0-9`)
    /// is converted; everything else stays a string.
    pub fn text(s: impl Into<String>) -> Self {
        let s = s.into();
        if looks_like_uuid(&s) {
            if let Ok(uuid) = Uuid::parse_str(&s) {
                return Value::Uuid(uuid);
            }
        }
        Value::String(s)
    }

    /// Build a dictionary from key/value pairs.
    pub fn dictionary<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Dictionary(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Data(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Value::Uuid(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Look up a key when this value is a dictionary.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Dictionary(map) => map.get(key),
            _ => None,
        }
    }
}

fn looks_like_uuid(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 36
        && bytes.iter().enumerate().all(|(i, &b)| match i {
            8 | 13 | 18 | 23 => b == b'-',
            _ => b.is_ascii_digit() || (b'A'..=b'F').contains(&b),
        })
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int64(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Data(d) => write!(f, "<{} bytes>", d.len()),
            Value::Uuid(u) => write!(f, "{}", u.hyphenated().to_string().to_uppercase()),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Dictionary(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{:?} => {}", k, v)?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int64(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int64(n.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&[u8]> for Value {
    fn from(d: &[u8]) -> Self {
        Value::Data(d.to_vec())
    }
}

impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Value::Uuid(u)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Dictionary(map)
    }
}
