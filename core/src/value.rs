//! Structured parameter values.
//!
//! # Design
//! Nested request parameters are modeled as an explicit sum type built by the
//! caller rather than inspected at runtime. `Map` keys are strings and are
//! kept sorted, so iteration order is lexicographic. `List` covers both
//! growable lists and fixed arrays. `Set` holds distinct members and iterates
//! in an implementation-defined order (currently first-insertion order), which
//! callers must not rely on.

use std::collections::BTreeMap;

use serde_json::Number;

/// A structured parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Map(BTreeMap<String, Value>),
    List(Vec<Value>),
    Set(Vec<Value>),
    Str(String),
    Number(Number),
    Bool(bool),
}

impl Value {
    /// An empty set, the container `RequestParams::append` starts from.
    pub fn empty_set() -> Self {
        Value::Set(Vec::new())
    }

    /// Build a set from members, dropping duplicates.
    pub fn set<I, V>(members: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let mut set = Value::empty_set();
        for member in members {
            set.insert(member.into());
        }
        set
    }

    /// Add a member to a `Set` (ignored when already present) or push onto a
    /// `List`. Returns `false` when `self` is neither.
    pub fn insert(&mut self, member: Value) -> bool {
        match self {
            Value::Set(members) => {
                if !members.contains(&member) {
                    members.push(member);
                }
                true
            }
            Value::List(items) => {
                items.push(member);
                true
            }
            _ => false,
        }
    }

    /// The textual form emitted for a scalar, `None` for containers.
    pub fn as_scalar_string(&self) -> Option<String> {
        match self {
            Value::Str(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Map(_) | Value::List(_) | Value::Set(_) => None,
        }
    }

    /// JSON form used by the streamed JSON body. Sets become arrays.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::List(items) | Value::Set(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Number(n) => serde_json::Value::Number(n.clone()),
            Value::Bool(b) => serde_json::Value::Bool(*b),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n.into())
    }
}

impl<V: Into<Value>> From<Vec<V>> for Value {
    fn from(items: Vec<V>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<V: Into<Value>, const N: usize> From<[V; N]> for Value {
    fn from(items: [V; N]) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Value::Map(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Converts JSON into a parameter value. `null` members of objects are
/// skipped; a bare `null` becomes the string `"null"`.
impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Null => Value::Str("null".to_string()),
        }
    }
}
