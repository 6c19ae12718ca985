//! Structured values mirrored from the database.
//!
//! The database stores a JSON-like tree. `Value` is the recursive tagged union
//! the cache and the backing-store capability exchange, so nothing downstream
//! has to inspect `serde_json::Value` shapes at runtime.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ValidationError;

/// Characters the database refuses inside a single key.
pub const FORBIDDEN_KEY_CHARS: [char; 6] = ['.', '$', '#', '[', ']', '/'];

/// A value stored at a database path.
///
/// `Null` is a real stored value, distinct from "nothing stored here"; reads
/// report absence as `None` rather than `Some(Value::Null)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// An empty map.
    pub fn empty_map() -> Self {
        Value::Map(BTreeMap::new())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true for maps and lists.
    pub fn is_container(&self) -> bool {
        matches!(self, Value::Map(_) | Value::List(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Look up a direct child by key.
    ///
    /// Lists are addressed by decimal index, matching how the database
    /// exposes arrays as integer-keyed children.
    pub fn child(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(m) => m.get(key),
            Value::List(l) => key.parse::<usize>().ok().and_then(|i| l.get(i)),
            _ => None,
        }
    }

    /// Walk a sequence of keys below this value.
    ///
    /// An empty sequence returns `self`.
    pub fn descend<I, S>(&self, keys: I) -> Option<&Value>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut current = self;
        for key in keys {
            current = current.child(key.as_ref())?;
        }
        Some(current)
    }

    fn descend_mut<S: AsRef<str>>(&mut self, keys: &[S]) -> Option<&mut Value> {
        let mut current = self;
        for key in keys {
            current = match current {
                Value::Map(m) => m.get_mut(key.as_ref())?,
                Value::List(items) => items.get_mut(key.as_ref().parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Mutable child slot for `key`, creating it as needed.
    ///
    /// Scalars are replaced by maps. Lists are indexed in place when `key` is
    /// an in-range index, otherwise they become integer-keyed maps.
    fn slot_mut(&mut self, key: &str) -> &mut Value {
        let needs_map = match &*self {
            Value::Map(_) => false,
            Value::List(items) => !key
                .parse::<usize>()
                .map(|i| i < items.len())
                .unwrap_or(false),
            _ => true,
        };

        if needs_map {
            *self = match std::mem::take(self) {
                Value::List(items) => list_to_map(items.into_iter().enumerate()),
                _ => Value::empty_map(),
            };
        }

        match self {
            Value::Map(m) => m.entry(key.to_string()).or_insert(Value::Null),
            Value::List(items) => {
                let index = key.parse::<usize>().unwrap_or_default();
                &mut items[index]
            }
            // Scalars were replaced above.
            other => other,
        }
    }

    /// Replace the subtree at `keys` below this value, creating containers
    /// on the way. An empty sequence replaces `self`.
    ///
    /// This is how the database applies a set: a write below a scalar turns
    /// it into a map.
    pub fn set_at<I, S>(&mut self, keys: I, value: Value)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut current = self;
        for key in keys {
            current = current.slot_mut(key.as_ref());
        }
        *current = value;
    }

    /// Remove the subtree at `keys` below this value.
    ///
    /// Removing a list element turns the list into an integer-keyed map so
    /// the remaining indices keep their keys. Returns false when nothing was
    /// there. An empty sequence removes nothing; dropping a whole value is up
    /// to its owner.
    pub fn remove_at<S: AsRef<str>>(&mut self, keys: &[S]) -> bool {
        let Some((last, parents)) = keys.split_last() else {
            return false;
        };
        let Some(parent) = self.descend_mut(parents) else {
            return false;
        };
        let last = last.as_ref();

        match parent {
            Value::Map(m) => m.remove(last).is_some(),
            Value::List(items) => {
                let Some(index) = last.parse::<usize>().ok().filter(|i| *i < items.len()) else {
                    return false;
                };
                let remaining = std::mem::take(items)
                    .into_iter()
                    .enumerate()
                    .filter(|(i, _)| *i != index);
                *parent = list_to_map(remaining);
                true
            }
            _ => false,
        }
    }

    /// Shallow projection: every direct child of a container becomes `true`.
    ///
    /// Scalars are returned unchanged.
    pub fn shallow(&self) -> Value {
        match self {
            Value::Map(m) => Value::Map(
                m.keys()
                    .map(|k| (k.clone(), Value::Bool(true)))
                    .collect(),
            ),
            Value::List(l) => Value::Map(
                (0..l.len())
                    .map(|i| (i.to_string(), Value::Bool(true)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Check every map key in this value (recursively) against the database's
    /// key rules.
    pub fn validate_keys(&self) -> Result<(), ValidationError> {
        match self {
            Value::Map(m) => {
                for (key, child) in m {
                    validate_key(key)?;
                    child.validate_keys()?;
                }
                Ok(())
            }
            Value::List(l) => l.iter().try_for_each(Value::validate_keys),
            _ => Ok(()),
        }
    }
}

fn list_to_map(items: impl Iterator<Item = (usize, Value)>) -> Value {
    Value::Map(items.map(|(i, v)| (i.to_string(), v)).collect())
}

/// Validate a single map key.
pub fn validate_key(key: &str) -> Result<(), ValidationError> {
    if key.is_empty() {
        return Err(ValidationError::EmptyKey);
    }
    if let Some(character) = key
        .chars()
        .find(|c| FORBIDDEN_KEY_CHARS.contains(c) || c.is_ascii_control())
    {
        return Err(ValidationError::ForbiddenKeyCharacter {
            key: key.to_string(),
            character,
        });
    }
    Ok(())
}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
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

impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(m: BTreeMap<String, Value>) -> Self {
        Value::Map(m)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Value {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Value::Map(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Numbers that fit an `i64` become `Integer`; everything else, including
/// integers above `i64::MAX`, becomes `Float` and may lose precision.
/// Deserializing a `Value` directly follows the same rule.
impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => Value::List(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => {
                Value::Map(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Integer(i) => serde_json::Value::from(i),
            // Non-finite floats have no JSON form.
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::List(l) => {
                serde_json::Value::Array(l.into_iter().map(serde_json::Value::from).collect())
            }
            Value::Map(m) => serde_json::Value::Object(
                m.into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}
