//! The attribute bag itself.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// String-keyed bag of JSON values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeBag {
    entries: Map<String, Value>,
}

impl AttributeBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(entries: Map<String, Value>) -> Self {
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Set a single key, returning the previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries.insert(key.into(), value.into())
    }

    /// Merge many keys at once. Keys absent from `values` are left untouched.
    pub fn set_many<I, K>(&mut self, values: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        for (key, value) in values {
            self.entries.insert(key.into(), value);
        }
    }

    /// Merge `partial` into the object stored under `key`.
    ///
    /// A missing or non-object value under `key` is replaced by a fresh object.
    pub fn merge_nested(&mut self, key: &str, partial: &Map<String, Value>) {
        let slot = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));

        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }

        if let Value::Object(target) = slot {
            for (k, v) in partial {
                target.insert(k.clone(), v.clone());
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_map(&self) -> Map<String, Value> {
        self.entries.clone()
    }

    /// Read a value as a boolean.
    ///
    /// Numbers are true when non-zero. Strings accept `1/true/yes/on` and
    /// `0/false/no/off/""` (case-insensitive). Anything else yields `None`.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.entries.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_f64().map(|f| f != 0.0),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" | "" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

impl From<Map<String, Value>> for AttributeBag {
    fn from(entries: Map<String, Value>) -> Self {
        Self::from_map(entries)
    }
}
