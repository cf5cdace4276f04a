//! Ordered, heterogeneous property sets
//!
//! A [`PropertySet`] maps unique string keys to [`Value`]s and preserves the
//! order in which keys were first inserted. Dotted keys such as `a.b.c` are
//! plain strings; hierarchy is only real when a value is itself a nested
//! `PropertySet`.

use crate::error::{EventError, Result};
use serde::{Deserialize, Serialize};

/// A single property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Sequence(Vec<Value>),
    PropertySet(PropertySet),
}

impl Value {
    /// Short type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bool(_) => "bool",
            Value::Sequence(_) => "sequence",
            Value::PropertySet(_) => "property set",
        }
    }

    /// Whether this value is a scalar usable as a broker header
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Value::Sequence(_) | Value::PropertySet(_))
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Int(v) => serde_json::Value::from(*v),
            Value::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(v) => serde_json::Value::String(v.clone()),
            Value::Bool(v) => serde_json::Value::Bool(*v),
            Value::Sequence(values) => {
                serde_json::Value::Array(values.iter().map(Value::to_json).collect())
            }
            Value::PropertySet(ps) => ps.to_json(),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<PropertySet> for Value {
    fn from(v: PropertySet) -> Self {
        Value::PropertySet(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::Sequence(values.into_iter().map(Into::into).collect())
    }
}

/// Insertion-ordered mapping from unique names to values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertySet {
    entries: Vec<(String, Value)>,
}

impl PropertySet {
    /// Create an empty property set
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(key, _)| key == name)
    }

    /// Set `name` to `value`, replacing any existing value in place
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(index) => self.entries[index].1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Append `value` to `name`, creating the property if it is absent.
    ///
    /// A scalar already stored under `name` becomes a two-element sequence.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        let Some(index) = self.position(&name) else {
            self.entries.push((name, value));
            return;
        };

        let slot = &mut self.entries[index].1;
        let mut items = match std::mem::replace(slot, Value::Sequence(Vec::new())) {
            Value::Sequence(items) => items,
            scalar => vec![scalar],
        };
        match value {
            Value::Sequence(more) => items.extend(more),
            single => items.push(single),
        }
        *slot = Value::Sequence(items);
    }

    /// Get the value stored under `name`
    pub fn get(&self, name: &str) -> Result<&Value> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
            .ok_or_else(|| EventError::key_not_found(name))
    }

    /// Get an integer property
    pub fn get_int(&self, name: &str) -> Result<i64> {
        match self.get(name)? {
            Value::Int(v) => Ok(*v),
            _ => Err(EventError::type_mismatch(name, "int")),
        }
    }

    /// Get a floating point property
    pub fn get_float(&self, name: &str) -> Result<f64> {
        match self.get(name)? {
            Value::Float(v) => Ok(*v),
            _ => Err(EventError::type_mismatch(name, "float")),
        }
    }

    /// Get a string property
    pub fn get_string(&self, name: &str) -> Result<&str> {
        match self.get(name)? {
            Value::String(v) => Ok(v),
            _ => Err(EventError::type_mismatch(name, "string")),
        }
    }

    /// Get a boolean property
    pub fn get_bool(&self, name: &str) -> Result<bool> {
        match self.get(name)? {
            Value::Bool(v) => Ok(*v),
            _ => Err(EventError::type_mismatch(name, "bool")),
        }
    }

    /// Get a nested property set
    pub fn get_property_set(&self, name: &str) -> Result<&PropertySet> {
        match self.get(name)? {
            Value::PropertySet(v) => Ok(v),
            _ => Err(EventError::type_mismatch(name, "property set")),
        }
    }

    /// Check whether `name` is present
    pub fn exists(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Remove `name`, returning its value if it was present
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.position(name)
            .map(|index| self.entries.remove(index).1)
    }

    /// Property names in insertion order
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(key, _)| key.clone()).collect()
    }

    /// Number of distinct names
    pub fn name_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of values stored under `name`: the sequence length for
    /// sequences, 1 for anything else and 0 when absent
    pub fn value_count(&self, name: &str) -> usize {
        match self.get(name) {
            Ok(Value::Sequence(items)) => items.len(),
            Ok(_) => 1,
            Err(_) => 0,
        }
    }

    /// True when the set holds no properties
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(name, value)` pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Copy every property of `other` into this set, overwriting duplicates
    pub fn merge(&mut self, other: &PropertySet) {
        for (name, value) in other.iter() {
            self.set(name, value.clone());
        }
    }

    /// Render as a JSON object, keeping insertion order where the map allows
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .entries
            .iter()
            .map(|(key, value)| (key.clone(), value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for PropertySet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut ps = PropertySet::new();
        for (name, value) in iter {
            ps.set(name, value);
        }
        ps
    }
}
