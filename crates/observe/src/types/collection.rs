//! Keyed and unique-value collections.
//!
//! Both are opaque to the wrapping engine. Entries keep insertion order and
//! compare keys with [`Value::same_value`], so heap references match by identity.

use crate::value::Value;

/// Insertion-ordered key/value collection.
#[derive(Debug, Default)]
pub(crate) struct Map {
    entries: Vec<(Value, Value)>,
}

impl Map {
    /// Builds a map from pairs. A repeated key keeps its first position and
    /// takes the last value; displaced values are returned for release.
    pub fn from_pairs(pairs: Vec<(Value, Value)>) -> (Self, Vec<Value>) {
        let mut map = Self::default();
        let mut displaced = Vec::new();
        for (key, value) in pairs {
            if let Some(slot) = map.entries.iter_mut().find(|(k, _)| k.same_value(&key)) {
                displaced.push(std::mem::replace(&mut slot.1, value));
                displaced.push(key);
            } else {
                map.entries.push((key, value));
            }
        }
        (map, displaced)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn estimate_size(&self) -> usize {
        self.entries
            .iter()
            .map(|(k, v)| 2 * std::mem::size_of::<Value>() + k.payload_size() + v.payload_size())
            .sum()
    }
}

/// Insertion-ordered collection of unique values.
#[derive(Debug, Default)]
pub(crate) struct Set {
    items: Vec<Value>,
}

impl Set {
    /// Builds a set, returning duplicates for release.
    pub fn from_values(values: Vec<Value>) -> (Self, Vec<Value>) {
        let mut set = Self::default();
        let mut duplicates = Vec::new();
        for value in values {
            if set.items.iter().any(|existing| existing.same_value(&value)) {
                duplicates.push(value);
            } else {
                set.items.push(value);
            }
        }
        (set, duplicates)
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.items
    }

    pub fn estimate_size(&self) -> usize {
        self.items
            .iter()
            .map(|v| std::mem::size_of::<Value>() + v.payload_size())
            .sum()
    }
}
