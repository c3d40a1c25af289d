//! Insertion-ordered field storage.

use crate::value::Value;
use std::collections::HashMap;

/// An insertion-ordered mapping from field name to value.
///
/// Names keep the position of their first insertion; overwriting a name
/// replaces the value in place. Lookup by name is O(1) through a
/// name-to-index table kept alongside the ordered names.
#[derive(Debug, Clone)]
pub struct FieldMap<V> {
    /// Field names in insertion order
    names: Vec<String>,
    /// Values, parallel to `names`
    values: Vec<V>,
    /// Name -> index mapping
    name_to_index: HashMap<String, usize>,
}

/// A flat mapping of scalar values, as exchanged with an entity.
pub type Record = FieldMap<Value>;

impl<V> FieldMap<V> {
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            names: Vec::new(),
            values: Vec::new(),
            name_to_index: HashMap::new(),
        }
    }

    /// Create an empty map with room for `capacity` fields.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            names: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
            name_to_index: HashMap::with_capacity(capacity),
        }
    }

    /// Get the number of fields.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if there are no fields.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Check if a field exists.
    pub fn contains(&self, name: &str) -> bool {
        self.name_to_index.contains_key(name)
    }

    /// Get the position of a field by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// Get a value by field name.
    pub fn get(&self, name: &str) -> Option<&V> {
        self.index_of(name).and_then(|i| self.values.get(i))
    }

    /// Get a mutable value by field name.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut V> {
        match self.index_of(name) {
            Some(i) => self.values.get_mut(i),
            None => None,
        }
    }

    /// Insert or overwrite a field, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: V) -> Option<V> {
        let name = name.into();
        if let Some(i) = self.index_of(&name) {
            return Some(std::mem::replace(&mut self.values[i], value));
        }
        self.name_to_index.insert(name.clone(), self.names.len());
        self.names.push(name);
        self.values.push(value);
        None
    }

    /// Remove a field, shifting later fields down one position.
    pub fn remove(&mut self, name: &str) -> Option<V> {
        let index = self.name_to_index.remove(name)?;
        self.names.remove(index);
        let value = self.values.remove(index);
        for (i, n) in self.names.iter().enumerate().skip(index) {
            self.name_to_index.insert(n.clone(), i);
        }
        Some(value)
    }

    /// Keep only the fields for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &V) -> bool) {
        let names = std::mem::take(&mut self.names);
        let values = std::mem::take(&mut self.values);
        self.name_to_index.clear();
        for (name, value) in names.into_iter().zip(values) {
            if keep(&name, &value) {
                self.insert(name, value);
            }
        }
    }

    /// Get all field names in order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Iterate over all values in order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.values.iter()
    }

    /// Iterate over (name, value) pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.names.iter().map(String::as_str).zip(self.values.iter())
    }

    /// Map every value, keeping names and order.
    pub fn map<U>(&self, mut f: impl FnMut(&str, &V) -> U) -> FieldMap<U> {
        let values = self.iter().map(|(name, value)| f(name, value)).collect();
        FieldMap {
            names: self.names.clone(),
            values,
            name_to_index: self.name_to_index.clone(),
        }
    }
}

impl Record {
    /// Project the record onto a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::with_capacity(self.len());
        for (name, value) in self.iter() {
            map.insert(name.to_string(), value.to_json());
        }
        serde_json::Value::Object(map)
    }
}

impl<V> Default for FieldMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: PartialEq> PartialEq for FieldMap<V> {
    fn eq(&self, other: &Self) -> bool {
        self.names == other.names && self.values == other.values
    }
}

impl<K: Into<String>, V> FromIterator<(K, V)> for FieldMap<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        map.extend(iter);
        map
    }
}

impl<K: Into<String>, V> Extend<(K, V)> for FieldMap<V> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (name, value) in iter {
            self.insert(name, value);
        }
    }
}

impl<V> IntoIterator for FieldMap<V> {
    type Item = (String, V);
    type IntoIter = std::iter::Zip<std::vec::IntoIter<String>, std::vec::IntoIter<V>>;

    fn into_iter(self) -> Self::IntoIter {
        self.names.into_iter().zip(self.values)
    }
}
