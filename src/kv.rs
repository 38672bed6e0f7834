//! Ordered key/value container with functional transforms
//!
//! `EntryMap` is the adapter the name-recovery heuristics use to walk the
//! globals of a target context. It never mutates the map it is called on:
//! `filter` and `map` build a new map, `reduce` folds into a caller value.
//!
//! Enumeration is insertion order (JSON document order for snapshots), so
//! `first_key` is deterministic for a given input.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use fnv::FnvHashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;

/// Names the transform helpers get installed under when a host page is
/// augmented in place. Enumeration skips them so a previously augmented
/// context never hands its own helpers to a predicate.
pub const HELPER_NAMES: [&str; 4] = ["filter", "map", "reduce", "getFirstKey"];

/// Check whether a key is one of the transform helper names
pub fn is_helper_name(key: &str) -> bool {
    HELPER_NAMES.contains(&key)
}

/// Insertion-ordered map from identifier to value
///
/// Entries live in a `Vec` for ordering; `index` maps each key to its slot.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryMap<V> {
    entries: Vec<(String, V)>,
    index: FnvHashMap<String, usize>,
}

impl<V> Default for EntryMap<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: FnvHashMap::default(),
        }
    }
}

impl<V> EntryMap<V> {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            index: FnvHashMap::with_capacity_and_hasher(capacity, Default::default()),
        }
    }

    /// Insert a value. An existing key keeps its position and takes the new
    /// value (last write wins).
    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        match self.index.get(&key) {
            Some(&slot) => self.entries[slot].1 = value,
            None => self.push_new(key, value),
        }
    }

    /// Append a key known to be absent
    fn push_new(&mut self, key: String, value: V) {
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, value));
    }

    /// Look up a value by exact key
    pub fn get(&self, key: &str) -> Option<&V> {
        self.index.get(key).map(|&slot| &self.entries[slot].1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Own entries in enumeration order, helper names excluded
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries
            .iter()
            .filter(|(k, _)| !is_helper_name(k))
            .map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.iter().map(|(k, _)| k)
    }

    /// Number of enumerable entries
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keep only the entries for which `predicate` returns true
    pub fn filter<F>(&self, mut predicate: F) -> EntryMap<V>
    where
        V: Clone,
        F: FnMut(&str, &V) -> bool,
    {
        let mut result = EntryMap::new();
        for (k, v) in self.iter() {
            if predicate(k, v) {
                // source keys are unique
                result.push_new(k.to_string(), v.clone());
            }
        }
        result
    }

    /// Transform every entry into a new key/value pair.
    ///
    /// When two entries map to the same key the later one wins.
    pub fn map<U, F>(&self, mut transform: F) -> EntryMap<U>
    where
        F: FnMut(&str, &V) -> (String, U),
    {
        let mut result = EntryMap::new();
        for (k, v) in self.iter() {
            let (key, value) = transform(k, v);
            result.insert(key, value);
        }
        result
    }

    /// Fold all entries into a single value, starting from `initial`
    pub fn reduce<A, F>(&self, initial: A, mut combine: F) -> A
    where
        F: FnMut(A, &str, &V) -> A,
    {
        self.iter()
            .fold(initial, |acc, (k, v)| combine(acc, k, v))
    }

    /// First enumerable key, if any
    pub fn first_key(&self) -> Option<&str> {
        self.keys().next()
    }
}

impl<V> FromIterator<(String, V)> for EntryMap<V> {
    fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut map = EntryMap::with_capacity(iter.size_hint().0);
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl<V> IntoIterator for EntryMap<V> {
    type Item = (String, V);
    type IntoIter = std::vec::IntoIter<(String, V)>;

    fn into_iter(mut self) -> Self::IntoIter {
        self.entries.retain(|(k, _)| !is_helper_name(k));
        self.entries.into_iter()
    }
}

impl<V: Serialize> Serialize for EntryMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for EntryMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntryMapVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for EntryMapVisitor<V> {
            type Value = EntryMap<V>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of identifiers to values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut map = EntryMap::with_capacity(access.size_hint().unwrap_or(0).min(4096));
                while let Some((key, value)) = access.next_entry::<String, V>()? {
                    map.insert(key, value);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(EntryMapVisitor(PhantomData))
    }
}
