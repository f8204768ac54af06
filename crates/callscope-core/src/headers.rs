//! Canonical header representation
//!
//! Header names compare case-insensitively but keep the casing of their first
//! occurrence. Repeated names are merged into a single entry whose value turns
//! into a list as soon as a second occurrence is appended.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A header value: either one string or the ordered list of repeated values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Single(String),
    Multiple(Vec<String>),
}

impl HeaderValue {
    /// Append another occurrence, converting a single value into a list
    pub fn push(&mut self, value: impl Into<String>) {
        let value = value.into();
        match self {
            Self::Single(existing) => {
                let first = std::mem::take(existing);
                *self = Self::Multiple(vec![first, value]);
            }
            Self::Multiple(values) => values.push(value),
        }
    }

    /// Append every value of another header value
    pub fn extend(&mut self, other: HeaderValue) {
        for value in other.into_values() {
            self.push(value);
        }
    }

    /// Iterate over the individual values
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            Self::Single(value) => std::slice::from_ref(value),
            Self::Multiple(values) => values,
        };
        slice.iter().map(String::as_str)
    }

    pub fn into_values(self) -> Vec<String> {
        match self {
            Self::Single(value) => vec![value],
            Self::Multiple(values) => values,
        }
    }

    /// First value, used when a header is interpreted as a scalar
    pub fn first(&self) -> Option<&str> {
        self.iter().next()
    }

    /// Transform every value while keeping the shape
    pub fn map(&self, f: impl Fn(&str) -> String) -> HeaderValue {
        match self {
            Self::Single(value) => Self::Single(f(value)),
            Self::Multiple(values) => Self::Multiple(values.iter().map(|v| f(v)).collect()),
        }
    }

    /// Values joined the way HTTP folds repeated headers
    pub fn joined(&self) -> String {
        self.iter().collect::<Vec<_>>().join(", ")
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Multiple(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        Self::Single(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        Self::Single(value)
    }
}

impl From<Vec<String>> for HeaderValue {
    fn from(values: Vec<String>) -> Self {
        Self::Multiple(values)
    }
}

/// Ordered, case-insensitive header map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, HeaderValue)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(existing, _)| existing.eq_ignore_ascii_case(name))
    }

    /// Append one occurrence of a header
    ///
    /// The first occurrence sets the value and fixes the name's casing; later
    /// occurrences (in any casing) are appended to a list.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.append_value(name, HeaderValue::Single(value.into()));
    }

    /// Append a possibly multi-valued header, merging with existing entries
    pub fn append_value(&mut self, name: impl Into<String>, value: HeaderValue) {
        let name = name.into();
        match self.position(&name) {
            Some(index) => self.entries[index].1.extend(value),
            None => self.entries.push((name, value)),
        }
    }

    /// Replace the value of a header, keeping its original position and casing
    pub fn insert(&mut self, name: impl Into<String>, value: HeaderValue) {
        let name = name.into();
        match self.position(&name) {
            Some(index) => self.entries[index].1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.position(name).map(|index| &self.entries[index].1)
    }

    /// First value of a header
    pub fn first_value(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(HeaderValue::first)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<HeaderValue> {
        self.position(name).map(|index| self.entries.remove(index).1)
    }

    /// Keep only the entries for which the predicate holds
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &HeaderValue) -> bool) {
        self.entries.retain(|(name, value)| keep(name, value));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    /// Header names in insertion order, with their preserved casing
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for HeaderMap {
    type Item = (String, HeaderValue);
    type IntoIter = std::vec::IntoIter<(String, HeaderValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut map = HeaderMap::new();
        for (name, value) in iter {
            map.append(name, value);
        }
        map
    }
}

impl Serialize for HeaderMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for HeaderMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HeaderMapVisitor;

        impl<'de> Visitor<'de> for HeaderMapVisitor {
            type Value = HeaderMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of header names to a string or a list of strings")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<HeaderMap, A::Error> {
                let mut map = HeaderMap::new();
                while let Some((name, value)) = access.next_entry::<String, HeaderValue>()? {
                    map.append_value(name, value);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(HeaderMapVisitor)
    }
}
