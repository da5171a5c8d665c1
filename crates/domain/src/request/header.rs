//! Header and query parameter maps

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Request headers keyed by name.
///
/// Names are unique ignoring ASCII case: inserting `content-type` replaces an
/// existing `Content-Type`. The casing of the most recent insert is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers {
    items: BTreeMap<String, String>,
}

impl Headers {
    /// Creates an empty header map.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            items: BTreeMap::new(),
        }
    }

    fn existing_key(&self, name: &str) -> Option<String> {
        self.items
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Inserts a header, replacing any header with the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if let Some(existing) = self.existing_key(&name) {
            self.items.remove(&existing);
        }
        self.items.insert(name, value.into());
    }

    /// Inserts a header only when no header with that name exists.
    pub fn insert_default(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if !self.contains(&name) {
            self.items.insert(name, value.into());
        }
    }

    /// Returns the value for `name`, ignoring case.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns true if a header with `name` exists, ignoring case.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Removes the header named `name`, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let key = self.existing_key(name)?;
        self.items.remove(&key)
    }

    /// Iterates over `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.items.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the number of headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Copies the headers into a plain map.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.items.clone()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut headers = Self::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

/// Query parameters keyed by name; later inserts win.
pub type QueryParams = BTreeMap<String, String>;
