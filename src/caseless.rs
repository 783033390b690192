//! Name-keyed map with scheme-dependent case sensitivity.

use std::borrow::Cow;
use std::collections::HashMap;

/// String-keyed map that optionally ignores key case.
///
/// Case-insensitive maps fold keys to lowercase for lookup but keep the
/// spelling used at first insertion.
#[derive(Debug, Clone)]
pub struct NameMap<V> {
    case_sensitive: bool,
    inner: HashMap<String, (String, V)>,
}

impl<V> Default for NameMap<V> {
    fn default() -> Self {
        Self::new(true)
    }
}

impl<V> NameMap<V> {
    /// Create an empty map.
    pub fn new(case_sensitive: bool) -> Self {
        Self {
            case_sensitive,
            inner: HashMap::new(),
        }
    }

    /// Create an empty case-insensitive map.
    pub fn caseless() -> Self {
        Self::new(false)
    }

    /// Whether keys are compared case-sensitively.
    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    fn fold<'a>(&self, key: &'a str) -> Cow<'a, str> {
        if self.case_sensitive {
            Cow::Borrowed(key)
        } else {
            Cow::Owned(key.to_lowercase())
        }
    }

    /// Insert, returning the previous value for the key.
    pub fn insert(&mut self, key: &str, value: V) -> Option<V> {
        let folded = self.fold(key).into_owned();
        match self.inner.get_mut(&folded) {
            Some(slot) => Some(std::mem::replace(&mut slot.1, value)),
            None => {
                self.inner.insert(folded, (key.to_string(), value));
                None
            }
        }
    }

    /// Value for the key.
    pub fn get(&self, key: &str) -> Option<&V> {
        self.inner.get(self.fold(key).as_ref()).map(|(_, v)| v)
    }

    /// Mutable value for the key.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        let folded = self.fold(key).into_owned();
        self.inner.get_mut(&folded).map(|(_, v)| v)
    }

    /// Value for the key, inserting the result of `make` when absent.
    pub fn get_or_insert_with(&mut self, key: &str, make: impl FnOnce() -> V) -> &mut V {
        let folded = self.fold(key).into_owned();
        &mut self
            .inner
            .entry(folded)
            .or_insert_with(|| (key.to_string(), make()))
            .1
    }

    /// Remove the key.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        let folded = self.fold(key).into_owned();
        self.inner.remove(&folded).map(|(_, v)| v)
    }

    /// Whether the key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.contains_key(self.fold(key).as_ref())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Keys as first inserted.
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.inner.values().map(|(k, _)| k.as_str())
    }

    /// Values.
    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.inner.values().map(|(_, v)| v)
    }

    /// `(key, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> + '_ {
        self.inner.values().map(|(k, v)| (k.as_str(), v))
    }

    /// Remove every entry, returning the values.
    pub fn drain(&mut self) -> Vec<V> {
        self.inner.drain().map(|(_, (_, v))| v).collect()
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.inner.clear();
    }
}
