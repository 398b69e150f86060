//! Per-session keyed state store.
//!
//! Every entry is addressed by a key marker from [`keys`]; the marker fixes the
//! value type at compile time, so a lookup can never observe a value of the
//! wrong shape. Mutations are visible to the next read immediately.
pub mod keys;

pub use keys::{Key, KeyClass, StateKey, StateValue};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A stage's memoized generator result together with its diagnostic trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutput<T> {
    pub result: T,
    /// Plain-text log of the request and response exchanged with the generator.
    pub trace: String,
}

impl<T> StageOutput<T> {
    pub fn new(result: T, trace: impl Into<String>) -> Self {
        Self {
            result,
            trace: trace.into(),
        }
    }
}

/// The full keyed store for one workflow instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<StateValue>", into = "Vec<StateValue>")]
pub struct SessionState {
    entries: BTreeMap<StateKey, StateValue>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<K: Key>(&self, _key: K) -> Option<&K::Value> {
        self.entries.get(&K::TAG).and_then(K::peek)
    }

    /// Return a copy of the stored value, or `default` when absent.
    pub fn get_or<K: Key>(&self, key: K, default: K::Value) -> K::Value {
        self.get(key).cloned().unwrap_or(default)
    }

    pub fn get_mut<K: Key>(&mut self, _key: K) -> Option<&mut K::Value> {
        self.entries.get_mut(&K::TAG).and_then(K::peek_mut)
    }

    /// Store `value`, replacing whatever was there.
    pub fn set<K: Key>(&mut self, _key: K, value: K::Value) {
        self.entries.insert(K::TAG, K::wrap(value));
    }

    pub fn has<K: Key>(&self, _key: K) -> bool {
        self.entries.contains_key(&K::TAG)
    }

    #[cfg(test)]
    pub fn has_tag(&self, tag: StateKey) -> bool {
        self.entries.contains_key(&tag)
    }

    /// Remove and return the value; absent keys are a no-op.
    pub fn delete<K: Key>(&mut self, _key: K) -> Option<K::Value> {
        self.entries.remove(&K::TAG).and_then(K::unwrap)
    }

    /// Push onto a list entry, treating a missing entry as an empty list.
    pub fn append<K, T>(&mut self, key: K, item: T)
    where
        K: Key<Value = Vec<T>>,
        T: Clone,
    {
        let mut list = self.delete(key).unwrap_or_default();
        list.push(item);
        self.set(key, list);
    }

    /// Overwrite one element of a stored list.
    ///
    /// # Panics
    ///
    /// Panics when the entry is absent or `index` is out of range; callers must
    /// size the list first (see [`SessionState::resize_list`]).
    pub fn set_index<K, T>(&mut self, key: K, index: usize, item: T)
    where
        K: Key<Value = Vec<T>>,
        T: Clone,
    {
        let Some(list) = self.get_mut(key) else {
            panic!("set_index on absent list {}", K::TAG);
        };
        let len = list.len();
        assert!(
            index < len,
            "set_index {index} out of range for {} (len {len})",
            K::TAG
        );
        list[index] = item;
    }

    /// Grow or shrink a list entry to exactly `len` elements.
    pub fn resize_list<K, T>(&mut self, key: K, len: usize)
    where
        K: Key<Value = Vec<T>>,
        T: Clone + Default,
    {
        let mut list = self.delete(key).unwrap_or_default();
        list.resize(len, T::default());
        self.set(key, list);
    }

    /// Remove one element of a list entry. Returns `None` when out of range.
    pub fn remove_at<K, T>(&mut self, key: K, index: usize) -> Option<T>
    where
        K: Key<Value = Vec<T>>,
        T: Clone,
    {
        let list = self.get_mut(key)?;
        (index < list.len()).then(|| list.remove(index))
    }

    /// Drop every entry of the given class. Returns how many were removed.
    pub fn clear_class(&mut self, class: KeyClass) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.class() != class);
        before - self.entries.len()
    }

    /// Keys currently present, in declaration order.
    #[cfg(test)]
    pub fn keys(&self) -> impl Iterator<Item = StateKey> + '_ {
        self.entries.keys().copied()
    }
}

impl From<Vec<StateValue>> for SessionState {
    fn from(values: Vec<StateValue>) -> Self {
        let entries = values
            .into_iter()
            .map(|value| (value.key(), value))
            .collect();
        Self { entries }
    }
}

impl From<SessionState> for Vec<StateValue> {
    fn from(state: SessionState) -> Self {
        state.entries.into_values().collect()
    }
}
