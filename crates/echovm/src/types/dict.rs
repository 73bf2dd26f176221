//! Insertion-ordered dict and set storage.

use indexmap::IndexMap;

use crate::value::{DictKey, Value};

type OrderedMap<V> = IndexMap<DictKey, V, ahash::RandomState>;

/// Guest dict preserving insertion order.
///
/// Entries are keyed by the normalized [`DictKey`] but remember the original
/// key value, so `{1: 'a'}` keeps `1` while a later `d[1.0] = 'b'` replaces
/// the value without changing the stored key (matching the modeled language).
#[derive(Debug, Clone, Default)]
pub(crate) struct Dict {
    entries: OrderedMap<(Value, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &DictKey) -> Option<&Value> {
        self.entries.get(key).map(|(_, v)| v)
    }

    /// Looks up a string key without building a [`DictKey`] by hand.
    pub fn get_str(&self, key: &str) -> Option<&Value> {
        self.get(&DictKey::Str(key.into()))
    }

    pub fn contains(&self, key: &DictKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts or replaces, returning the previous value.
    pub fn insert(&mut self, key: DictKey, key_value: Value, value: Value) -> Option<Value> {
        match self.entries.get_mut(&key) {
            Some(slot) => Some(std::mem::replace(&mut slot.1, value)),
            None => {
                self.entries.insert(key, (key_value, value));
                None
            }
        }
    }

    /// Removes an entry, keeping the order of the remaining ones.
    pub fn remove(&mut self, key: &DictKey) -> Option<(Value, Value)> {
        self.entries.shift_remove(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entry at insertion position `index`, used by live dict iterators.
    pub fn key_at(&self, index: usize) -> Option<&Value> {
        self.entries.get_index(index).map(|(_, (k, _))| k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.values().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.values().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.values().map(|(_, v)| v)
    }

    pub fn dict_keys(&self) -> impl Iterator<Item = &DictKey> {
        self.entries.keys()
    }
}

/// Guest set preserving insertion order.
#[derive(Debug, Clone, Default)]
pub(crate) struct Set {
    members: OrderedMap<Value>,
}

impl Set {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, key: &DictKey) -> bool {
        self.members.contains_key(key)
    }

    /// Adds a member; returns false if an equal member was already present.
    pub fn add(&mut self, key: DictKey, value: Value) -> bool {
        if self.members.contains_key(&key) {
            return false;
        }
        self.members.insert(key, value);
        true
    }

    pub fn remove(&mut self, key: &DictKey) -> Option<Value> {
        self.members.shift_remove(key)
    }

    pub fn pop_last(&mut self) -> Option<Value> {
        self.members.pop().map(|(_, v)| v)
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }

    pub fn member_at(&self, index: usize) -> Option<&Value> {
        self.members.get_index(index).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.members.values()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&DictKey, &Value)> {
        self.members.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_keys_collapse_but_keep_first_key_value() {
        let mut dict = Dict::new();
        dict.insert(DictKey::Int(1), Value::Int(1), Value::str("a"));
        let previous = dict.insert(DictKey::Int(1), Value::Float(1.0), Value::str("b"));
        assert!(previous.is_some());
        assert_eq!(dict.len(), 1);
        let (key, value) = dict.iter().next().unwrap();
        assert!(matches!(key, Value::Int(1)));
        assert!(matches!(value, Value::Str(s) if &**s == "b"));
    }

    #[test]
    fn removal_preserves_order() {
        let mut set = Set::new();
        for i in 0..4 {
            set.add(DictKey::Int(i), Value::Int(i));
        }
        set.remove(&DictKey::Int(1));
        let order: Vec<_> = set.iter().map(|v| v.as_int().unwrap()).collect();
        assert_eq!(order, vec![0, 2, 3]);
    }
}
