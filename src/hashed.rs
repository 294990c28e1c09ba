//! Stable-identity value wrappers.
//!
//! Evaluation passes values around as `HashedValue`s: the value itself plus a
//! stable integer identity. Equality and hashing go through the id, which
//! makes assignments and cache keys cheap and collapses duplicates. Booleans
//! are interned with the fixed ids 0 and 1; object values carry their
//! instance oid; plain data derives a content id in a tagged id space.
//!
//! The wildcard sentinel [`HashedValue::ANY`] compares equal to every hashed
//! value and encodes "key absent" inside cache tries.

use std::hash::{Hash, Hasher};

use indexmap::IndexMap;

use crate::ids::{content_id, ANY_ID, FALSE_ID, TRUE_ID};
use crate::value::Value;

/// A value plus its stable identity.
#[derive(Debug, Clone)]
pub struct HashedValue {
    pub id: u64,
    pub value: Value,
}

impl HashedValue {
    /// Wildcard sentinel: equal to every hashed value.
    pub const ANY: HashedValue = HashedValue { id: ANY_ID, value: Value::Null };

    /// Wrap a value, deriving its identity.
    pub fn new(value: Value) -> Self {
        match &value {
            Value::Bool(b) => Self::truth(*b),
            Value::Object(o) => HashedValue { id: o.oid, value },
            _ => {
                let id = content_id(value.content_hash());
                HashedValue { id, value }
            }
        }
    }

    /// Wrap a value under an explicit identity (attribute/index propagation).
    pub fn with_id(id: u64, value: Value) -> Self {
        HashedValue { id, value }
    }

    /// The interned boolean values.
    pub fn truth(b: bool) -> Self {
        if b {
            HashedValue { id: TRUE_ID, value: Value::Bool(true) }
        } else {
            HashedValue { id: FALSE_ID, value: Value::Bool(false) }
        }
    }

    pub fn is_any(&self) -> bool {
        self.id == ANY_ID
    }
}

impl PartialEq for HashedValue {
    fn eq(&self, other: &Self) -> bool {
        if self.id == ANY_ID || other.id == ANY_ID {
            return true;
        }
        self.id == other.id
    }
}

impl Eq for HashedValue {}

impl Hash for HashedValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Insertion-ordered set of hashed values keyed by identity.
#[derive(Debug, Clone, Default)]
pub struct HashedSet {
    values: IndexMap<u64, HashedValue>,
}

impl HashedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value; duplicates by id collapse to the first insertion.
    pub fn add(&mut self, value: HashedValue) {
        self.values.entry(value.id).or_insert(value);
    }

    pub fn extend<I: IntoIterator<Item = HashedValue>>(&mut self, iter: I) {
        for v in iter {
            self.add(v);
        }
    }

    pub fn get(&self, id: u64) -> Option<&HashedValue> {
        self.values.get(&id)
    }

    pub fn contains_id(&self, id: u64) -> bool {
        self.values.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &HashedValue> {
        self.values.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.values.keys().copied()
    }

    pub fn union(&self, other: &HashedSet) -> HashedSet {
        let mut out = self.clone();
        out.extend(other.iter().cloned());
        out
    }

    pub fn intersection(&self, other: &HashedSet) -> HashedSet {
        let mut out = HashedSet::new();
        for (id, v) in &self.values {
            if other.values.contains_key(id) {
                out.add(v.clone());
            }
        }
        out
    }

    pub fn difference(&self, other: &HashedSet) -> HashedSet {
        let mut out = HashedSet::new();
        for (id, v) in &self.values {
            if !other.values.contains_key(id) {
                out.add(v.clone());
            }
        }
        out
    }

    pub fn filter(&self, mut pred: impl FnMut(&HashedValue) -> bool) -> HashedSet {
        let mut out = HashedSet::new();
        for v in self.iter() {
            if pred(v) {
                out.add(v.clone());
            }
        }
        out
    }
}

impl FromIterator<HashedValue> for HashedSet {
    fn from_iter<I: IntoIterator<Item = HashedValue>>(iter: I) -> Self {
        let mut set = HashedSet::new();
        set.extend(iter);
        set
    }
}
