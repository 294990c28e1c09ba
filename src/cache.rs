//! Memoization structures for the evaluator.
//!
//! Binary operators memoize their truth value under partial assignments in an
//! [`IndexedCache`]: a trie over a fixed, sorted key order with a wildcard
//! branch per level, plus a flat fallback store for outputs with no key
//! constraints. A [`SeenSet`] answers coverage queries ("has any previously
//! stored partial assignment entailed this one?") with an O(1) exact-match
//! path when every key is bound.

use std::collections::{HashMap, HashSet};

use crate::hashed::{HashedSet, HashedValue};
use crate::value::Value;

/// A (partial) assignment: node id to hashed value.
pub type Assignment = HashMap<u64, HashedValue>;

/// Coverage index over previously observed partial assignments.
///
/// An assignment is covered when a stored constraint is a subset of it. The
/// first probe with an empty assignment flips `all_seen` but still reports
/// "not covered", so the one-off insertion can happen.
#[derive(Debug, Default)]
pub struct SeenSet {
    keys: Vec<u64>,
    all_seen: bool,
    constraints: Vec<Assignment>,
    exact: HashSet<Vec<u64>>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the key order. Clears all recorded state.
    pub fn set_keys(&mut self, mut keys: Vec<u64>) {
        keys.sort_unstable();
        keys.dedup();
        self.keys = keys;
        self.clear();
    }

    pub fn keys(&self) -> &[u64] {
        &self.keys
    }

    /// Record a constraint. An empty constraint covers everything.
    pub fn add(&mut self, assignment: &Assignment) {
        if self.all_seen {
            return;
        }
        if assignment.is_empty() {
            self.all_seen = true;
            return;
        }
        if !self.keys.is_empty() && self.keys.iter().all(|k| assignment.contains_key(k)) {
            let tuple: Vec<u64> = self.keys.iter().map(|k| assignment[k].id).collect();
            self.exact.insert(tuple);
        }
        self.constraints.push(assignment.clone());
    }

    /// True if any stored constraint is a subset of the assignment.
    pub fn check(&mut self, assignment: &Assignment) -> bool {
        if self.all_seen {
            return true;
        }
        if assignment.is_empty() {
            self.all_seen = true;
            return false;
        }
        if self.exact_contains(assignment) {
            return true;
        }
        self.constraints.iter().any(|constraint| {
            constraint
                .iter()
                .all(|(k, v)| assignment.get(k).is_some_and(|w| w == v))
        })
    }

    /// O(1) membership test on the full key tuple; never scans constraints.
    pub fn exact_contains(&self, assignment: &Assignment) -> bool {
        if self.keys.is_empty() || !self.keys.iter().all(|k| assignment.contains_key(k)) {
            return false;
        }
        let tuple: Vec<u64> = self.keys.iter().map(|k| assignment[k].id).collect();
        self.exact.contains(&tuple)
    }

    pub fn clear(&mut self) {
        self.all_seen = false;
        self.constraints.clear();
        self.exact.clear();
    }
}

#[derive(Debug)]
enum TrieEntry {
    Node(TrieNode),
    Leaf(bool),
}

/// One trie level: concrete branches in insertion order plus a wildcard.
#[derive(Debug, Default)]
struct TrieNode {
    branches: indexmap::IndexMap<u64, (HashedValue, TrieEntry)>,
    wildcard: Option<Box<TrieEntry>>,
}

impl TrieNode {
    fn is_empty(&self) -> bool {
        self.branches.is_empty() && self.wildcard.is_none()
    }
}

/// Trie + flat store memoizing a node's truth value under partial assignments.
#[derive(Debug, Default)]
pub struct IndexedCache {
    seen: SeenSet,
    root: TrieNode,
    flat: HashedSet,
}

impl IndexedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the sorted key order for this cache. Clears all state.
    pub fn set_keys(&mut self, keys: Vec<u64>) {
        self.seen.set_keys(keys);
        self.root = TrieNode::default();
        self.flat.clear();
    }

    pub fn keys(&self) -> &[u64] {
        self.seen.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty() && self.flat.is_empty()
    }

    /// Insert an output under the given partial assignment. Keys missing from
    /// the assignment are stored under the wildcard branch.
    pub fn insert(&mut self, assignment: &Assignment, output: bool, indexed: bool) {
        if !indexed || assignment.is_empty() {
            self.flat.add(HashedValue::new(Value::Bool(output)));
            return;
        }
        self.seen.add(assignment);

        let keys = self.seen.keys.clone();
        let last = keys.len().saturating_sub(1);
        let mut node = &mut self.root;
        for (idx, key) in keys.iter().enumerate() {
            let value = assignment.get(key);
            if idx < last {
                let entry: &mut TrieEntry = match value {
                    Some(v) => {
                        let slot = node
                            .branches
                            .entry(v.id)
                            .or_insert_with(|| (v.clone(), TrieEntry::Node(TrieNode::default())));
                        &mut slot.1
                    }
                    None => node
                        .wildcard
                        .get_or_insert_with(|| Box::new(TrieEntry::Node(TrieNode::default())))
                        .as_mut(),
                };
                // Overwrite a previously stored leaf with a deeper node.
                if matches!(entry, TrieEntry::Leaf(_)) {
                    *entry = TrieEntry::Node(TrieNode::default());
                }
                node = match entry {
                    TrieEntry::Node(n) => n,
                    TrieEntry::Leaf(_) => unreachable!(),
                };
            } else {
                match value {
                    Some(v) => {
                        node.branches.insert(v.id, (v.clone(), TrieEntry::Leaf(output)));
                    }
                    None => {
                        node.wildcard = Some(Box::new(TrieEntry::Leaf(output)));
                    }
                }
            }
        }
    }

    /// Coverage check through the seen set.
    pub fn check(&mut self, assignment: &Assignment) -> bool {
        self.seen.check(assignment)
    }

    /// Retrieve `(resolved assignment, output)` pairs matching a partial
    /// assignment. Bound keys descend their branch (falling back to the
    /// wildcard); unbound keys prefer the wildcard, otherwise enumerate all
    /// branches while recording the chosen value.
    pub fn retrieve(&self, assignment: &Assignment) -> Vec<(Assignment, bool)> {
        let mut out = Vec::new();
        if self.seen.keys.is_empty() || self.root.is_empty() {
            return out;
        }
        self.walk(&self.root, 0, assignment, assignment.clone(), &mut out);
        out
    }

    fn walk(
        &self,
        node: &TrieNode,
        idx: usize,
        assignment: &Assignment,
        acc: Assignment,
        out: &mut Vec<(Assignment, bool)>,
    ) {
        let key = self.seen.keys[idx];
        if let Some(bound) = assignment.get(&key) {
            if let Some((_, entry)) = node.branches.get(&bound.id) {
                self.descend(entry, idx, assignment, acc, out);
            } else if let Some(wildcard) = &node.wildcard {
                self.descend(wildcard, idx, assignment, acc, out);
            }
        } else if let Some(wildcard) = &node.wildcard {
            self.descend(wildcard, idx, assignment, acc, out);
        } else {
            for (_, (value, entry)) in &node.branches {
                let mut local = acc.clone();
                local.insert(key, value.clone());
                self.descend(entry, idx, assignment, local, out);
            }
        }
    }

    fn descend(
        &self,
        entry: &TrieEntry,
        idx: usize,
        assignment: &Assignment,
        acc: Assignment,
        out: &mut Vec<(Assignment, bool)>,
    ) {
        match entry {
            TrieEntry::Leaf(output) => out.push((acc, *output)),
            TrieEntry::Node(next) => {
                if idx + 1 < self.seen.keys.len() {
                    self.walk(next, idx + 1, assignment, acc, out);
                }
            }
        }
    }

    /// Drop the trie, the coverage index and the flat store; keys survive.
    pub fn clear(&mut self) {
        self.root = TrieNode::default();
        self.flat.clear();
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hv(i: i64) -> HashedValue {
        HashedValue::new(Value::from(i))
    }

    fn asg(pairs: &[(u64, i64)]) -> Assignment {
        pairs.iter().map(|(k, v)| (*k, hv(*v))).collect()
    }

    #[test]
    fn insert_then_probe_with_superset_matches() {
        let mut cache = IndexedCache::new();
        cache.set_keys(vec![1, 2]);
        let a = asg(&[(1, 10), (2, 20)]);
        cache.insert(&a, false, true);
        assert!(cache.check(&a));
        let mut superset = a.clone();
        superset.insert(3, hv(30));
        assert!(cache.check(&superset));
        let results = cache.retrieve(&superset);
        assert_eq!(results.len(), 1);
        assert!(!results[0].1);
    }

    #[test]
    fn missing_keys_become_wildcards() {
        let mut cache = IndexedCache::new();
        cache.set_keys(vec![1, 2]);
        cache.insert(&asg(&[(1, 10)]), true, true);
        // Probing with key 2 bound to anything still matches the wildcard.
        let probe = asg(&[(1, 10), (2, 99)]);
        let results = cache.retrieve(&probe);
        assert_eq!(results.len(), 1);
        assert!(results[0].1);
    }

    #[test]
    fn unbound_key_enumerates_branches() {
        let mut cache = IndexedCache::new();
        cache.set_keys(vec![1, 2]);
        cache.insert(&asg(&[(1, 10), (2, 20)]), true, true);
        cache.insert(&asg(&[(1, 10), (2, 21)]), false, true);
        let probe = asg(&[(1, 10)]);
        let results = cache.retrieve(&probe);
        assert_eq!(results.len(), 2);
        // The chosen value for key 2 is recorded in the resolved assignment.
        assert!(results.iter().all(|(resolved, _)| resolved.contains_key(&2)));
    }

    #[test]
    fn first_empty_probe_flips_but_reports_uncovered() {
        let mut seen = SeenSet::new();
        let empty = Assignment::new();
        assert!(!seen.check(&empty));
        assert!(seen.check(&empty));
        assert!(seen.check(&asg(&[(1, 1)])));
    }

    #[test]
    fn unindexed_outputs_go_to_the_flat_store() {
        let mut cache = IndexedCache::new();
        cache.set_keys(vec![1]);
        cache.insert(&Assignment::new(), true, true);
        assert!(cache.retrieve(&asg(&[(1, 5)])).is_empty());
        assert!(!cache.is_empty());
    }

    #[test]
    fn clear_keeps_keys() {
        let mut cache = IndexedCache::new();
        cache.set_keys(vec![4, 7]);
        cache.insert(&asg(&[(4, 1), (7, 2)]), true, true);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.keys(), &[4, 7]);
    }
}
