//! Symbol graph: the process-wide registry of types, instances and relations.
//!
//! The symbolic core consumes a small surface: enumerate instances of a type
//! (optionally including subtypes), insert instances and relations, and read
//! the declared field order of a type (the cache key order for construction
//! by keyword arguments). Everything else — persistence, RDF, SQL — is out of
//! scope.
//!
//! A process-wide default graph exists ([`SymbolGraph::global`]); sessions
//! may scope a different graph for isolation (tests do).

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::error::{EqlError, Result};
use crate::ids::next_id;
use crate::value::{Instance, Value};

/// Handle to a registered type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(u32);

impl TypeId {
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Evaluates a predicate instance to its truth value.
pub type PredicateFn = Arc<dyn Fn(&SymbolGraph, &Instance) -> Result<bool> + Send + Sync>;

/// A method registered on a type, callable from queries.
pub type MethodFn = Arc<dyn Fn(&SymbolGraph, &Instance, &[Value]) -> Result<Value> + Send + Sync>;

struct TypeInfo {
    name: Arc<str>,
    parent: Option<TypeId>,
    fields: Vec<String>,
    predicate: Option<PredicateFn>,
    methods: IndexMap<String, MethodFn>,
    /// Whether instance caches for this type are trie-indexed by constructor
    /// arguments rather than kept flat.
    indexed: bool,
}

/// A directed, labelled relation between two values.
#[derive(Debug, Clone)]
pub struct Relation {
    pub source: Value,
    pub target: Value,
    pub kind: String,
    pub inferred: bool,
}

/// In-memory symbol graph.
pub struct SymbolGraph {
    types: RwLock<Vec<TypeInfo>>,
    by_name: RwLock<IndexMap<String, TypeId>>,
    /// Per-type instance buckets, keyed by the direct type index.
    instances: DashMap<u32, Vec<Value>>,
    relations: RwLock<Vec<Relation>>,
    has_type: OnceLock<TypeId>,
}

impl Default for SymbolGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolGraph {
    pub fn new() -> Self {
        SymbolGraph {
            types: RwLock::new(Vec::new()),
            by_name: RwLock::new(IndexMap::new()),
            instances: DashMap::new(),
            relations: RwLock::new(Vec::new()),
            has_type: OnceLock::new(),
        }
    }

    /// The process-wide default graph.
    pub fn global() -> Arc<SymbolGraph> {
        static GLOBAL: OnceLock<Arc<SymbolGraph>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(SymbolGraph::new())).clone()
    }

    /// Register a type with its declared field order.
    pub fn define_type(&self, name: &str, parent: Option<TypeId>, fields: &[&str]) -> TypeId {
        self.define(name, parent, fields, None, false)
    }

    /// Register a predicate type. Constructing it symbolically yields a
    /// variable that instantiates and immediately evaluates to a truth value.
    pub fn define_predicate(&self, name: &str, fields: &[&str], predicate: PredicateFn) -> TypeId {
        self.define(name, None, fields, Some(predicate), false)
    }

    /// Register an expensive predicate whose instance cache is trie-indexed
    /// by constructor arguments.
    pub fn define_indexed_predicate(&self, name: &str, fields: &[&str], predicate: PredicateFn) -> TypeId {
        self.define(name, None, fields, Some(predicate), true)
    }

    fn define(
        &self,
        name: &str,
        parent: Option<TypeId>,
        fields: &[&str],
        predicate: Option<PredicateFn>,
        indexed: bool,
    ) -> TypeId {
        let mut types = self.types.write();
        let id = TypeId(types.len() as u32);
        // Inherit parent fields ahead of the type's own.
        let mut all_fields: Vec<String> = parent
            .map(|p| types[p.0 as usize].fields.clone())
            .unwrap_or_default();
        for f in fields {
            if !all_fields.iter().any(|existing| existing == f) {
                all_fields.push((*f).to_string());
            }
        }
        types.push(TypeInfo {
            name: Arc::from(name),
            parent,
            fields: all_fields,
            predicate,
            methods: IndexMap::new(),
            indexed,
        });
        self.by_name.write().insert(name.to_string(), id);
        id
    }

    /// Register a callable method on a type.
    pub fn define_method(&self, ty: TypeId, name: &str, method: MethodFn) {
        self.types.write()[ty.0 as usize].methods.insert(name.to_string(), method);
    }

    /// Look a type up by name.
    pub fn type_by_name(&self, name: &str) -> Result<TypeId> {
        self.by_name
            .read()
            .get(name)
            .copied()
            .ok_or_else(|| EqlError::UnknownType(name.to_string()))
    }

    pub fn type_name(&self, ty: TypeId) -> Arc<str> {
        self.types.read()[ty.0 as usize].name.clone()
    }

    pub(crate) fn is_indexed(&self, ty: TypeId) -> bool {
        self.types.read()[ty.0 as usize].indexed
    }

    pub(crate) fn is_predicate(&self, ty: TypeId) -> bool {
        self.types.read()[ty.0 as usize].predicate.is_some()
    }

    /// Sorted field names of a type; the cache key order for construction by
    /// keyword arguments.
    pub fn keys_of(&self, ty: TypeId) -> Vec<String> {
        let mut fields = self.types.read()[ty.0 as usize].fields.clone();
        fields.sort();
        fields
    }

    /// Declared field order of a type.
    pub fn fields_of(&self, ty: TypeId) -> Vec<String> {
        self.types.read()[ty.0 as usize].fields.clone()
    }

    /// Construct an instance and insert it into the per-type registry.
    /// Missing declared fields default to `Null`; unknown fields error.
    pub fn create(&self, ty: TypeId, fields: Vec<(&str, Value)>) -> Result<Value> {
        let instance = self.build_instance(ty, fields)?;
        let value = Value::Object(Arc::new(instance));
        self.insert(&value);
        Ok(value)
    }

    /// Construct an instance without inserting it (predicate evaluation).
    pub(crate) fn build_instance(&self, ty: TypeId, fields: Vec<(&str, Value)>) -> Result<Instance> {
        let types = self.types.read();
        let info = &types[ty.0 as usize];
        let mut map: IndexMap<String, Value> = info.fields.iter().map(|f| (f.clone(), Value::Null)).collect();
        for (name, value) in fields {
            if !map.contains_key(name) {
                return Err(EqlError::UnknownField {
                    type_name: info.name.to_string(),
                    field: name.to_string(),
                });
            }
            map.insert(name.to_string(), value);
        }
        Ok(Instance::new(next_id(), ty, info.name.clone(), map))
    }

    /// Insert an instance value into its type's bucket.
    pub fn insert(&self, value: &Value) {
        if let Value::Object(o) = value {
            self.instances.entry(o.type_id.0).or_default().push(value.clone());
        }
    }

    /// Lazy snapshot of the instances of a type. Readers see the bucket
    /// contents as of the call; concurrent inserts land in later snapshots.
    pub fn instances_of(&self, ty: TypeId, include_subtypes: bool) -> Vec<Value> {
        let mut out = Vec::new();
        if include_subtypes {
            let count = self.types.read().len() as u32;
            for idx in 0..count {
                if self.is_subtype(TypeId(idx), ty) {
                    if let Some(bucket) = self.instances.get(&idx) {
                        out.extend(bucket.iter().cloned());
                    }
                }
            }
        } else if let Some(bucket) = self.instances.get(&ty.0) {
            out.extend(bucket.iter().cloned());
        }
        out
    }

    /// Record a relation between two values.
    pub fn insert_relation(&self, source: Value, target: Value, kind: &str) {
        self.add_relation(Relation { source, target, kind: kind.to_string(), inferred: false });
    }

    pub fn add_relation(&self, relation: Relation) {
        self.relations.write().push(relation);
    }

    /// Snapshot of all recorded relations.
    pub fn relations(&self) -> Vec<Relation> {
        self.relations.read().clone()
    }

    /// Whether `sub` is `sup` or a descendant of it.
    pub fn is_subtype(&self, sub: TypeId, sup: TypeId) -> bool {
        let types = self.types.read();
        let mut current = Some(sub);
        while let Some(ty) = current {
            if ty == sup {
                return true;
            }
            current = types[ty.0 as usize].parent;
        }
        false
    }

    /// Whether a value is an instance of the type (or a subtype).
    pub fn instance_of(&self, value: &Value, ty: TypeId) -> bool {
        match value {
            Value::Object(o) => self.is_subtype(o.type_id, ty),
            _ => false,
        }
    }

    /// Evaluate the predicate registered for the instance's type.
    pub(crate) fn invoke_predicate(&self, instance: &Instance) -> Result<bool> {
        let predicate = {
            let types = self.types.read();
            types[instance.type_id.0 as usize].predicate.clone()
        };
        match predicate {
            Some(f) => f(self, instance),
            None => Err(EqlError::PredicateFailure(
                instance.type_name.to_string(),
                "type has no predicate".to_string(),
            )),
        }
    }

    /// Call a method registered on the instance's type, walking up parents.
    pub(crate) fn call_method(&self, instance: &Instance, name: &str, args: &[Value]) -> Result<Value> {
        let method = {
            let types = self.types.read();
            let mut current = Some(instance.type_id);
            let mut found = None;
            while let Some(ty) = current {
                let info = &types[ty.0 as usize];
                if let Some(m) = info.methods.get(name) {
                    found = Some(m.clone());
                    break;
                }
                current = info.parent;
            }
            found
        };
        match method {
            Some(f) => f(self, instance, args),
            None => Err(EqlError::UnknownMethod {
                type_name: instance.type_name.to_string(),
                method: name.to_string(),
            }),
        }
    }

    /// The built-in `HasType` predicate type: holds when its `value` argument
    /// is an instance of its `type` argument (subtypes included).
    pub fn has_type_predicate(&self) -> TypeId {
        *self.has_type.get_or_init(|| {
            self.define_predicate(
                "HasType",
                &["value", "type"],
                Arc::new(|graph, instance| {
                    let value = instance.get("value").unwrap_or(Value::Null);
                    match instance.get("type") {
                        Some(Value::Type(ty)) => Ok(graph.instance_of(&value, ty)),
                        _ => Err(EqlError::PredicateFailure(
                            "HasType".to_string(),
                            "missing type argument".to_string(),
                        )),
                    }
                }),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtype_instances_are_enumerated() {
        let graph = SymbolGraph::new();
        let body = graph.define_type("Body", None, &["name"]);
        let handle = graph.define_type("Handle", Some(body), &[]);
        graph.create(handle, vec![("name", Value::from("Handle1"))]).unwrap();
        graph.create(body, vec![("name", Value::from("Body1"))]).unwrap();
        assert_eq!(graph.instances_of(body, true).len(), 2);
        assert_eq!(graph.instances_of(handle, true).len(), 1);
        assert_eq!(graph.instances_of(body, false).len(), 1);
    }

    #[test]
    fn keys_of_are_sorted_and_inherited() {
        let graph = SymbolGraph::new();
        let body = graph.define_type("Body", None, &["name", "size"]);
        let conn = graph.define_type("Connection", Some(body), &["parent", "child"]);
        assert_eq!(graph.keys_of(conn), vec!["child", "name", "parent", "size"]);
        assert_eq!(graph.fields_of(conn), vec!["name", "size", "parent", "child"]);
    }

    #[test]
    fn has_type_checks_subtypes() {
        let graph = SymbolGraph::new();
        let body = graph.define_type("Body", None, &[]);
        let handle = graph.define_type("Handle", Some(body), &[]);
        let h = graph.create(handle, vec![]).unwrap();
        assert!(graph.instance_of(&h, body));
        let pred = graph.has_type_predicate();
        let inst = graph
            .build_instance(pred, vec![("value", h), ("type", Value::Type(body))])
            .unwrap();
        assert!(graph.invoke_predicate(&inst).unwrap());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let graph = SymbolGraph::new();
        let body = graph.define_type("Body", None, &["name"]);
        let err = graph.create(body, vec![("bogus", Value::Null)]).unwrap_err();
        assert!(matches!(err, EqlError::UnknownField { .. }));
    }
}
