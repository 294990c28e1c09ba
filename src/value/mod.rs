//! # Value model
//!
//! Dynamic value union consumed by the symbolic core. Queries range over
//! `Value`s: plain data (booleans, numbers, strings, lists) and typed
//! `Instance` records registered in the symbol graph. The reflection surface
//! the evaluator needs is small: attribute access, indexing, method calls,
//! iteration, containment, ordering and truthiness.
//!
//! Containment is kept split on purpose: on strings it means substring, on
//! lists it means membership.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::error::{EqlError, Result};
use crate::graph::TypeId;

/// A dynamically typed value.
///
/// Cloning is cheap: strings, lists and objects are reference counted.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    List(Arc<Vec<Value>>),
    Object(Arc<Instance>),
    /// A registered type, used as a predicate argument (e.g. `HasType`).
    Type(TypeId),
}

/// A typed record living in the symbol graph.
///
/// Fields are stored in declaration order and may be updated after creation
/// (rule conclusions write through `set`). Structural equality first compares
/// object identity (`oid`), so shared sub-objects cut recursion short; cyclic
/// object graphs must share instances for equality to terminate.
pub struct Instance {
    pub oid: u64,
    pub type_id: TypeId,
    pub type_name: Arc<str>,
    fields: RwLock<IndexMap<String, Value>>,
}

impl Instance {
    pub(crate) fn new(oid: u64, type_id: TypeId, type_name: Arc<str>, fields: IndexMap<String, Value>) -> Self {
        Instance { oid, type_id, type_name, fields: RwLock::new(fields) }
    }

    /// Read a field by name.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.fields.read().get(name).cloned()
    }

    /// Write a field by name. Returns false if the field is not declared.
    pub fn set(&self, name: &str, value: Value) -> bool {
        let mut fields = self.fields.write();
        if let Some(slot) = fields.get_mut(name) {
            *slot = value;
            true
        } else {
            false
        }
    }

    /// Snapshot of the fields in declaration order.
    pub fn fields(&self) -> Vec<(String, Value)> {
        self.fields.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("oid", &self.oid)
            .field("type", &self.type_name)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        if self.oid == other.oid {
            return true;
        }
        if self.type_id != other.type_id {
            return false;
        }
        let left = self.fields.read();
        let right = other.fields.read();
        if left.len() != right.len() {
            return false;
        }
        left.iter().all(|(k, v)| right.get(k).is_some_and(|w| v == w))
    }
}

impl Value {
    /// Short name of the value's runtime type, for error messages.
    pub fn type_name(&self) -> String {
        match self {
            Value::Null => "Null".into(),
            Value::Bool(_) => "Bool".into(),
            Value::Int(_) => "Int".into(),
            Value::Float(_) => "Float".into(),
            Value::Str(_) => "Str".into(),
            Value::List(_) => "List".into(),
            Value::Object(o) => o.type_name.to_string(),
            Value::Type(_) => "Type".into(),
        }
    }

    /// Truthiness, mirroring dynamic-language conventions: `Null` and empty
    /// containers are false, numbers compare against zero, objects are true.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Object(_) | Value::Type(_) => true,
        }
    }

    /// Attribute access. Only objects carry attributes.
    pub fn get_attr(&self, name: &str) -> Result<Value> {
        match self {
            Value::Object(o) => o.get(name).ok_or_else(|| EqlError::MissingAttribute {
                type_name: o.type_name.to_string(),
                attribute: name.to_string(),
            }),
            other => Err(EqlError::MissingAttribute {
                type_name: other.type_name(),
                attribute: name.to_string(),
            }),
        }
    }

    /// Indexing: lists by integer position, objects by field name.
    pub fn index(&self, key: &Value) -> Result<Value> {
        match (self, key) {
            (Value::List(items), Value::Int(i)) => {
                let idx = usize::try_from(*i).ok();
                idx.and_then(|i| items.get(i).cloned()).ok_or_else(|| EqlError::InvalidIndex {
                    type_name: self.type_name(),
                    key: key.render(),
                })
            }
            (Value::Object(_), Value::Str(name)) => self.get_attr(name),
            _ => Err(EqlError::InvalidIndex { type_name: self.type_name(), key: key.render() }),
        }
    }

    /// Built-in methods on plain data. Object methods are dispatched through
    /// the symbol graph by the evaluator.
    pub fn call_builtin(&self, method: &str, args: &[Value]) -> Result<Value> {
        let unknown = || EqlError::UnknownMethod { type_name: self.type_name(), method: method.to_string() };
        match self {
            Value::Str(s) => match (method, args) {
                ("starts_with", [Value::Str(p)]) => Ok(Value::Bool(s.starts_with(p.as_ref()))),
                ("ends_with", [Value::Str(p)]) => Ok(Value::Bool(s.ends_with(p.as_ref()))),
                ("contains", [Value::Str(p)]) => Ok(Value::Bool(s.contains(p.as_ref()))),
                ("len", []) => Ok(Value::Int(s.len() as i64)),
                ("is_empty", []) => Ok(Value::Bool(s.is_empty())),
                ("lower", []) => Ok(Value::from(s.to_lowercase())),
                ("upper", []) => Ok(Value::from(s.to_uppercase())),
                ("trim", []) => Ok(Value::from(s.trim().to_string())),
                _ => Err(unknown()),
            },
            Value::List(items) => match (method, args) {
                ("len", []) => Ok(Value::Int(items.len() as i64)),
                ("is_empty", []) => Ok(Value::Bool(items.is_empty())),
                ("contains", [item]) => Ok(Value::Bool(items.iter().any(|v| v == item))),
                _ => Err(unknown()),
            },
            _ => Err(unknown()),
        }
    }

    /// Whether the value enumerates items. Strings are deliberately not
    /// iterable here.
    pub fn is_iterable(&self) -> bool {
        matches!(self, Value::List(_))
    }

    /// Items of an iterable value, or `None` when the value is not iterable.
    pub fn iter_items(&self) -> Option<Vec<Value>> {
        match self {
            Value::List(items) => Some(items.as_ref().clone()),
            _ => None,
        }
    }

    /// Containment: substring on strings, membership on lists.
    pub fn contains_value(&self, item: &Value) -> Result<bool> {
        match (self, item) {
            (Value::Str(s), Value::Str(sub)) => Ok(s.contains(sub.as_ref())),
            (Value::List(items), _) => Ok(items.iter().any(|v| v == item)),
            _ => Err(EqlError::NotAContainer(self.type_name())),
        }
    }

    /// Ordering for `< <= > >=`. Numbers compare across `Int`/`Float`,
    /// strings compare lexicographically; everything else is incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Stable hash of the value content, used to derive identity for plain
    /// data. Objects hash by their oid.
    pub(crate) fn content_hash(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.feed(&mut hasher);
        hasher.finish()
    }

    fn feed<H: Hasher>(&self, hasher: &mut H) {
        match self {
            Value::Null => 0u8.hash(hasher),
            Value::Bool(b) => (1u8, b).hash(hasher),
            Value::Int(i) => (2u8, i).hash(hasher),
            Value::Float(f) => (3u8, f.to_bits()).hash(hasher),
            Value::Str(s) => (4u8, s.as_ref()).hash(hasher),
            Value::List(items) => {
                5u8.hash(hasher);
                items.len().hash(hasher);
                for item in items.iter() {
                    item.feed(hasher);
                }
            }
            Value::Object(o) => (6u8, o.oid).hash(hasher),
            Value::Type(t) => (7u8, t.index()).hash(hasher),
        }
    }

    /// Compact display used in error messages and logs.
    pub fn render(&self) -> String {
        match self {
            Value::Null => "null".into(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => format!("{s:?}"),
            Value::List(items) => {
                let inner: Vec<String> = items.iter().map(Value::render).collect();
                format!("[{}]", inner.join(", "))
            }
            Value::Object(o) => format!("{}#{}", o.type_name, o.oid),
            Value::Type(t) => format!("type#{}", t.index()),
        }
    }

    /// The inner instance, when the value is an object.
    pub fn as_object(&self) -> Option<&Arc<Instance>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b || a.to_bits() == b.to_bits(),
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Type(a), Value::Type(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

// Objects serialize shallowly (type + oid) so cyclic object graphs stay
// serializable.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Str(s) => serializer.serialize_str(s),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(o) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("type", o.type_name.as_ref())?;
                map.serialize_entry("oid", &o.oid)?;
                map.end()
            }
            Value::Type(t) => serializer.serialize_str(&format!("type#{}", t.index())),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s.as_str()))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(Arc::new(items))
    }
}
