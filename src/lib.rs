//! # EntiQL
//!
//! A symbolic entity query language engine: a declarative query and rule
//! layer over in-memory object graphs. Declare typed variables whose domains
//! come from an explicit iterable or the process-wide symbol graph, compose
//! conditions by attribute access, comparison, containment, logical
//! connectives and quantifiers, and submit the whole as a query or a rule.
//! The engine lazily produces assignments of variables to concrete values;
//! rules additionally materialize newly inferred instances and relations
//! back into the symbol graph.
//!
//! ## Pipeline
//!
//! ```text
//! Symbolic construction (symbolic_mode / rule_mode)
//!     ↓
//! Expression tree            → arena of tagged nodes
//!     ↓
//! evaluate()                 → lazy generators with per-node dedup
//!     ↓                        and indexed caches
//! Quantifier (an / the)      → user-visible results
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use entiql::*;
//!
//! let graph = std::sync::Arc::new(SymbolGraph::new());
//! let body_ty = graph.define_type("Body", None, &["name"]);
//! let bodies = vec![
//!     graph.create(body_ty, vec![("name", Value::from("Handle1"))])?,
//!     graph.create(body_ty, vec![("name", Value::from("Container1"))])?,
//! ];
//!
//! let handles: Vec<Value> = with_graph(&graph, || {
//!     symbolic_mode(|| {
//!         let body = let_(body_ty, bodies.clone());
//!         an(entity(body, vec![contains(body.attr("name"), "Handle")]))
//!     })
//! })
//! .evaluate_values()
//! .collect::<Result<_>>()?;
//! ```
//!
//! ## Module organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `value` | Dynamic value union and typed instances |
//! | `hashed` | Stable-identity wrappers and sets |
//! | `cache` | Indexed caches and coverage indices |
//! | `expr` | Expression arena and the lazy evaluator |
//! | `graph` | Symbol graph: types, instances, relations |
//! | `session` | Thread-scoped construction context |
//! | `rule` | Conclusions and rule-tree builders |
//! | `dsl` | The query vocabulary |

pub mod cache;
pub mod config;
pub mod dsl;
pub mod error;
pub mod graph;
pub mod hashed;
pub mod value;

mod expr;
mod ids;
mod rule;
mod session;

// The query vocabulary.
pub use dsl::{
    a, an, an_with, and_, construct, contains, entity, exists, flatten, for_all, has_type, in_,
    let_, let_named, lit, not_, or_, set_of, the, DomainArg, Operand,
};

// Rule mode.
pub use rule::{add, alternative, infer, next_rule, refinement, set_};

// Construction scopes.
pub use session::{
    in_symbolic_mode, rule_mode, rule_mode_for, symbolic_mode, with_config, with_graph, Mode,
};

// Core types.
pub use cache::{Assignment, IndexedCache, SeenSet};
pub use config::EngineConfig;
pub use error::{EqlError, Result};
pub use expr::quantifier::{Quantification, Query, Solution, Solutions, UniqueQuery};
pub use expr::Expr;
pub use graph::{MethodFn, PredicateFn, Relation, SymbolGraph, TypeId};
pub use hashed::{HashedSet, HashedValue};
pub use value::{Instance, Value};
