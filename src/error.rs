//! Error types for query construction and evaluation.

use thiserror::Error;

/// Errors surfaced by the query engine.
#[derive(Error, Debug)]
pub enum EqlError {
    /// `the(..)` saw more than one result.
    #[error("more than one solution found for a query that expects exactly one")]
    MultipleSolutionFound,

    /// `the(..)` saw zero results.
    #[error("no solution found for a query that expects exactly one")]
    NoSolutionFound,

    /// A quantification constraint was exceeded.
    #[error("more than {expected} solutions found")]
    TooManySolutions { expected: usize },

    /// A quantification constraint was not reached.
    #[error("found {found} solutions which is less than the expected {expected}")]
    TooFewSolutions { expected: usize, found: usize },

    /// An inconsistent quantification range such as `Range(AtLeast(3), AtMost(1))`.
    #[error("inconsistent quantification range: at_most {at_most} cannot be less than at_least {at_least}")]
    InconsistentQuantification { at_least: usize, at_most: usize },

    /// `not_` applied to a quantifier. Negate the conditions or the
    /// descriptor instead; negating a quantifier is ambiguous.
    #[error(
        "symbolic NOT on a quantifier is not allowed; negate the conditions instead, \
         e.g. `not_(condition)` rather than `not_(an(entity(.., condition)))`"
    )]
    UnsupportedNegation,

    /// Incorrect usage of the query language API.
    #[error("usage error: {0}")]
    Usage(String),

    /// A variable has neither a domain nor an instantiation path.
    #[error("cannot evaluate variable `{0}`: it has no domain and cannot be instantiated")]
    UnboundVariable(String),

    /// Attribute access on a value that does not carry the attribute.
    #[error("`{type_name}` has no attribute `{attribute}`")]
    MissingAttribute { type_name: String, attribute: String },

    /// Indexing a value that does not support the key.
    #[error("cannot index `{type_name}` with `{key}`")]
    InvalidIndex { type_name: String, key: String },

    /// Calling an unknown method on a value.
    #[error("`{type_name}` has no method `{method}`")]
    UnknownMethod { type_name: String, method: String },

    /// Ordering comparison between incompatible values.
    #[error("cannot compare `{left}` and `{right}` with `{op}`")]
    IncomparableValues { left: String, right: String, op: String },

    /// Containment check against a value that is neither a string nor a collection.
    #[error("`{0}` is not a container")]
    NotAContainer(String),

    /// A user predicate raised; the current assignment is dropped and the
    /// failure surfaces unchanged.
    #[error("predicate `{0}` failed: {1}")]
    PredicateFailure(String, String),

    /// A type name that was never registered with the symbol graph.
    #[error("unknown type `{0}`")]
    UnknownType(String),

    /// Construction of an instance with a field the type does not declare.
    #[error("type `{type_name}` does not declare field `{field}`")]
    UnknownField { type_name: String, field: String },

    /// Configuration loading failed.
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),
}

/// Result alias used across the engine.
pub type Result<T> = std::result::Result<T, EqlError>;
