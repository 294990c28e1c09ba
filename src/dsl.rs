//! The user-facing query vocabulary.
//!
//! Queries are assembled from a small set of builders:
//!
//! ```ignore
//! let results: Vec<Value> = symbolic_mode(|| {
//!     let body = let_(body_ty, world_bodies.clone());
//!     an(entity(body, vec![contains(body.attr("name"), "Handle")]))
//! })
//! .evaluate_values()
//! .collect::<Result<_>>()?;
//! ```
//!
//! Attribute access, indexing, method calls and comparisons on expressions
//! are symbolic: they build nodes instead of evaluating. These operations
//! require an active symbolic scope and panic outside one.

use std::cell::Cell;

use crate::error::{EqlError, Result};
use crate::expr::quantifier::{Quantification, Query, UniqueQuery};
use crate::expr::{BinData, CmpData, CmpOp, DescData, Domain, Expr, NodeId, NodeKind, VarData};
use crate::graph::TypeId;
use crate::hashed::{HashedSet, HashedValue};
use crate::session::{self, Mode};
use crate::value::Value;

/// An operand of a symbolic operation: an expression or a plain value that
/// will be wrapped into a literal.
#[derive(Clone)]
pub enum Operand {
    Expr(Expr),
    Value(Value),
}

impl From<Expr> for Operand {
    fn from(e: Expr) -> Self {
        Operand::Expr(e)
    }
}

impl From<&Expr> for Operand {
    fn from(e: &Expr) -> Self {
        Operand::Expr(*e)
    }
}

impl From<&Query> for Operand {
    fn from(q: &Query) -> Self {
        Operand::Expr(q.expr())
    }
}

impl From<&UniqueQuery> for Operand {
    fn from(q: &UniqueQuery) -> Self {
        Operand::Expr(q.expr())
    }
}

impl From<Value> for Operand {
    fn from(v: Value) -> Self {
        Operand::Value(v)
    }
}

impl From<bool> for Operand {
    fn from(v: bool) -> Self {
        Operand::Value(Value::from(v))
    }
}

impl From<i64> for Operand {
    fn from(v: i64) -> Self {
        Operand::Value(Value::from(v))
    }
}

impl From<i32> for Operand {
    fn from(v: i32) -> Self {
        Operand::Value(Value::from(v))
    }
}

impl From<f64> for Operand {
    fn from(v: f64) -> Self {
        Operand::Value(Value::from(v))
    }
}

impl From<&str> for Operand {
    fn from(v: &str) -> Self {
        Operand::Value(Value::from(v))
    }
}

impl From<String> for Operand {
    fn from(v: String) -> Self {
        Operand::Value(Value::from(v))
    }
}

/// Coerce an operand into an expression, wrapping values as literals.
pub(crate) fn operand_expr(operand: Operand) -> Expr {
    match operand {
        Operand::Expr(e) => e,
        Operand::Value(v) => lit(v),
    }
}

/// Optional domain of a variable declaration.
pub enum DomainArg {
    /// Draw values from the symbol graph registry of the variable's type.
    Registry,
    /// Explicit values.
    Values(Vec<Value>),
}

impl From<Option<Vec<Value>>> for DomainArg {
    fn from(v: Option<Vec<Value>>) -> Self {
        match v {
            Some(values) => DomainArg::Values(values),
            None => DomainArg::Registry,
        }
    }
}

impl From<Vec<Value>> for DomainArg {
    fn from(values: Vec<Value>) -> Self {
        DomainArg::Values(values)
    }
}

impl From<&Vec<Value>> for DomainArg {
    fn from(values: &Vec<Value>) -> Self {
        DomainArg::Values(values.clone())
    }
}

impl From<Value> for DomainArg {
    fn from(value: Value) -> Self {
        DomainArg::Values(vec![value])
    }
}

fn assert_symbolic(operation: &str) {
    assert!(
        session::in_symbolic_mode(),
        "usage error: {operation} requires an active symbolic scope \
         (wrap construction in symbolic_mode(..) or rule_mode(..))"
    );
}

impl Expr {
    fn alloc(kind: NodeKind) -> Expr {
        Expr(session::arena().alloc(kind))
    }

    /// Symbolic attribute access.
    pub fn attr(&self, name: &str) -> Expr {
        assert_symbolic("attribute access");
        Expr::alloc(NodeKind::Attribute { child: self.0, attr: name.to_string() })
    }

    /// Symbolic indexing.
    pub fn index(&self, key: impl Into<Value>) -> Expr {
        assert_symbolic("indexing");
        Expr::alloc(NodeKind::Index { child: self.0, key: key.into() })
    }

    /// Symbolic method call with concrete arguments.
    pub fn call(&self, method: &str, args: Vec<Value>) -> Expr {
        assert_symbolic("method call");
        Expr::alloc(NodeKind::Call { child: self.0, method: method.to_string(), args })
    }

    fn compare(&self, op: CmpOp, other: impl Into<Operand>) -> Expr {
        assert_symbolic("comparison");
        let right = operand_expr(other.into());
        Expr::alloc(NodeKind::Comparator(CmpData {
            left: self.0,
            right: right.0,
            op: Cell::new(op),
        }))
    }

    pub fn eq(&self, other: impl Into<Operand>) -> Expr {
        self.compare(CmpOp::Eq, other)
    }

    pub fn ne(&self, other: impl Into<Operand>) -> Expr {
        self.compare(CmpOp::Ne, other)
    }

    pub fn lt(&self, other: impl Into<Operand>) -> Expr {
        self.compare(CmpOp::Lt, other)
    }

    pub fn le(&self, other: impl Into<Operand>) -> Expr {
        self.compare(CmpOp::Le, other)
    }

    pub fn gt(&self, other: impl Into<Operand>) -> Expr {
        self.compare(CmpOp::Gt, other)
    }

    pub fn ge(&self, other: impl Into<Operand>) -> Expr {
        self.compare(CmpOp::Ge, other)
    }
}

// `a & b` and `a | b` mirror the logical builders.
impl std::ops::BitAnd for Expr {
    type Output = Expr;

    fn bitand(self, rhs: Expr) -> Expr {
        and_(vec![self, rhs])
    }
}

impl std::ops::BitOr for Expr {
    type Output = Expr;

    fn bitor(self, rhs: Expr) -> Expr {
        optimize_or(self, rhs)
    }
}

/// Declare a variable of a registered type.
///
/// An explicit domain is filtered to instances of the type; without a domain
/// the variable draws from the symbol graph registry (subtypes included).
pub fn let_(ty: TypeId, domain: impl Into<DomainArg>) -> Expr {
    let name = session::current_graph().type_name(ty).to_string();
    let_named(&name, ty, domain)
}

/// Declare a named variable; the name only affects rendering and warnings.
pub fn let_named(name: &str, ty: TypeId, domain: impl Into<DomainArg>) -> Expr {
    let graph = session::current_graph();
    let domain = match domain.into() {
        DomainArg::Registry => Domain::Registry(ty),
        DomainArg::Values(values) => {
            let mut set = HashedSet::new();
            for v in values {
                if graph.instance_of(&v, ty) {
                    set.add(HashedValue::new(v));
                }
            }
            Domain::Explicit(set.iter().cloned().collect())
        }
    };
    Expr::alloc(NodeKind::Var(VarData {
        ty: Some(ty),
        name: name.to_string(),
        domain,
        child_vars: Vec::new(),
        predicate: false,
        inferred: Cell::new(false),
        indexed: graph.is_indexed(ty),
        literal: false,
    }))
}

/// A literal: a variable whose domain is the given concrete value.
pub fn lit(value: impl Into<Value>) -> Expr {
    let value = value.into();
    let name = value.type_name();
    Expr::alloc(NodeKind::Var(VarData {
        ty: None,
        name,
        domain: Domain::Explicit(vec![HashedValue::new(value)]),
        child_vars: Vec::new(),
        predicate: false,
        inferred: Cell::new(false),
        indexed: false,
        literal: true,
    }))
}

/// Describe a query over a single variable-like expression.
pub fn entity(selected: Expr, conditions: Vec<Expr>) -> Expr {
    let child = chain_conditions(conditions);
    Expr::alloc(NodeKind::Entity(DescData {
        selected: vec![selected.0],
        child: Cell::new(child.map(|c| c.0)),
    }))
}

/// Describe a query over a tuple of variable-like expressions.
pub fn set_of(selected: Vec<Expr>, conditions: Vec<Expr>) -> Expr {
    let child = chain_conditions(conditions);
    Expr::alloc(NodeKind::SetOf(DescData {
        selected: selected.into_iter().map(|e| e.0).collect(),
        child: Cell::new(child.map(|c| c.0)),
    }))
}

fn chain_conditions(conditions: Vec<Expr>) -> Option<Expr> {
    let mut iter = conditions.into_iter();
    let first = iter.next()?;
    Some(iter.fold(first, |acc, cond| {
        Expr::alloc(NodeKind::And(BinData::new(acc.0, cond.0)))
    }))
}

/// Quantifier yielding every matching result.
pub fn an(descriptor: impl Into<Operand>) -> Query {
    an_with(descriptor, None)
}

/// Alias of [`an`] for words not starting with a vowel.
pub fn a(descriptor: impl Into<Operand>) -> Query {
    an(descriptor)
}

/// [`an`] with a result-quantification constraint.
pub fn an_with(descriptor: impl Into<Operand>, quantification: impl Into<Option<Quantification>>) -> Query {
    let descriptor = wrap_descriptor(operand_expr(descriptor.into()));
    let root = Expr::alloc(NodeKind::An { child: descriptor.0 });
    make_query(root, quantification.into())
}

/// Quantifier demanding exactly one result.
pub fn the(descriptor: impl Into<Operand>) -> UniqueQuery {
    let descriptor = wrap_descriptor(operand_expr(descriptor.into()));
    let root = Expr::alloc(NodeKind::The { child: descriptor.0 });
    UniqueQuery { query: make_query(root, None) }
}

/// A bare variable-like expression quantifies as `an(entity(expr))`.
fn wrap_descriptor(expr: Expr) -> Expr {
    let arena = session::arena();
    match &arena.node(expr.0).kind {
        NodeKind::Entity(_) | NodeKind::SetOf(_) => expr,
        _ => entity(expr, Vec::new()),
    }
}

fn make_query(root: Expr, quantification: Option<Quantification>) -> Query {
    Query {
        root: root.0,
        arena: session::arena(),
        graph: session::current_graph(),
        config: session::current_config(),
        is_rule: Cell::new(session::current_mode() == Some(Mode::Rule)),
        quantification,
    }
}

/// Logical conjunction, chained left-deep.
///
/// # Panics
/// Panics on an empty condition list.
pub fn and_(conditions: Vec<Expr>) -> Expr {
    chain_conditions(conditions).expect("and_ requires at least one condition")
}

/// Logical disjunction, chained left-deep. Operands over the same variable
/// set chain as else-if; disjoint operands chain as union.
///
/// # Panics
/// Panics on an empty condition list.
pub fn or_(conditions: Vec<Expr>) -> Expr {
    let mut iter = conditions.into_iter();
    let first = iter.next().expect("or_ requires at least one condition");
    iter.fold(first, optimize_or)
}

fn optimize_or(left: Expr, right: Expr) -> Expr {
    let arena = session::arena();
    let mut left_vars = arena.non_literal_var_uids(left.0);
    let mut right_vars = arena.non_literal_var_uids(right.0);
    left_vars.sort_unstable();
    right_vars.sort_unstable();
    if left_vars == right_vars {
        Expr::alloc(NodeKind::ElseIf(BinData::new(left.0, right.0)))
    } else {
        Expr::alloc(NodeKind::Union(BinData::new(left.0, right.0)))
    }
}

/// Structural negation.
///
/// Pushes through conjunction and disjunction, descends into descriptors and
/// toggles the inversion sense of leaves. Negating a quantifier is rejected
/// as ambiguous.
pub fn not_(operand: impl Into<Operand>) -> Result<Expr> {
    let expr = operand_expr(operand.into());
    let arena = session::arena();
    let node = arena.node(expr.0);
    match &node.kind {
        NodeKind::An { .. } | NodeKind::The { .. } => Err(EqlError::UnsupportedNegation),
        NodeKind::Entity(d) => {
            let child = d.child.get().map(|c| not_(Expr(c))).transpose()?;
            Ok(Expr::alloc(NodeKind::Entity(DescData {
                selected: d.selected.clone(),
                child: Cell::new(child.map(|c| c.0)),
            })))
        }
        NodeKind::SetOf(d) => {
            let child = d.child.get().map(|c| not_(Expr(c))).transpose()?;
            Ok(Expr::alloc(NodeKind::SetOf(DescData {
                selected: d.selected.clone(),
                child: Cell::new(child.map(|c| c.0)),
            })))
        }
        NodeKind::And(b) => {
            let left = not_(Expr(b.left.get()))?;
            let right = not_(Expr(b.right.get()))?;
            Ok(Expr::alloc(NodeKind::ElseIf(BinData::new(left.0, right.0))))
        }
        NodeKind::ElseIf(b) | NodeKind::Union(b) => {
            let left = not_(Expr(b.left.get()))?;
            let right = not_(Expr(b.right.get()))?;
            Ok(Expr::alloc(NodeKind::And(BinData::new(left.0, right.0))))
        }
        NodeKind::Comparator(c) => {
            c.op.set(c.op.get().inverted());
            Ok(expr)
        }
        NodeKind::Var(_)
        | NodeKind::Attribute { .. }
        | NodeKind::Index { .. }
        | NodeKind::Call { .. }
        | NodeKind::Flatten { .. } => {
            node.invert.set(!node.invert.get());
            Ok(expr)
        }
        _ => Err(EqlError::Usage(format!(
            "cannot negate `{}`; negate its condition instead",
            arena.display_name(expr.0)
        ))),
    }
}

/// `contains(container, item)`: substring on strings, membership on
/// collections.
pub fn contains(container: impl Into<Operand>, item: impl Into<Operand>) -> Expr {
    operand_expr(container.into()).compare(CmpOp::Contains, item)
}

/// `in_(item, container)`: equivalent to `contains(container, item)`.
pub fn in_(item: impl Into<Operand>, container: impl Into<Operand>) -> Expr {
    contains(container, item)
}

/// Flatten a nested iterable into individual items while preserving the
/// parent bindings, similar to UNNEST.
pub fn flatten(expr: impl Into<Operand>) -> Expr {
    let child = operand_expr(expr.into());
    Expr::alloc(NodeKind::Flatten { child: child.0 })
}

/// Universal quantification: bindings satisfying the condition for every
/// value of the variable.
pub fn for_all(variable: Expr, condition: Expr) -> Expr {
    Expr::alloc(NodeKind::ForAll(BinData::new(variable.0, condition.0)))
}

/// Existential quantification: the first satisfying binding per value of the
/// variable, short-circuiting.
pub fn exists(variable: Expr, condition: Expr) -> Expr {
    Expr::alloc(NodeKind::Exists(BinData::new(variable.0, condition.0)))
}

/// The built-in type-check predicate: holds when the expression's value is
/// an instance of the type, subtypes included.
pub fn has_type(expr: Expr, ty: TypeId) -> Expr {
    let pred = session::current_graph().has_type_predicate();
    construct(pred, vec![("value", expr.into()), ("type", Operand::Value(Value::Type(ty)))])
}

/// Symbolic construction of a registered type.
///
/// In rule mode (or for predicate types) the result is a variable that
/// instantiates new values from its keyword arguments; in query mode the
/// result is a pattern query over the type's registry filtered by the
/// keyword equalities. For predicates constructed inside an entered query,
/// a missing first argument is implicitly bound to the enclosing query's
/// selected variable.
///
/// # Panics
/// Panics outside a symbolic scope.
pub fn construct(ty: TypeId, kwargs: Vec<(&str, Operand)>) -> Expr {
    assert_symbolic("symbolic construction");
    let graph = session::current_graph();
    let predicate = graph.is_predicate(ty);
    let mode = session::current_mode();

    let mut kwargs: Vec<(String, Operand)> =
        kwargs.into_iter().map(|(k, v)| (k.to_string(), v)).collect();

    if predicate && mode == Some(Mode::Query) {
        if let Some(selected) = session::enclosing_selected_variable() {
            let fields = graph.fields_of(ty);
            if let Some(first) = fields.first() {
                if !kwargs.iter().any(|(k, _)| k == first) {
                    kwargs.insert(0, (first.clone(), Operand::Expr(Expr(selected))));
                }
            }
        }
    }

    if predicate || mode == Some(Mode::Rule) {
        let child_vars: Vec<(String, NodeId)> = kwargs
            .into_iter()
            .map(|(name, operand)| (name, operand_expr(operand).0))
            .collect();
        return Expr::alloc(NodeKind::Var(VarData {
            ty: Some(ty),
            name: graph.type_name(ty).to_string(),
            domain: Domain::None,
            child_vars,
            predicate,
            inferred: Cell::new(mode == Some(Mode::Rule) && !predicate),
            indexed: graph.is_indexed(ty),
            literal: false,
        }));
    }

    // Query mode, plain type: a pattern match over the registry.
    let var = let_(ty, None);
    let conditions: Vec<Expr> = kwargs
        .into_iter()
        .map(|(name, operand)| var.attr(&name).eq(operand))
        .collect();
    if conditions.is_empty() {
        var
    } else {
        an(entity(var, conditions)).expr()
    }
}
