//! Query descriptors and result quantifiers.
//!
//! `Entity` selects a single variable-like expression, `SetOf` a tuple. A
//! quantifier projects raw assignments into user-visible results: `an`
//! streams every match, `the` demands exactly one. Selected variables left
//! unbound by the conditions are completed by a Cartesian combination of
//! their domains, with a warning when that is likely unintended.

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use tracing::warn;

use crate::cache::Assignment;
use crate::config::EngineConfig;
use crate::error::{EqlError, Result};
use crate::expr::{
    evaluate, once_ok, Arena, BindingIter, Domain, EvalEnv, Expr, NodeId, NodeKind,
};
use crate::graph::SymbolGraph;
use crate::value::Value;

pub(crate) fn eval_descriptor(
    env: &Rc<EvalEnv>,
    id: NodeId,
    sources: Assignment,
    yield_when_false: bool,
) -> BindingIter {
    let node = env.arena.node(id);
    let (selected, child) = match &node.kind {
        NodeKind::Entity(d) | NodeKind::SetOf(d) => (d.selected.clone(), d.child.get()),
        _ => unreachable!(),
    };

    let prefix: BindingIter = if sources.contains_key(&node.uid) {
        once_ok(sources.clone())
    } else {
        Box::new(std::iter::empty())
    };

    let env = env.clone();
    let mut constrained: BindingIter = match child {
        Some(cond) => evaluate(&env, cond, sources.clone(), yield_when_false, Some(id)),
        None => once_ok(sources),
    };
    let mut combos: Option<std::vec::IntoIter<Assignment>> = None;
    let mut done = false;

    let main = std::iter::from_fn(move || {
        if done {
            return None;
        }
        loop {
            if let Some(inner) = combos.as_mut() {
                match inner.next() {
                    Some(out) => return Some(Ok(out)),
                    None => {
                        combos = None;
                        continue;
                    }
                }
            }
            match constrained.next() {
                Some(Err(e)) => {
                    done = true;
                    return Some(Err(e));
                }
                Some(Ok(mut values)) => {
                    let node = env.arena.node(id);
                    if let Some(cond) = child {
                        node.is_false.set(env.arena.node(cond).is_false.get());
                        if !node.is_false.get() {
                            // Fire the conclusions carried by the branch that
                            // produced this assignment.
                            for cid in env.arena.conclusions_of(cond) {
                                let conclusion = env.arena.conclusion(cid);
                                values = match conclusion.fire(&env, values, id) {
                                    Ok(v) => v,
                                    Err(e) => {
                                        done = true;
                                        return Some(Err(e));
                                    }
                                };
                            }
                        }
                    }
                    if node.is_false.get() && !yield_when_false {
                        continue;
                    }
                    warn_on_unbound(&env, id, &selected, &values);
                    let unbound = selected
                        .iter()
                        .any(|s| !values.contains_key(&env.arena.node(*s).uid));
                    if unbound {
                        match unbound_combinations(&env, id, &selected, &values) {
                            Ok(list) => combos = Some(list.into_iter()),
                            Err(e) => {
                                done = true;
                                return Some(Err(e));
                            }
                        }
                        continue;
                    }
                    return Some(Ok(values));
                }
                None => {
                    done = true;
                    return None;
                }
            }
        }
    });
    Box::new(prefix.chain(main))
}

/// Cartesian combination of the selected variables on top of the constrained
/// binding. Variables already bound contribute their single value.
fn unbound_combinations(
    env: &Rc<EvalEnv>,
    id: NodeId,
    selected: &[NodeId],
    values: &Assignment,
) -> Result<Vec<Assignment>> {
    let mut per_var: Vec<(u64, Vec<Assignment>)> = Vec::new();
    for s in selected {
        let uid = env.arena.node(*s).uid;
        let mut options = Vec::new();
        let mut iter = evaluate(env, *s, values.clone(), false, Some(id));
        while let Some(res) = iter.next() {
            options.push(res?);
        }
        per_var.push((uid, options));
    }

    let mut out: Vec<Assignment> = vec![values.clone()];
    for (uid, options) in per_var {
        let mut next = Vec::new();
        for base in &out {
            for option in &options {
                let Some(hv) = option.get(&uid) else {
                    continue;
                };
                let mut combined = base.clone();
                combined.insert(uid, hv.clone());
                next.push(combined);
            }
        }
        out = next;
    }
    Ok(out)
}

/// Warn once per variable when an unbound selected variable has a large
/// domain: the query is about to perform a Cartesian product join.
fn warn_on_unbound(env: &Rc<EvalEnv>, id: NodeId, selected: &[NodeId], values: &Assignment) {
    let threshold = env.config.evaluation.cartesian_warn_threshold;
    let node = env.arena.node(id);
    for s in selected {
        for var in env.arena.var_instances(*s).iter() {
            let var_node = env.arena.node(*var);
            if values.contains_key(&var_node.uid) {
                continue;
            }
            let domain_len = match &var_node.kind {
                NodeKind::Var(d) => match &d.domain {
                    Domain::Explicit(v) => v.len(),
                    Domain::Registry(ty) => env.graph.instances_of(*ty, true).len(),
                    Domain::None => 0,
                },
                _ => 0,
            };
            if domain_len > threshold && node.warned.borrow_mut().insert(var_node.uid) {
                warn!(
                    variable = %env.arena.display_name(*var),
                    domain_size = domain_len,
                    descriptor = %env.arena.display_name(id),
                    "cartesian product: unconstrained variable in query descriptor"
                );
            }
        }
    }
}

pub(crate) fn eval_quantifier(
    env: &Rc<EvalEnv>,
    id: NodeId,
    sources: Assignment,
    yield_when_false: bool,
) -> BindingIter {
    let node = env.arena.node(id);
    let child = match &node.kind {
        NodeKind::An { child } | NodeKind::The { child } => *child,
        _ => unreachable!(),
    };
    if sources.contains_key(&node.uid) {
        return once_ok(sources);
    }
    // A quantifier over a single entity mirrors its selected variable.
    let selected_uid = match &env.arena.node(child).kind {
        NodeKind::Entity(d) => d.selected.first().map(|s| env.arena.node(*s).uid),
        _ => None,
    };

    let env = env.clone();
    let mut inner = evaluate(&env, child, sources, yield_when_false, Some(id));
    Box::new(std::iter::from_fn(move || match inner.next() {
        Some(Err(e)) => Some(Err(e)),
        Some(Ok(mut value)) => {
            let node = env.arena.node(id);
            node.is_false.set(env.arena.node(child).is_false.get());
            if let Some(var_uid) = selected_uid {
                if let Some(hv) = value.get(&var_uid).cloned() {
                    value.insert(node.uid, hv);
                }
            }
            Some(Ok(value))
        }
        None => None,
    }))
}

/// Constraint on the number of results a quantifier may produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantification {
    Exactly(usize),
    AtLeast(usize),
    AtMost(usize),
    Range { at_least: usize, at_most: usize },
}

impl Quantification {
    /// A consistent range constraint.
    pub fn range(at_least: usize, at_most: usize) -> Result<Self> {
        if at_most < at_least {
            return Err(EqlError::InconsistentQuantification { at_least, at_most });
        }
        Ok(Quantification::Range { at_least, at_most })
    }

    fn min(self) -> Option<usize> {
        match self {
            Quantification::Exactly(n) | Quantification::AtLeast(n) => Some(n),
            Quantification::Range { at_least, .. } => Some(at_least),
            Quantification::AtMost(_) => None,
        }
    }

    fn max(self) -> Option<usize> {
        match self {
            Quantification::Exactly(n) | Quantification::AtMost(n) => Some(n),
            Quantification::Range { at_most, .. } => Some(at_most),
            Quantification::AtLeast(_) => None,
        }
    }
}

/// A query rooted at `an(..)`: a stream of matching results.
pub struct Query {
    pub(crate) root: NodeId,
    pub(crate) arena: Rc<Arena>,
    pub(crate) graph: Arc<SymbolGraph>,
    pub(crate) config: EngineConfig,
    pub(crate) is_rule: Cell<bool>,
    pub(crate) quantification: Option<Quantification>,
}

impl Query {
    /// The query as an expression, for nesting inside other queries.
    pub fn expr(&self) -> Expr {
        Expr(self.root)
    }

    /// The root of the condition tree under the query's descriptor, if any.
    /// For a rule this is the branch the selectors wrap.
    pub fn conditions(&self) -> Option<Expr> {
        let child = match &self.arena.node(self.root).kind {
            NodeKind::An { child } | NodeKind::The { child } => *child,
            _ => return None,
        };
        match &self.arena.node(child).kind {
            NodeKind::Entity(d) | NodeKind::SetOf(d) => d.child.get().map(Expr),
            _ => None,
        }
    }

    /// Evaluate lazily. Caches and per-parent seen sets are reset up front,
    /// so re-running a query yields the same outputs as the first run.
    pub fn evaluate(&self) -> Solutions {
        self.arena.reset_cache(self.root);
        let env = Rc::new(EvalEnv {
            arena: self.arena.clone(),
            graph: self.graph.clone(),
            config: self.config.clone(),
            is_rule: self.is_rule.get(),
        });
        let inner = evaluate(&env, self.root, Assignment::new(), false, None);
        Solutions {
            env,
            root: self.root,
            inner,
            count: 0,
            quantification: self.quantification,
            finished: false,
        }
    }

    /// Evaluate and unwrap single-entity results into plain values.
    pub fn evaluate_values(&self) -> impl Iterator<Item = Result<Value>> {
        self.evaluate().map(|r| r.map(|s| s.value().clone()))
    }
}

/// A query rooted at `the(..)`: exactly one result.
pub struct UniqueQuery {
    pub(crate) query: Query,
}

impl UniqueQuery {
    pub fn expr(&self) -> Expr {
        self.query.expr()
    }

    /// Evaluate, requiring exactly one solution.
    pub fn evaluate(&self) -> Result<Solution> {
        let mut solutions = self.query.evaluate();
        let first = match solutions.next() {
            None => return Err(EqlError::NoSolutionFound),
            Some(first) => first?,
        };
        match solutions.next() {
            None => Ok(first),
            Some(Err(e)) => Err(e),
            Some(Ok(_)) => Err(EqlError::MultipleSolutionFound),
        }
    }

    /// Evaluate and unwrap the single entity value.
    pub fn evaluate_value(&self) -> Result<Value> {
        Ok(self.evaluate()?.value().clone())
    }
}

/// Iterator over query solutions.
pub struct Solutions {
    env: Rc<EvalEnv>,
    root: NodeId,
    inner: BindingIter,
    count: usize,
    quantification: Option<Quantification>,
    finished: bool,
}

impl Iterator for Solutions {
    type Item = Result<Solution>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.inner.next() {
            Some(Err(e)) => {
                self.finished = true;
                Some(Err(e))
            }
            Some(Ok(assignment)) => {
                self.count += 1;
                if let Some(max) = self.quantification.and_then(Quantification::max) {
                    if self.count > max {
                        self.finished = true;
                        return Some(Err(EqlError::TooManySolutions { expected: max }));
                    }
                }
                Some(extract_solution(&self.env, self.root, &assignment))
            }
            None => {
                self.finished = true;
                if let Some(min) = self.quantification.and_then(Quantification::min) {
                    if self.count < min {
                        return Some(Err(EqlError::TooFewSolutions { expected: min, found: self.count }));
                    }
                }
                None
            }
        }
    }
}

/// One query result: the selected value(s) of a satisfying assignment.
pub struct Solution {
    arena: Rc<Arena>,
    primary: Option<Value>,
    bindings: HashMap<u64, Value>,
}

impl std::fmt::Debug for Solution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Solution")
            .field("primary", &self.primary)
            .field("bindings", &self.bindings)
            .finish()
    }
}

impl Solution {
    /// The selected value of a single-entity query.
    ///
    /// # Panics
    /// Panics for `set_of` queries; use [`Solution::get`] instead.
    pub fn value(&self) -> &Value {
        self.primary
            .as_ref()
            .expect("not a single-entity query; use Solution::get")
    }

    /// The value bound to a selected expression.
    pub fn get(&self, expr: &Expr) -> Option<&Value> {
        let arena = self.arena.clone();
        let direct = arena.node(expr.0).uid;
        if let Some(v) = self.bindings.get(&direct) {
            return Some(v);
        }
        let resolved = arena.node(arena.var_of(expr.0)).uid;
        self.bindings.get(&resolved)
    }
}

fn extract_solution(env: &Rc<EvalEnv>, root: NodeId, assignment: &Assignment) -> Result<Solution> {
    let child = match &env.arena.node(root).kind {
        NodeKind::An { child } | NodeKind::The { child } => *child,
        _ => root,
    };
    let (selected, is_entity) = match &env.arena.node(child).kind {
        NodeKind::Entity(d) => (d.selected.clone(), true),
        NodeKind::SetOf(d) => (d.selected.clone(), false),
        _ => (Vec::new(), false),
    };

    let mut bindings = HashMap::new();
    for s in &selected {
        let uid = env.arena.node(*s).uid;
        if let Some(hv) = assignment.get(&uid) {
            bindings.insert(uid, hv.value.clone());
            // Also index by the resolved variable so both the selected
            // expression and its base variable look the value up.
            let resolved = env.arena.node(env.arena.var_of(*s)).uid;
            bindings.entry(resolved).or_insert_with(|| hv.value.clone());
        }
    }

    let primary = if is_entity {
        let uid = selected
            .first()
            .map(|s| env.arena.node(*s).uid)
            .ok_or_else(|| EqlError::Usage("entity query with no selected variable".into()))?;
        let hv = assignment
            .get(&uid)
            .ok_or_else(|| EqlError::Usage("selected variable is unbound in the result".into()))?;
        Some(hv.value.clone())
    } else {
        None
    };

    Ok(Solution { arena: env.arena.clone(), primary, bindings })
}
