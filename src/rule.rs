//! Rule mode: conclusions and the rule-tree builders.
//!
//! A rule is a query whose branches carry conclusions. When a branch yields a
//! successful assignment, its conclusions fire: `add` evaluates an expression
//! under the assignment, binds the target variable to the resulting instance
//! and materializes it into the symbol graph; `set_` updates an attribute on
//! the target value and records the relation.
//!
//! The selectors nest as scoped builders:
//! - `refinement(cond, ..)` wraps the current branch as except-if: when the
//!   condition fires, the inner conclusions *override* the enclosing ones.
//! - `alternative(cond, ..)` wraps as else-if: tried when the enclosing
//!   branch fails.
//! - `next_rule(cond, ..)` always tries the next branch alongside the
//!   current one, combining conclusions.

use std::rc::Rc;

use crate::cache::Assignment;
use crate::error::{EqlError, Result};
use crate::expr::quantifier::Query;
use crate::expr::{evaluate, BinData, EvalEnv, Expr, NodeId, NodeKind};
use crate::hashed::HashedValue;
use crate::session::{self, Mode};
use crate::value::Value;

/// What firing a conclusion does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConclusionKind {
    /// Bind the target variable to the evaluated expression and insert the
    /// instance into the symbol graph.
    Add,
    /// Update an attribute on the target value and record the relation.
    Set,
}

/// A conclusion attached to a rule branch.
#[derive(Debug)]
pub(crate) struct Conclusion {
    pub kind: ConclusionKind,
    /// `Add`: the target variable. `Set`: the attribute node to update.
    pub target: NodeId,
    /// `Add`: the expression constructing the inferred value. `Set`: the
    /// value expression.
    pub expr: NodeId,
}

impl Conclusion {
    /// The expression subtrees whose variables identify a firing.
    pub(crate) fn roots(&self) -> Vec<NodeId> {
        match self.kind {
            ConclusionKind::Add => vec![self.expr],
            ConclusionKind::Set => vec![self.target, self.expr],
        }
    }

    /// Fire under a final assignment, returning the extended assignment.
    pub(crate) fn fire(&self, env: &Rc<EvalEnv>, sources: Assignment, parent: NodeId) -> Result<Assignment> {
        match self.kind {
            ConclusionKind::Add => self.fire_add(env, sources, parent),
            ConclusionKind::Set => self.fire_set(env, sources, parent),
        }
    }

    fn fire_add(&self, env: &Rc<EvalEnv>, sources: Assignment, parent: NodeId) -> Result<Assignment> {
        let mut iter = evaluate(env, self.expr, sources.clone(), false, Some(parent));
        match iter.next() {
            None => Ok(sources),
            Some(Err(e)) => Err(e),
            Some(Ok(binding)) => {
                let mut out = sources;
                for (k, v) in binding {
                    out.insert(k, v);
                }
                let expr_uid = env.arena.node(self.expr).uid;
                let Some(result) = out.get(&expr_uid).cloned() else {
                    return Ok(out);
                };
                // Materialize the inferred instance into the symbol graph.
                env.graph.insert(&result.value);
                let target_uid = env.arena.node(self.target).uid;
                out.insert(target_uid, result);
                Ok(out)
            }
        }
    }

    fn fire_set(&self, env: &Rc<EvalEnv>, sources: Assignment, parent: NodeId) -> Result<Assignment> {
        let target_node = env.arena.node(self.target);
        let NodeKind::Attribute { child, attr } = &target_node.kind else {
            return Err(EqlError::Usage("set_ target must be an attribute expression".into()));
        };
        let child_uid = env.arena.node(*child).uid;
        let Some(owner) = sources.get(&child_uid).cloned() else {
            return Err(EqlError::Usage(format!(
                "set_ target owner `{}` is unbound in the assignment",
                env.arena.display_name(*child)
            )));
        };

        let mut out = sources;
        let value = {
            let mut iter = evaluate(env, self.expr, out.clone(), false, Some(parent));
            match iter.next() {
                None => return Ok(out),
                Some(Err(e)) => return Err(e),
                Some(Ok(binding)) => {
                    let expr_uid = env.arena.node(self.expr).uid;
                    let hv = binding
                        .get(&expr_uid)
                        .cloned()
                        .ok_or_else(|| EqlError::Usage("set_ value expression is unbound".into()))?;
                    for (k, v) in binding {
                        out.insert(k, v);
                    }
                    hv
                }
            }
        };

        match &owner.value {
            Value::Object(instance) => {
                if !instance.set(attr, value.value.clone()) {
                    return Err(EqlError::MissingAttribute {
                        type_name: instance.type_name.to_string(),
                        attribute: attr.clone(),
                    });
                }
                env.graph.insert_relation(owner.value.clone(), value.value.clone(), attr);
                let target_uid = env.arena.node(self.target).uid;
                out.insert(target_uid, HashedValue::with_id(owner.id, value.value));
                Ok(out)
            }
            other => Err(EqlError::MissingAttribute {
                type_name: other.type_name(),
                attribute: attr.clone(),
            }),
        }
    }
}

/// Attach an `Add` conclusion to the current rule branch.
///
/// # Panics
/// Panics outside a rule scope.
pub fn add(target: Expr, expression: Expr) {
    attach(ConclusionKind::Add, target.0, expression.0);
}

/// Attach a `Set` conclusion to the current rule branch. `target` must be an
/// attribute expression; `value` may be a symbolic expression or a plain
/// value.
///
/// # Panics
/// Panics outside a rule scope.
pub fn set_(target: Expr, value: impl Into<crate::dsl::Operand>) {
    let value = crate::dsl::operand_expr(value.into());
    attach(ConclusionKind::Set, target.0, value.0);
}

fn attach(kind: ConclusionKind, target: NodeId, expr: NodeId) {
    assert!(
        session::current_mode() == Some(Mode::Rule),
        "usage error: conclusions can only be attached inside a rule scope"
    );
    session::with_session(|state| {
        let branch = *state
            .stack
            .last()
            .expect("usage error: no enclosing rule branch to attach a conclusion to");
        let id = state.arena.add_conclusion(Conclusion { kind, target, expr });
        state.arena.node(branch).attached.borrow_mut().push(id);
    });
}

/// Wrap the current branch as `ExceptIf(current, cond)` and run `body` with
/// the condition branch as the attachment point: if the condition fires, its
/// conclusions override the enclosing branch's.
pub fn refinement<R>(conditions: Vec<Expr>, body: impl FnOnce() -> R) -> R {
    wrap_branch(SelectorShape::ExceptIf, conditions, body)
}

/// Wrap the current branch as `ElseIf(current, cond)`: the alternative fires
/// only when the enclosing branch fails.
pub fn alternative<R>(conditions: Vec<Expr>, body: impl FnOnce() -> R) -> R {
    wrap_branch(SelectorShape::Alternative, conditions, body)
}

/// Wrap the current branch as `Next(current, cond)`: always try the next
/// branch alongside the current one, combining conclusions.
pub fn next_rule<R>(conditions: Vec<Expr>, body: impl FnOnce() -> R) -> R {
    wrap_branch(SelectorShape::Next, conditions, body)
}

enum SelectorShape {
    ExceptIf,
    Alternative,
    Next,
}

fn wrap_branch<R>(shape: SelectorShape, conditions: Vec<Expr>, body: impl FnOnce() -> R) -> R {
    assert!(
        session::current_mode() == Some(Mode::Rule),
        "usage error: rule branch builders can only be used inside a rule scope"
    );
    let cond = crate::dsl::and_(conditions);
    session::with_session(|state| {
        let current = *state
            .stack
            .last()
            .expect("usage error: no enclosing rule branch to refine");
        let old_parent = state.arena.node(current).parent.get();
        let data = BinData::new(current, cond.0);
        let kind = match shape {
            SelectorShape::ExceptIf => NodeKind::ExceptIf(data),
            SelectorShape::Alternative => NodeKind::Alternative(data),
            SelectorShape::Next => NodeKind::Next(data),
        };
        let selector = state.arena.alloc(kind);
        state.arena.node(selector).parent.set(old_parent);
        if let Some(parent) = old_parent {
            state.arena.replace_child(parent, current, selector);
        }
        state.stack.push(cond.0);
    });
    let result = body();
    session::with_session(|state| {
        state.stack.pop();
    });
    result
}

/// Build a rule-rooted query: `an(entity(selected, conditions))` whose
/// selected variables are marked inferred.
pub fn infer(selected: Expr, conditions: Vec<Expr>) -> Query {
    let query = crate::dsl::an(crate::dsl::entity(selected, conditions));
    query.is_rule.set(true);
    let arena = query.arena.clone();
    let var = arena.var_of(selected.0);
    let node = arena.node(var);
    if let NodeKind::Var(data) = &node.kind {
        data.inferred.set(true);
    }
    query
}
