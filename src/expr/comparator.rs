//! Binary comparison operators.
//!
//! A comparator evaluates its two operands and applies the operation to the
//! concrete values. The operand whose variables are already constrained by
//! the incoming sources is grounded first. Results are memoized in the
//! operator's indexed cache so overlapping bindings short-circuit on
//! re-entry.

use std::rc::Rc;

use crate::cache::Assignment;
use crate::error::{EqlError, Result};
use crate::expr::{
    evaluate, once_ok, update_cache, yield_from_cache, BindingIter, EvalEnv, NodeId, NodeKind,
};
use crate::hashed::HashedValue;
use crate::value::Value;

/// Comparison operations. Inversion rewrites the operation itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// `contains(a, b)`: b is a substring of a (strings) or a member of a
    /// (collections).
    Contains,
    NotContains,
}

impl CmpOp {
    pub fn inverted(self) -> CmpOp {
        match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Lt => CmpOp::Ge,
            CmpOp::Ge => CmpOp::Lt,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Le => CmpOp::Gt,
            CmpOp::Contains => CmpOp::NotContains,
            CmpOp::NotContains => CmpOp::Contains,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Contains => "contains",
            CmpOp::NotContains => "not contains",
        }
    }

    pub fn apply(self, left: &Value, right: &Value) -> Result<bool> {
        match self {
            CmpOp::Eq => Ok(left == right),
            CmpOp::Ne => Ok(left != right),
            CmpOp::Contains => left.contains_value(right),
            CmpOp::NotContains => Ok(!left.contains_value(right)?),
            ordering => {
                let cmp = left.compare(right).ok_or_else(|| EqlError::IncomparableValues {
                    left: left.render(),
                    right: right.render(),
                    op: ordering.symbol().to_string(),
                })?;
                Ok(match ordering {
                    CmpOp::Lt => cmp.is_lt(),
                    CmpOp::Le => cmp.is_le(),
                    CmpOp::Gt => cmp.is_gt(),
                    CmpOp::Ge => cmp.is_ge(),
                    _ => unreachable!(),
                })
            }
        }
    }
}

pub(crate) fn eval_comparator(
    env: &Rc<EvalEnv>,
    id: NodeId,
    sources: Assignment,
    yield_when_false: bool,
) -> BindingIter {
    let node = env.arena.node(id);
    if sources.contains_key(&node.uid) {
        return once_ok(sources);
    }
    if env.caching() && node.cache.borrow_mut().check(&sources) {
        return yield_from_cache(env, id, &sources, false);
    }

    let NodeKind::Comparator(cmp) = &node.kind else { unreachable!() };
    let (left, right, op) = (cmp.left, cmp.right, cmp.op.get());
    let (first, second) = pick_operands(env, id, &sources);

    let env = env.clone();
    let mut first_iter = evaluate(&env, first, sources, false, Some(id));
    let mut second_iter: Option<BindingIter> = None;
    let mut done = false;

    Box::new(std::iter::from_fn(move || {
        if done {
            return None;
        }
        loop {
            if let Some(inner) = second_iter.as_mut() {
                match inner.next() {
                    Some(Err(e)) => {
                        done = true;
                        return Some(Err(e));
                    }
                    Some(Ok(mut values)) => {
                        let node = env.arena.node(id);
                        let (Some(lv), Some(rv)) =
                            (values.get(&env.arena.node(left).uid), values.get(&env.arena.node(right).uid))
                        else {
                            continue;
                        };
                        let result = match op.apply(&lv.value, &rv.value) {
                            Ok(r) => r,
                            Err(e) => {
                                done = true;
                                return Some(Err(e));
                            }
                        };
                        node.is_false.set(!result);
                        if result || yield_when_false {
                            values.insert(node.uid, HashedValue::truth(result));
                            update_cache(&env, id, &values, false);
                            return Some(Ok(values));
                        }
                        continue;
                    }
                    None => {
                        second_iter = None;
                        continue;
                    }
                }
            }
            match first_iter.next() {
                Some(Err(e)) => {
                    done = true;
                    return Some(Err(e));
                }
                Some(Ok(first_values)) => {
                    second_iter = Some(evaluate(&env, second, first_values, false, Some(id)));
                }
                None => {
                    done = true;
                    return None;
                }
            }
        }
    }))
}

/// Ground the operand whose variables are already constrained first.
fn pick_operands(env: &Rc<EvalEnv>, id: NodeId, sources: &Assignment) -> (NodeId, NodeId) {
    let node = env.arena.node(id);
    let NodeKind::Comparator(cmp) = &node.kind else { unreachable!() };
    if !sources.is_empty()
        && env
            .arena
            .unique_var_uids(cmp.right)
            .iter()
            .any(|uid| sources.contains_key(uid))
    {
        (cmp.right, cmp.left)
    } else {
        (cmp.left, cmp.right)
    }
}
