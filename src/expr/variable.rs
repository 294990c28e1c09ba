//! Variables: domain enumeration and construction from child variables.

use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;

use tracing::debug;

use crate::cache::Assignment;
use crate::error::EqlError;
use crate::expr::{evaluate, once_err, once_ok, BindingIter, Domain, EvalEnv, NodeId, NodeKind};
use crate::hashed::{HashedSet, HashedValue};
use crate::value::Value;

/// A variable is either already bound in the sources, yields from its domain,
/// or instantiates new values by constructing its type from child variables.
pub(crate) fn eval_variable(
    env: &Rc<EvalEnv>,
    id: NodeId,
    sources: Assignment,
    yield_when_false: bool,
) -> BindingIter {
    let node = env.arena.node(id);
    let NodeKind::Var(data) = &node.kind else { unreachable!() };

    if sources.contains_key(&node.uid) {
        return once_ok(sources);
    }

    let domain_values: Option<Vec<HashedValue>> = match &data.domain {
        Domain::Explicit(values) => Some(values.clone()),
        Domain::Registry(ty) => {
            let snapshot: HashedSet = env
                .graph
                .instances_of(*ty, true)
                .into_iter()
                .map(HashedValue::new)
                .collect();
            Some(snapshot.iter().cloned().collect())
        }
        Domain::None => None,
    };

    if let Some(values) = domain_values {
        let uid = node.uid;
        let mut iter = values.into_iter();
        return Box::new(std::iter::from_fn(move || {
            let v = iter.next()?;
            let mut out = sources.clone();
            out.insert(uid, v);
            Some(Ok(out))
        }));
    }

    if data.inferred.get() || data.predicate {
        return instantiate(env, id, sources, yield_when_false);
    }

    once_err(EqlError::UnboundVariable(data.name.clone()))
}

/// Construct one instance per combination of child-variable bindings.
///
/// Child variables are searched depth-first with backtracking so failing
/// sub-evaluations prune early; the order prefers variables already bound in
/// the sources, then indexed variables, then variables with
/// constraint-bearing keyword arguments.
fn instantiate(
    env: &Rc<EvalEnv>,
    id: NodeId,
    sources: Assignment,
    yield_when_false: bool,
) -> BindingIter {
    let node = env.arena.node(id);
    let NodeKind::Var(data) = &node.kind else { unreachable!() };

    let mut ordered: Vec<(String, NodeId)> = data.child_vars.clone();
    {
        let arena = &env.arena;
        ordered.sort_by_key(|(_, child)| {
            let child_node = arena.node(*child);
            let bound = usize::from(!sources.contains_key(&child_node.uid));
            let (indexed, constrained) = match &child_node.kind {
                NodeKind::Var(d) => (usize::from(!d.indexed), usize::from(d.child_vars.is_empty())),
                _ => (1, 1),
            };
            (bound, indexed, constrained)
        });
    }

    let ty = data.ty;
    let predicate = data.predicate;
    let var_name = data.name.clone();
    let env = env.clone();
    let initially_bound: HashSet<u64> = sources.keys().copied().collect();

    let mut acc = sources;
    let mut stack: Vec<BindingIter> = Vec::new();
    // Per depth: the child's own binding chosen on this branch.
    let mut chosen: Vec<(u64, HashedValue)> = Vec::new();
    let mut done = false;

    Box::new(std::iter::from_fn(move || {
        if done {
            return None;
        }
        loop {
            // No child variables: exactly one construction attempt.
            if ordered.is_empty() {
                done = true;
                return match construct_instance(
                    &env,
                    id,
                    ty,
                    predicate,
                    &var_name,
                    &ordered,
                    &chosen,
                    yield_when_false,
                ) {
                    Ok(Some(out)) => Some(Ok(out)),
                    Ok(None) => None,
                    Err(e) => Some(Err(e)),
                };
            }

            // A full combination is staged; build the instance, then
            // backtrack the deepest choice so the next pull advances it.
            if chosen.len() == ordered.len() {
                let result = construct_instance(
                    &env,
                    id,
                    ty,
                    predicate,
                    &var_name,
                    &ordered,
                    &chosen,
                    yield_when_false,
                );
                if let Some((uid, _)) = chosen.pop() {
                    if !initially_bound.contains(&uid) {
                        acc.remove(&uid);
                    }
                }
                match result {
                    Ok(Some(out)) => return Some(Ok(out)),
                    Ok(None) => continue,
                    Err(e) => {
                        done = true;
                        return Some(Err(e));
                    }
                }
            }

            // Open the iterator for the next depth if needed.
            if stack.len() == chosen.len() {
                let (_, child) = ordered[stack.len()];
                stack.push(evaluate(&env, child, acc.clone(), false, Some(id)));
            }

            let Some(top) = stack.last_mut() else {
                done = true;
                return None;
            };
            match top.next() {
                Some(Err(e)) => {
                    done = true;
                    return Some(Err(e));
                }
                Some(Ok(res)) => {
                    let (_, child) = ordered[chosen.len()];
                    let child_uid = env.arena.node(child).uid;
                    let Some(hv) = res.get(&child_uid).cloned() else {
                        continue;
                    };
                    acc.insert(child_uid, hv.clone());
                    chosen.push((child_uid, hv));
                }
                None => {
                    // This depth is exhausted: backtrack.
                    stack.pop();
                    if let Some((uid, _)) = chosen.pop() {
                        if !initially_bound.contains(&uid) {
                            acc.remove(&uid);
                        }
                    }
                    if stack.is_empty() {
                        done = true;
                        return None;
                    }
                }
            }
        }
    }))
}

/// Build the instance for one combination. Returns `Ok(None)` when the
/// constructed value is false on this truth branch and false yields were not
/// requested.
#[allow(clippy::too_many_arguments)]
fn construct_instance(
    env: &Rc<EvalEnv>,
    id: NodeId,
    ty: Option<crate::graph::TypeId>,
    predicate: bool,
    var_name: &str,
    ordered: &[(String, NodeId)],
    chosen: &[(u64, HashedValue)],
    yield_when_false: bool,
) -> crate::error::Result<Option<Assignment>> {
    let node = env.arena.node(id);
    let Some(ty) = ty else {
        return Err(EqlError::UnboundVariable(var_name.to_string()));
    };

    let fields: Vec<(&str, Value)> = ordered
        .iter()
        .zip(chosen.iter())
        .map(|((name, _), (_, hv))| (name.as_str(), hv.value.clone()))
        .collect();
    let instance = env.graph.build_instance(ty, fields)?;

    let (result_value, truthy) = if predicate {
        let holds = env.graph.invoke_predicate(&instance)?;
        (Value::Bool(holds), holds)
    } else {
        let value = Value::Object(Arc::new(instance));
        let truthy = value.truthy();
        (value, truthy)
    };

    let is_false = if node.invert.get() { truthy } else { !truthy };
    node.is_false.set(is_false);
    if is_false && !yield_when_false {
        return Ok(None);
    }
    debug!(variable = var_name, "instantiated {}", result_value.render());

    let mut out = Assignment::new();
    out.insert(node.uid, HashedValue::new(result_value));
    for (uid, hv) in chosen {
        out.insert(*uid, hv.clone());
    }
    Ok(Some(out))
}
