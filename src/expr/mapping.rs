//! Domain mappings: attribute access, indexing, method calls and flattening.
//!
//! A mapping evaluates its child once per yielded assignment and extends the
//! child's binding with its own. Attribute and index propagate the child's
//! identity so two mappings of the same parent value compare equal; flatten
//! enumerates inner items under fresh identities.

use std::rc::Rc;

use crate::cache::Assignment;
use crate::error::Result;
use crate::expr::{evaluate, once_ok, BindingIter, EvalEnv, NodeId, NodeKind};
use crate::hashed::HashedValue;
use crate::value::Value;

pub(crate) fn eval_mapping(
    env: &Rc<EvalEnv>,
    id: NodeId,
    sources: Assignment,
    yield_when_false: bool,
) -> BindingIter {
    let node = env.arena.node(id);
    if sources.contains_key(&node.uid) {
        return once_ok(sources);
    }
    let child = match &node.kind {
        NodeKind::Attribute { child, .. }
        | NodeKind::Index { child, .. }
        | NodeKind::Call { child, .. }
        | NodeKind::Flatten { child } => *child,
        _ => unreachable!(),
    };

    let env = env.clone();
    let mut child_iter = evaluate(&env, child, sources, yield_when_false, Some(id));
    let mut pending: Vec<(Assignment, HashedValue)> = Vec::new();
    let mut done = false;

    Box::new(std::iter::from_fn(move || {
        if done {
            return None;
        }
        loop {
            if let Some((child_values, mapped)) = pending.pop() {
                let node = env.arena.node(id);
                let truthy = mapped.value.truthy();
                let is_false = if node.invert.get() { truthy } else { !truthy };
                node.is_false.set(is_false);
                if yield_when_false || !is_false {
                    let mut out = child_values;
                    out.insert(node.uid, mapped);
                    return Some(Ok(out));
                }
                continue;
            }
            match child_iter.next() {
                Some(Err(e)) => {
                    done = true;
                    return Some(Err(e));
                }
                Some(Ok(child_values)) => {
                    let node = env.arena.node(id);
                    let child_uid = env.arena.node(child).uid;
                    let Some(base) = child_values.get(&child_uid).cloned() else {
                        continue;
                    };
                    let mapped = match apply_mapping(&env, &node.kind, &base) {
                        Ok(values) => values,
                        Err(e) => {
                            done = true;
                            return Some(Err(e));
                        }
                    };
                    // Reverse so `pop` preserves the original order.
                    pending = mapped
                        .into_iter()
                        .rev()
                        .map(|v| (child_values.clone(), v))
                        .collect();
                }
                None => {
                    done = true;
                    return None;
                }
            }
        }
    }))
}

fn apply_mapping(env: &Rc<EvalEnv>, kind: &NodeKind, base: &HashedValue) -> Result<Vec<HashedValue>> {
    match kind {
        NodeKind::Attribute { attr, .. } => {
            Ok(vec![HashedValue::with_id(base.id, base.value.get_attr(attr)?)])
        }
        NodeKind::Index { key, .. } => {
            Ok(vec![HashedValue::with_id(base.id, base.value.index(key)?)])
        }
        NodeKind::Call { method, args, .. } => {
            let result = match &base.value {
                Value::Object(instance) => env.graph.call_method(instance, method, args),
                other => other.call_builtin(method, args),
            }?;
            Ok(vec![HashedValue::with_id(base.id, result)])
        }
        NodeKind::Flatten { .. } => match base.value.iter_items() {
            Some(items) => Ok(items.into_iter().map(HashedValue::new).collect()),
            // A non-iterable flattens as a single-element sequence.
            None => Ok(vec![HashedValue::new(base.value.clone())]),
        },
        _ => unreachable!(),
    }
}
