//! Logical operators: conjunction, else-if choice, union and the
//! universal/existential constructs.
//!
//! The conjunction hot loop is: iterate left, consult the right-branch cache,
//! else iterate right, combine, dedupe. The right-branch cache is keyed only
//! by the right side's variables and skips re-evaluation of the right when
//! its assignment is already covered; it is disabled for rule trees so
//! conclusion selection is never skipped by a cache hit.

use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::debug;

use crate::cache::Assignment;
use crate::expr::{
    evaluate, merged, update_cache, yield_from_cache, BindingIter, EvalEnv, NodeId, NodeKind,
};

pub(crate) fn bin_operands(env: &Rc<EvalEnv>, id: NodeId) -> (NodeId, NodeId) {
    match &env.arena.node(id).kind {
        NodeKind::And(b)
        | NodeKind::ElseIf(b)
        | NodeKind::Union(b)
        | NodeKind::ExceptIf(b)
        | NodeKind::Alternative(b)
        | NodeKind::Next(b)
        | NodeKind::ForAll(b)
        | NodeKind::Exists(b) => (b.left.get(), b.right.get()),
        _ => unreachable!("binary operands requested for a non-binary node"),
    }
}

pub(crate) fn eval_and(
    env: &Rc<EvalEnv>,
    id: NodeId,
    sources: Assignment,
    yield_when_false: bool,
) -> BindingIter {
    let (left, right) = bin_operands(env, id);
    let env = env.clone();
    let mut left_iter = evaluate(&env, left, sources.clone(), yield_when_false, Some(id));
    let mut right_iter: Option<(Assignment, BindingIter)> = None;
    let mut cached_iter: Option<BindingIter> = None;
    let mut done = false;

    Box::new(std::iter::from_fn(move || {
        if done {
            return None;
        }
        loop {
            if let Some(inner) = cached_iter.as_mut() {
                match inner.next() {
                    Some(Err(e)) => {
                        done = true;
                        return Some(Err(e));
                    }
                    Some(Ok(out)) => {
                        let node = env.arena.node(id);
                        if node.is_false.get() && !yield_when_false {
                            continue;
                        }
                        return Some(Ok(out));
                    }
                    None => {
                        cached_iter = None;
                        continue;
                    }
                }
            }
            if let Some((left_value, inner)) = right_iter.as_mut() {
                match inner.next() {
                    Some(Err(e)) => {
                        done = true;
                        return Some(Err(e));
                    }
                    Some(Ok(right_value)) => {
                        let node = env.arena.node(id);
                        let output = merged(&right_value, left_value);
                        node.is_false.set(env.arena.node(right).is_false.get());
                        update_cache(&env, id, &right_value, true);
                        return Some(Ok(output));
                    }
                    None => {
                        right_iter = None;
                        continue;
                    }
                }
            }
            match left_iter.next() {
                Some(Err(e)) => {
                    done = true;
                    return Some(Err(e));
                }
                Some(Ok(left_value)) => {
                    let node = env.arena.node(id);
                    let left_value = merged(&left_value, &sources);
                    if env.arena.node(left).is_false.get() {
                        node.is_false.set(true);
                        if yield_when_false && !env.arena.is_duplicate(id, &left_value) {
                            return Some(Ok(left_value));
                        }
                        continue;
                    }
                    let right_covered = env.caching() && !env.is_rule && {
                        let mut right_cache = node.right_cache.borrow_mut();
                        !right_cache.is_empty() && right_cache.check(&left_value)
                    };
                    if right_covered {
                        debug!(node = id.0, "right-branch cache hit");
                        cached_iter = Some(yield_from_cache(&env, id, &left_value, true));
                    } else {
                        let inner = evaluate(&env, right, left_value.clone(), yield_when_false, Some(id));
                        right_iter = Some((left_value, inner));
                    }
                }
                None => {
                    done = true;
                    return None;
                }
            }
        }
    }))
}

/// Else-if choice: yield left when true; when left is false, evaluate right
/// under the left binding (with caching); when left yields nothing at all,
/// evaluate right against the original sources.
pub(crate) fn eval_else_if(
    env: &Rc<EvalEnv>,
    id: NodeId,
    sources: Assignment,
    yield_when_false: bool,
) -> BindingIter {
    let (left, right) = bin_operands(env, id);
    let env = env.clone();
    // Left is forced to yield even when false to preserve else-if semantics.
    let mut left_iter = Some(evaluate(&env, left, sources.clone(), true, Some(id)));
    let mut any_left = false;
    let mut right_iter: Option<(Option<Assignment>, BindingIter)> = None;
    let mut cached_iter: Option<BindingIter> = None;
    let mut fallback_started = false;
    let mut done = false;

    Box::new(std::iter::from_fn(move || {
        if done {
            return None;
        }
        loop {
            if let Some(inner) = cached_iter.as_mut() {
                match inner.next() {
                    Some(Err(e)) => {
                        done = true;
                        return Some(Err(e));
                    }
                    Some(Ok(out)) => return Some(Ok(out)),
                    None => {
                        cached_iter = None;
                        continue;
                    }
                }
            }
            if let Some((left_value, inner)) = right_iter.as_mut() {
                match inner.next() {
                    Some(Err(e)) => {
                        done = true;
                        return Some(Err(e));
                    }
                    Some(Ok(right_value)) => {
                        let node = env.arena.node(id);
                        node.is_false.set(env.arena.node(right).is_false.get());
                        let output = match left_value {
                            Some(lv) => merged(lv, &right_value),
                            None => right_value.clone(),
                        };
                        if node.is_false.get() && !yield_when_false {
                            continue;
                        }
                        if left_value.is_some() && !node.is_false.get() && env.arena.is_duplicate(id, &output)
                        {
                            continue;
                        }
                        update_cache(&env, id, &right_value, true);
                        return Some(Ok(output));
                    }
                    None => {
                        right_iter = None;
                        continue;
                    }
                }
            }
            if let Some(iter) = left_iter.as_mut() {
                match iter.next() {
                    Some(Err(e)) => {
                        done = true;
                        return Some(Err(e));
                    }
                    Some(Ok(left_value)) => {
                        any_left = true;
                        let node = env.arena.node(id);
                        let left_value = merged(&left_value, &sources);
                        if env.arena.node(left).is_false.get() {
                            let covered = env.caching() && {
                                let mut right_cache = node.right_cache.borrow_mut();
                                right_cache.check(&left_value)
                            };
                            if covered {
                                cached_iter = Some(yield_from_cache(&env, id, &left_value, true));
                            } else {
                                let inner =
                                    evaluate(&env, right, left_value.clone(), yield_when_false, Some(id));
                                right_iter = Some((Some(left_value), inner));
                            }
                            continue;
                        }
                        node.is_false.set(false);
                        return Some(Ok(left_value));
                    }
                    None => {
                        left_iter = None;
                        continue;
                    }
                }
            }
            // Left produced no values at all: evaluate right against sources.
            if !any_left && !fallback_started {
                fallback_started = true;
                let inner = evaluate(&env, right, sources.clone(), yield_when_false, Some(id));
                right_iter = Some((None, inner));
                continue;
            }
            done = true;
            return None;
        }
    }))
}

/// Union: evaluate left then right; both sides are always attempted.
pub(crate) fn eval_union(
    env: &Rc<EvalEnv>,
    id: NodeId,
    sources: Assignment,
    yield_when_false: bool,
) -> BindingIter {
    let node = env.arena.node(id);
    if env.caching() && node.cache.borrow_mut().check(&sources) {
        return yield_from_cache(env, id, &sources, false);
    }
    let (left, right) = bin_operands(env, id);
    let env = env.clone();
    let mut left_iter = Some(evaluate(&env, left, sources.clone(), yield_when_false, Some(id)));
    // Right evaluation under a false left binding, drained inline.
    let mut nested_right: Option<RightDrain> = None;
    let mut tail_right: Option<RightDrain> = None;
    let mut done = false;

    Box::new(std::iter::from_fn(move || {
        if done {
            return None;
        }
        loop {
            for slot in [&mut nested_right, &mut tail_right] {
                if let Some(drain) = slot.as_mut() {
                    match drain.next(&env, id, yield_when_false) {
                        Some(item) => {
                            if item.is_err() {
                                done = true;
                            }
                            return Some(item);
                        }
                        None => {
                            *slot = None;
                        }
                    }
                }
            }
            if let Some(iter) = left_iter.as_mut() {
                match iter.next() {
                    Some(Err(e)) => {
                        done = true;
                        return Some(Err(e));
                    }
                    Some(Ok(left_value)) => {
                        let node = env.arena.node(id);
                        let output = merged(&sources, &left_value);
                        node.left_evaluated.set(true);
                        if env.arena.node(left).is_false.get() && yield_when_false {
                            nested_right = Some(RightDrain::new(&env, right, output, yield_when_false, id));
                            continue;
                        }
                        node.is_false.set(env.arena.node(left).is_false.get());
                        if env.arena.is_duplicate(id, &output) {
                            continue;
                        }
                        update_cache(&env, id, &output, false);
                        return Some(Ok(output));
                    }
                    None => {
                        left_iter = None;
                        env.arena.node(id).left_evaluated.set(false);
                        tail_right = Some(RightDrain::new(&env, right, sources.clone(), yield_when_false, id));
                        continue;
                    }
                }
            }
            done = true;
            return None;
        }
    }))
}

/// State of one right-branch pass of a union: the accumulator is updated in
/// place across right yields.
struct RightDrain {
    acc: Assignment,
    inner: BindingIter,
}

impl RightDrain {
    fn new(env: &Rc<EvalEnv>, right: NodeId, acc: Assignment, yield_when_false: bool, id: NodeId) -> Self {
        let inner = evaluate(env, right, acc.clone(), yield_when_false, Some(id));
        RightDrain { acc, inner }
    }

    fn next(
        &mut self,
        env: &Rc<EvalEnv>,
        id: NodeId,
        yield_when_false: bool,
    ) -> Option<crate::error::Result<Assignment>> {
        loop {
            match self.inner.next() {
                Some(Err(e)) => return Some(Err(e)),
                Some(Ok(right_value)) => {
                    let node = env.arena.node(id);
                    for (k, v) in right_value {
                        self.acc.insert(k, v);
                    }
                    let (left, right) = bin_operands(env, id);
                    let left_node_false = env.arena.node(left).is_false.get();
                    if yield_when_false && node.left_evaluated.get() {
                        node.is_false
                            .set(left_node_false && env.arena.node(right).is_false.get());
                    } else {
                        node.is_false.set(false);
                    }
                    if !node.is_false.get() && env.arena.is_duplicate(id, &self.acc) {
                        continue;
                    }
                    node.right_evaluated.set(true);
                    update_cache(env, id, &self.acc, false);
                    return Some(Ok(self.acc.clone()));
                }
                None => {
                    env.arena.node(id).right_evaluated.set(false);
                    return None;
                }
            }
        }
    }
}

/// Universal closure: collect the condition's non-universal bindings for
/// every value of the variable and intersect them across iterations.
pub(crate) fn eval_for_all(env: &Rc<EvalEnv>, id: NodeId, sources: Assignment) -> BindingIter {
    let (var, cond) = bin_operands(env, id);
    let env = env.clone();
    let mut solutions: Option<std::vec::IntoIter<Assignment>> = None;
    let mut done = false;

    Box::new(std::iter::from_fn(move || {
        if done {
            return None;
        }
        if solutions.is_none() {
            match collect_for_all(&env, id, var, cond, &sources) {
                Ok(list) => solutions = Some(list.into_iter()),
                Err(e) => {
                    done = true;
                    return Some(Err(e));
                }
            }
        }
        match solutions.as_mut().and_then(Iterator::next) {
            Some(solution) => Some(Ok(merged(&solution, &sources))),
            None => {
                done = true;
                None
            }
        }
    }))
}

fn collect_for_all(
    env: &Rc<EvalEnv>,
    id: NodeId,
    var: NodeId,
    cond: NodeId,
    sources: &Assignment,
) -> crate::error::Result<Vec<Assignment>> {
    // Bindings of the condition's variables that are not the universal one.
    let universal: Vec<u64> = env.arena.unique_var_uids(var);
    let condition_ids: Vec<u64> = env
        .arena
        .unique_var_uids(cond)
        .into_iter()
        .filter(|uid| !universal.contains(uid))
        .collect();

    let canonical = |a: &Assignment| -> Vec<(u64, u64)> {
        let map: BTreeMap<u64, u64> = a.iter().map(|(k, v)| (*k, v.id)).collect();
        map.into_iter().collect()
    };

    let mut solution_set: Vec<Assignment> = Vec::new();
    let mut first = true;
    let mut var_iter = evaluate(env, var, sources.clone(), false, Some(id));
    while let Some(var_val) = var_iter.next() {
        let var_val = var_val?;
        let ctx = merged(sources, &var_val);
        let mut current: Vec<Assignment> = Vec::new();
        let mut cond_iter = evaluate(env, cond, ctx, false, Some(id));
        while let Some(cond_val) = cond_iter.next() {
            let cond_val = cond_val?;
            if env.arena.node(cond).is_false.get() {
                continue;
            }
            let filtered: Assignment = cond_val
                .iter()
                .filter(|(k, _)| condition_ids.contains(k))
                .map(|(k, v)| (*k, v.clone()))
                .collect();
            current.push(filtered);
        }
        // No satisfying binding for this universal value fails the whole
        // quantification.
        if current.is_empty() {
            return Ok(Vec::new());
        }
        if first {
            solution_set = current;
            first = false;
        } else {
            let current_keys: std::collections::HashSet<Vec<(u64, u64)>> =
                current.iter().map(|a| canonical(a)).collect();
            solution_set.retain(|a| current_keys.contains(&canonical(a)));
        }
        if solution_set.is_empty() {
            return Ok(Vec::new());
        }
    }
    Ok(solution_set)
}

/// Existential check: for each value of the variable, yield the first binding
/// for which the condition holds, then advance to the next value.
pub(crate) fn eval_exists(env: &Rc<EvalEnv>, id: NodeId, sources: Assignment) -> BindingIter {
    let (var, cond) = bin_operands(env, id);
    let env = env.clone();
    let mut var_iter = evaluate(&env, var, sources.clone(), false, Some(id));
    let mut cond_iter: Option<(Assignment, BindingIter)> = None;
    let mut done = false;

    Box::new(std::iter::from_fn(move || {
        if done {
            return None;
        }
        loop {
            if let Some((ctx, inner)) = cond_iter.as_mut() {
                match inner.next() {
                    Some(Err(e)) => {
                        done = true;
                        return Some(Err(e));
                    }
                    Some(Ok(cond_val)) => {
                        if env.arena.node(cond).is_false.get() {
                            continue;
                        }
                        let output = merged(ctx, &cond_val);
                        // Short-circuit: one witness per universal value.
                        cond_iter = None;
                        return Some(Ok(output));
                    }
                    None => {
                        cond_iter = None;
                        continue;
                    }
                }
            }
            match var_iter.next() {
                Some(Err(e)) => {
                    done = true;
                    return Some(Err(e));
                }
                Some(Ok(var_val)) => {
                    let ctx = merged(&sources, &var_val);
                    let inner = evaluate(&env, cond, ctx.clone(), false, Some(id));
                    cond_iter = Some((ctx, inner));
                }
                None => {
                    done = true;
                    return None;
                }
            }
        }
    }))
}
