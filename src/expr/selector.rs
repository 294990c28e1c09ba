//! Conclusion selectors: the rule-tree branch operators.
//!
//! `ExceptIf` overrides the enclosing branch's conclusions when the
//! exception condition fires; `Alternative` behaves like else-if over
//! conclusions; `Next` always tries both branches and combines them. Each
//! selector remembers which `(projected output, truth branch)` pairs already
//! produced conclusions so rule firings are never duplicated.
//!
//! The conclusions selected for a yield stay live until the next pull, so
//! consumers observe them after receiving the output.

use std::rc::Rc;

use crate::cache::Assignment;
use crate::expr::logical::{bin_operands, eval_else_if, eval_union};
use crate::expr::{evaluate, merged, yield_from_cache, BindingIter, ConclusionId, EvalEnv, NodeId};

/// Record conclusions for an output unless this combination already fired on
/// the current truth branch.
fn update_conclusion(env: &Rc<EvalEnv>, id: NodeId, output: &Assignment, conclusions: &[ConclusionId]) {
    if conclusions.is_empty() {
        return;
    }
    let node = env.arena.node(id);
    let mut required_uids: Vec<u64> = Vec::new();
    for cid in conclusions {
        let conclusion = env.arena.conclusion(*cid);
        for root in conclusion.roots() {
            for uid in env.arena.non_literal_var_uids(root) {
                if !required_uids.contains(&uid) {
                    required_uids.push(uid);
                }
            }
        }
    }
    let required: Assignment = output
        .iter()
        .filter(|(k, _)| required_uids.contains(k))
        .map(|(k, v)| (*k, v.clone()))
        .collect();

    let branch = usize::from(!node.is_false.get());
    let mut concluded = node.concluded.borrow_mut();
    if !concluded[branch].check(&required) {
        let mut live = node.live.borrow_mut();
        for cid in conclusions {
            if !live.contains(cid) {
                live.push(*cid);
            }
        }
        concluded[branch].add(&required);
    }
}

/// Yield left's binding unless the right side produces values for it; a
/// firing right side overrides the left branch's conclusions.
pub(crate) fn eval_except_if(
    env: &Rc<EvalEnv>,
    id: NodeId,
    sources: Assignment,
    yield_when_false: bool,
) -> BindingIter {
    let (left, right) = bin_operands(env, id);
    let env = env.clone();
    let mut left_iter = evaluate(&env, left, sources.clone(), yield_when_false, Some(id));
    let mut right_state: Option<(Assignment, BindingIter, bool)> = None;
    let mut cached_iter: Option<BindingIter> = None;
    let mut pending_clear = false;
    let mut done = false;

    Box::new(std::iter::from_fn(move || {
        if done {
            return None;
        }
        loop {
            if pending_clear {
                env.arena.node(id).live.borrow_mut().clear();
                pending_clear = false;
            }
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
            if let Some((left_value, inner, right_yielded)) = right_state.as_mut() {
                match inner.next() {
                    Some(Err(e)) => {
                        done = true;
                        return Some(Err(e));
                    }
                    Some(Ok(right_value)) => {
                        *right_yielded = true;
                        let node = env.arena.node(id);
                        {
                            let selected = env.arena.conclusions_of(right);
                            let mut live = node.live.borrow_mut();
                            for cid in selected {
                                if !live.contains(&cid) {
                                    live.push(cid);
                                }
                            }
                        }
                        let output = merged(left_value, &right_value);
                        pending_clear = true;
                        return Some(Ok(output));
                    }
                    None => {
                        let yielded = *right_yielded;
                        let left_value = left_value.clone();
                        right_state = None;
                        if !yielded {
                            // The exception did not fire: left flows through
                            // with its own conclusions.
                            let node = env.arena.node(id);
                            let selected = env.arena.conclusions_of(left);
                            let mut live = node.live.borrow_mut();
                            for cid in selected {
                                if !live.contains(&cid) {
                                    live.push(cid);
                                }
                            }
                            drop(live);
                            pending_clear = true;
                            return Some(Ok(left_value));
                        }
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
                    node.is_false.set(env.arena.node(left).is_false.get());
                    if node.is_false.get() {
                        if yield_when_false && !env.arena.is_duplicate(id, &left_value) {
                            return Some(Ok(left_value));
                        }
                        continue;
                    }
                    let covered = env.caching() && node.right_cache.borrow_mut().check(&left_value);
                    if covered {
                        cached_iter = Some(yield_from_cache(&env, id, &left_value, true));
                        continue;
                    }
                    let inner = evaluate(&env, right, left_value.clone(), false, Some(id));
                    right_state = Some((left_value, inner, false));
                }
                None => {
                    done = true;
                    return None;
                }
            }
        }
    }))
}

/// Else-if over conclusions: pick the left branch's conclusions when left is
/// true, otherwise the right branch's; yield only when a conclusion fired.
pub(crate) fn eval_alternative(
    env: &Rc<EvalEnv>,
    id: NodeId,
    sources: Assignment,
    yield_when_false: bool,
) -> BindingIter {
    let (left, right) = bin_operands(env, id);
    let env = env.clone();
    let mut inner = eval_else_if(&env, id, sources, yield_when_false);
    let mut pending_clear = false;
    let mut done = false;

    Box::new(std::iter::from_fn(move || {
        if done {
            return None;
        }
        loop {
            if pending_clear {
                env.arena.node(id).live.borrow_mut().clear();
                pending_clear = false;
            }
            match inner.next() {
                Some(Err(e)) => {
                    done = true;
                    return Some(Err(e));
                }
                Some(Ok(output)) => {
                    let node = env.arena.node(id);
                    let left_true = !env.arena.node(left).is_false.get();
                    let right_true = !env.arena.node(right).is_false.get();
                    if left_true {
                        update_conclusion(&env, id, &output, &env.arena.conclusions_of(left));
                    } else if right_true {
                        update_conclusion(&env, id, &output, &env.arena.conclusions_of(right));
                    }
                    let fired = !node.live.borrow().is_empty();
                    if fired || yield_when_false {
                        pending_clear = true;
                        return Some(Ok(output));
                    }
                    node.live.borrow_mut().clear();
                    continue;
                }
                None => {
                    done = true;
                    return None;
                }
            }
        }
    }))
}

/// Union over conclusions: both branches are always attempted and their
/// conclusions combine.
pub(crate) fn eval_next(
    env: &Rc<EvalEnv>,
    id: NodeId,
    sources: Assignment,
    yield_when_false: bool,
) -> BindingIter {
    let (left, right) = bin_operands(env, id);
    let env = env.clone();
    let mut inner = eval_union(&env, id, sources, yield_when_false);
    let mut pending_clear = false;
    let mut done = false;

    Box::new(std::iter::from_fn(move || {
        if done {
            return None;
        }
        loop {
            if pending_clear {
                env.arena.node(id).live.borrow_mut().clear();
                pending_clear = false;
            }
            match inner.next() {
                Some(Err(e)) => {
                    done = true;
                    return Some(Err(e));
                }
                Some(Ok(output)) => {
                    let node = env.arena.node(id);
                    if node.left_evaluated.get() {
                        update_conclusion(&env, id, &output, &env.arena.conclusions_of(left));
                    }
                    if node.right_evaluated.get() {
                        update_conclusion(&env, id, &output, &env.arena.conclusions_of(right));
                    }
                    let fired = !node.live.borrow().is_empty();
                    if fired || yield_when_false {
                        pending_clear = true;
                        return Some(Ok(output));
                    }
                    node.live.borrow_mut().clear();
                    continue;
                }
                None => {
                    done = true;
                    return None;
                }
            }
        }
    }))
}
