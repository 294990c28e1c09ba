//! # Symbolic expression tree
//!
//! Expressions form a tree of nodes owned by an arena; links are indices, the
//! parent link is a back-reference that evaluation may override (the eval
//! parent). Every node carries the transient state the evaluator needs:
//! the `is_false` flag of its most recent yield, per-parent duplicate
//! tracking split by truth branch, and the indexed caches of binary
//! operators.
//!
//! Evaluation is lazy: each node produces a boxed iterator of assignments
//! (node id to hashed value). Iterators are built from `iter::from_fn` state
//! machines so deep queries never recurse through the native stack more than
//! the expression depth. Failures surface through the iterator and abort it.

pub(crate) mod comparator;
pub(crate) mod logical;
pub(crate) mod mapping;
pub(crate) mod quantifier;
pub(crate) mod selector;
pub(crate) mod variable;

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;

use crate::cache::{Assignment, IndexedCache, SeenSet};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::graph::{SymbolGraph, TypeId};
use crate::hashed::HashedValue;
use crate::value::Value;

pub(crate) use comparator::CmpOp;

/// Index of a node in its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(pub(crate) u32);

/// Index of a conclusion in its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ConclusionId(pub(crate) u32);

/// Public handle to an expression node in the current session's arena.
#[derive(Debug, Clone, Copy)]
pub struct Expr(pub(crate) NodeId);

/// How a variable obtains its values.
#[derive(Debug, Clone)]
pub(crate) enum Domain {
    /// Explicit values, deduplicated by id; empty means zero outputs.
    Explicit(Vec<HashedValue>),
    /// All registered instances of the type, subtypes included.
    Registry(TypeId),
    /// No domain; the variable must be constructible or already bound.
    None,
}

#[derive(Debug)]
pub(crate) struct VarData {
    pub ty: Option<TypeId>,
    pub name: String,
    pub domain: Domain,
    /// Child variables from constructor keyword arguments.
    pub child_vars: Vec<(String, NodeId)>,
    /// Predicate-typed: construct then invoke for a truth value.
    pub predicate: bool,
    /// Inferred: construct new instances from child variables.
    pub inferred: Cell<bool>,
    /// Whether the per-type instance cache is trie-indexed.
    pub indexed: bool,
    pub literal: bool,
}

#[derive(Debug)]
pub(crate) struct BinData {
    pub left: Cell<NodeId>,
    pub right: Cell<NodeId>,
}

impl BinData {
    pub fn new(left: NodeId, right: NodeId) -> Self {
        BinData { left: Cell::new(left), right: Cell::new(right) }
    }
}

#[derive(Debug)]
pub(crate) struct CmpData {
    pub left: NodeId,
    pub right: NodeId,
    pub op: Cell<CmpOp>,
}

#[derive(Debug)]
pub(crate) struct DescData {
    pub selected: Vec<NodeId>,
    pub child: Cell<Option<NodeId>>,
}

/// Tagged node shapes. Common state lives on [`Node`].
#[derive(Debug)]
pub(crate) enum NodeKind {
    Var(VarData),
    Attribute { child: NodeId, attr: String },
    Index { child: NodeId, key: Value },
    Call { child: NodeId, method: String, args: Vec<Value> },
    Flatten { child: NodeId },
    Comparator(CmpData),
    And(BinData),
    ElseIf(BinData),
    Union(BinData),
    ExceptIf(BinData),
    Alternative(BinData),
    Next(BinData),
    ForAll(BinData),
    Exists(BinData),
    Entity(DescData),
    SetOf(DescData),
    An { child: NodeId },
    The { child: NodeId },
}

pub(crate) struct Node {
    pub uid: u64,
    pub kind: NodeKind,
    pub parent: Cell<Option<NodeId>>,
    pub eval_parent: Cell<Option<NodeId>>,
    pub is_false: Cell<bool>,
    pub invert: Cell<bool>,
    /// Conclusions attached by rule construction.
    pub attached: RefCell<Vec<ConclusionId>>,
    /// Conclusions selected by the most recent yield (conclusion selectors).
    pub live: RefCell<Vec<ConclusionId>>,
    /// Per-(eval-)parent duplicate tracking, one seen set per truth branch.
    pub seen_by_parent: RefCell<HashMap<u64, [SeenSet; 2]>>,
    pub cache: RefCell<IndexedCache>,
    pub right_cache: RefCell<IndexedCache>,
    /// Conclusion-firing dedup, one seen set per truth branch.
    pub concluded: RefCell<[SeenSet; 2]>,
    pub left_evaluated: Cell<bool>,
    pub right_evaluated: Cell<bool>,
    /// Variables already reported in the Cartesian-product warning.
    pub warned: RefCell<HashSet<u64>>,
    projection_memo: RefCell<HashMap<(u64, bool), Rc<HashSet<u64>>>>,
    vars_memo: RefCell<Option<Rc<Vec<NodeId>>>>,
}

impl Node {
    fn new(uid: u64, kind: NodeKind) -> Self {
        Node {
            uid,
            kind,
            parent: Cell::new(None),
            eval_parent: Cell::new(None),
            is_false: Cell::new(false),
            invert: Cell::new(false),
            attached: RefCell::new(Vec::new()),
            live: RefCell::new(Vec::new()),
            seen_by_parent: RefCell::new(HashMap::new()),
            cache: RefCell::new(IndexedCache::new()),
            right_cache: RefCell::new(IndexedCache::new()),
            concluded: RefCell::new([SeenSet::new(), SeenSet::new()]),
            left_evaluated: Cell::new(false),
            right_evaluated: Cell::new(false),
            warned: RefCell::new(HashSet::new()),
            projection_memo: RefCell::new(HashMap::new()),
            vars_memo: RefCell::new(None),
        }
    }

    pub(crate) fn is_literal(&self) -> bool {
        matches!(&self.kind, NodeKind::Var(d) if d.literal)
    }
}

/// Arena owning all nodes and conclusions of a session.
#[derive(Default)]
pub(crate) struct Arena {
    nodes: RefCell<Vec<Rc<Node>>>,
    conclusions: RefCell<Vec<Rc<crate::rule::Conclusion>>>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: NodeId) -> Rc<Node> {
        self.nodes.borrow()[id.0 as usize].clone()
    }

    pub fn conclusion(&self, id: ConclusionId) -> Rc<crate::rule::Conclusion> {
        self.conclusions.borrow()[id.0 as usize].clone()
    }

    pub fn add_conclusion(&self, conclusion: crate::rule::Conclusion) -> ConclusionId {
        let mut list = self.conclusions.borrow_mut();
        let id = ConclusionId(list.len() as u32);
        list.push(Rc::new(conclusion));
        id
    }

    /// Allocate a node, adopt its structural children and initialize the
    /// cache key order of binary operators.
    pub fn alloc(&self, kind: NodeKind) -> NodeId {
        let uid = crate::ids::next_id();
        let id = {
            let mut nodes = self.nodes.borrow_mut();
            let id = NodeId(nodes.len() as u32);
            nodes.push(Rc::new(Node::new(uid, kind)));
            id
        };
        let node = self.node(id);
        for child in structural_children(&node.kind) {
            self.node(child).parent.set(Some(id));
        }
        self.init_caches(id);
        id
    }

    /// Cache keys are the ids of the unique non-literal variables reachable
    /// from both operands; logical operators additionally key their
    /// right-branch cache on the right side's variables.
    fn init_caches(&self, id: NodeId) {
        let node = self.node(id);
        let operands = match &node.kind {
            NodeKind::Comparator(c) => Some((c.left, c.right)),
            NodeKind::And(b)
            | NodeKind::ElseIf(b)
            | NodeKind::Union(b)
            | NodeKind::ExceptIf(b)
            | NodeKind::Alternative(b)
            | NodeKind::Next(b)
            | NodeKind::ForAll(b)
            | NodeKind::Exists(b) => Some((b.left.get(), b.right.get())),
            _ => None,
        };
        let Some((left, right)) = operands else { return };
        let mut keys = self.non_literal_var_uids(left);
        for uid in self.non_literal_var_uids(right) {
            if !keys.contains(&uid) {
                keys.push(uid);
            }
        }
        node.cache.borrow_mut().set_keys(keys);
        if matches!(
            node.kind,
            NodeKind::And(_)
                | NodeKind::ElseIf(_)
                | NodeKind::Union(_)
                | NodeKind::ExceptIf(_)
                | NodeKind::Alternative(_)
                | NodeKind::Next(_)
        ) {
            node.right_cache.borrow_mut().set_keys(self.non_literal_var_uids(right));
        }
    }

    /// All variable instances of a node's subtree, in discovery order.
    pub fn var_instances(&self, id: NodeId) -> Rc<Vec<NodeId>> {
        let node = self.node(id);
        if let Some(cached) = node.vars_memo.borrow().clone() {
            return cached;
        }
        let mut out = Vec::new();
        match &node.kind {
            NodeKind::Var(d) => {
                out.push(id);
                for (_, child) in &d.child_vars {
                    out.extend(self.var_instances(*child).iter().copied());
                }
            }
            NodeKind::Attribute { child, .. }
            | NodeKind::Index { child, .. }
            | NodeKind::Call { child, .. }
            | NodeKind::Flatten { child } => {
                out.extend(self.var_instances(*child).iter().copied());
            }
            NodeKind::Comparator(c) => {
                out.extend(self.var_instances(c.left).iter().copied());
                out.extend(self.var_instances(c.right).iter().copied());
            }
            NodeKind::And(b)
            | NodeKind::ElseIf(b)
            | NodeKind::Union(b)
            | NodeKind::ExceptIf(b)
            | NodeKind::Alternative(b)
            | NodeKind::Next(b)
            | NodeKind::ForAll(b)
            | NodeKind::Exists(b) => {
                out.extend(self.var_instances(b.left.get()).iter().copied());
                out.extend(self.var_instances(b.right.get()).iter().copied());
            }
            NodeKind::Entity(d) | NodeKind::SetOf(d) => {
                for sel in &d.selected {
                    out.extend(self.var_instances(*sel).iter().copied());
                }
                if let Some(child) = d.child.get() {
                    out.extend(self.var_instances(child).iter().copied());
                }
            }
            NodeKind::An { child } | NodeKind::The { child } => {
                out.extend(self.var_instances(*child).iter().copied());
            }
        }
        let out = Rc::new(out);
        *node.vars_memo.borrow_mut() = Some(out.clone());
        out
    }

    /// Unique variable uids of a subtree, insertion order preserved.
    pub fn unique_var_uids(&self, id: NodeId) -> Vec<u64> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for var in self.var_instances(id).iter() {
            let uid = self.node(*var).uid;
            if seen.insert(uid) {
                out.push(uid);
            }
        }
        out
    }

    /// Unique non-literal variable uids of a subtree.
    pub fn non_literal_var_uids(&self, id: NodeId) -> Vec<u64> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for var in self.var_instances(id).iter() {
            let node = self.node(*var);
            if !node.is_literal() && seen.insert(node.uid) {
                out.push(node.uid);
            }
        }
        out
    }

    /// The effective parent: the eval-parent override when present, else the
    /// tree parent.
    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        let node = self.node(id);
        node.eval_parent.get().or_else(|| node.parent.get())
    }

    /// The expression a node delegates its variable behaviour to.
    pub fn var_of(&self, id: NodeId) -> NodeId {
        let node = self.node(id);
        match &node.kind {
            NodeKind::Entity(d) => d.selected.first().map_or(id, |s| self.var_of(*s)),
            NodeKind::An { child } | NodeKind::The { child } => self.var_of(*child),
            _ => id,
        }
    }

    /// Walk the child chain from the root down to the conditions root: the
    /// first node whose parent is a query descriptor.
    pub fn conditions_root(&self, root: NodeId) -> NodeId {
        let mut current = root;
        loop {
            let next = match &self.node(current).kind {
                NodeKind::An { child } | NodeKind::The { child } => Some(*child),
                NodeKind::Entity(d) | NodeKind::SetOf(d) => d.child.get(),
                _ => None,
            };
            let Some(next) = next else { return current };
            current = next;
            if let Some(parent) = self.node(current).parent.get() {
                if matches!(self.node(parent).kind, NodeKind::Entity(_) | NodeKind::SetOf(_)) {
                    return current;
                }
            }
        }
    }

    /// Replace `old` with `new` in the parent's child slot.
    pub fn replace_child(&self, parent: NodeId, old: NodeId, new: NodeId) {
        let node = self.node(parent);
        match &node.kind {
            NodeKind::Entity(d) | NodeKind::SetOf(d) => {
                if d.child.get() == Some(old) {
                    d.child.set(Some(new));
                }
            }
            NodeKind::And(b)
            | NodeKind::ElseIf(b)
            | NodeKind::Union(b)
            | NodeKind::ExceptIf(b)
            | NodeKind::Alternative(b)
            | NodeKind::Next(b)
            | NodeKind::ForAll(b)
            | NodeKind::Exists(b) => {
                if b.left.get() == old {
                    b.left.set(new);
                }
                if b.right.get() == old {
                    b.right.set(new);
                }
            }
            _ => {}
        }
    }

    /// Recursively clear caches, seen sets and eval-parent overrides.
    pub fn reset_cache(&self, id: NodeId) {
        let node = self.node(id);
        node.seen_by_parent.borrow_mut().clear();
        node.eval_parent.set(None);
        node.cache.borrow_mut().clear();
        node.right_cache.borrow_mut().clear();
        node.live.borrow_mut().clear();
        {
            let mut concluded = node.concluded.borrow_mut();
            concluded[0].clear();
            concluded[1].clear();
        }
        node.warned.borrow_mut().clear();
        node.projection_memo.borrow_mut().clear();
        *node.vars_memo.borrow_mut() = None;
        let attached: Vec<ConclusionId> = node.attached.borrow().clone();
        for conclusion in attached {
            let c = self.conclusion(conclusion);
            for root in c.roots() {
                self.reset_cache(root);
            }
        }
        for child in structural_children(&node.kind) {
            self.reset_cache(child);
        }
    }

    /// Conclusions currently carried by a node: the attached set, plus the
    /// live selection for conclusion selectors.
    pub fn conclusions_of(&self, id: NodeId) -> Vec<ConclusionId> {
        let node = self.node(id);
        let mut out: Vec<ConclusionId> = node.attached.borrow().clone();
        for c in node.live.borrow().iter() {
            if !out.contains(c) {
                out.push(*c);
            }
        }
        out
    }

    fn conclusion_var_uids(&self, id: NodeId, non_literal_only: bool) -> Vec<u64> {
        let mut out = Vec::new();
        for cid in self.conclusions_of(id) {
            let conclusion = self.conclusion(cid);
            for root in conclusion.roots() {
                let vars = if non_literal_only {
                    self.non_literal_var_uids(root)
                } else {
                    self.unique_var_uids(root)
                };
                for uid in vars {
                    if !out.contains(&uid) {
                        out.push(uid);
                    }
                }
            }
        }
        out
    }

    /// The set of variable ids that uniquely identify an output of this node
    /// for its (eval-)parent on the given truth branch.
    pub fn projection(&self, id: NodeId, when_true: bool) -> Rc<HashSet<u64>> {
        let node = self.node(id);
        let parent_key = self.parent_of(id).map_or(node.uid, |p| self.node(p).uid);
        if let Some(memo) = node.projection_memo.borrow().get(&(parent_key, when_true)) {
            return memo.clone();
        }
        let mut proj: HashSet<u64> = HashSet::new();
        match &node.kind {
            // Binary operators include both operands' variables symmetrically.
            NodeKind::Comparator(_)
            | NodeKind::And(_)
            | NodeKind::ForAll(_)
            | NodeKind::Exists(_) => {
                let (left, right) = self.operands(id);
                proj.extend(self.unique_var_uids(left));
                proj.extend(self.unique_var_uids(right));
                if when_true {
                    proj.extend(self.conclusion_var_uids(id, false));
                }
                if let Some(parent) = self.parent_of(id) {
                    proj.extend(self.projection(parent, when_true).iter().copied());
                }
            }
            NodeKind::ElseIf(_) | NodeKind::Union(_) | NodeKind::Alternative(_) | NodeKind::Next(_) => {
                let (left, right) = self.operands(id);
                proj.extend(self.unique_var_uids(left));
                proj.extend(self.unique_var_uids(right));
                if when_true {
                    proj.extend(self.conclusion_var_uids(left, false));
                    proj.extend(self.conclusion_var_uids(right, false));
                }
                if let Some(parent) = self.parent_of(id) {
                    proj.extend(self.projection(parent, when_true).iter().copied());
                }
            }
            NodeKind::ExceptIf(_) => {
                let (left, right) = self.operands(id);
                // When true, the right side's variables identify the
                // exception condition.
                if when_true {
                    proj.extend(self.unique_var_uids(right));
                }
                proj.extend(self.conclusion_var_uids(left, false));
                proj.extend(self.conclusion_var_uids(right, false));
                if let Some(parent) = self.parent_of(id) {
                    proj.extend(self.projection(parent, when_true).iter().copied());
                }
                proj.extend(self.conclusion_var_uids(id, false));
            }
            NodeKind::Entity(d) | NodeKind::SetOf(d) => {
                if let Some(parent) = self.parent_of(id) {
                    proj.extend(self.projection(parent, when_true).iter().copied());
                }
                for sel in &d.selected {
                    proj.insert(self.node(*sel).uid);
                    proj.extend(self.unique_var_uids(*sel));
                }
                if when_true {
                    if let Some(child) = d.child.get() {
                        proj.extend(self.conclusion_var_uids(child, false));
                    }
                }
            }
            NodeKind::An { child } | NodeKind::The { child } => {
                if let Some(parent) = self.parent_of(id) {
                    proj.extend(self.projection(parent, when_true).iter().copied());
                }
                if let NodeKind::Entity(d) | NodeKind::SetOf(d) = &self.node(*child).kind {
                    for sel in &d.selected {
                        proj.insert(self.node(*sel).uid);
                        proj.extend(self.unique_var_uids(*sel));
                    }
                    if when_true {
                        if let Some(cond) = d.child.get() {
                            proj.extend(self.conclusion_var_uids(cond, false));
                        }
                    }
                }
            }
            // Default: the parent's projection plus conclusion variables of
            // the children on the yielding branch.
            _ => {
                if let Some(parent) = self.parent_of(id) {
                    proj.extend(self.projection(parent, when_true).iter().copied());
                }
                if when_true {
                    for child in structural_children(&node.kind) {
                        proj.extend(self.conclusion_var_uids(child, false));
                    }
                }
            }
        }
        let proj = Rc::new(proj);
        node.projection_memo
            .borrow_mut()
            .insert((parent_key, when_true), proj.clone());
        proj
    }

    fn operands(&self, id: NodeId) -> (NodeId, NodeId) {
        match &self.node(id).kind {
            NodeKind::Comparator(c) => (c.left, c.right),
            NodeKind::And(b)
            | NodeKind::ElseIf(b)
            | NodeKind::Union(b)
            | NodeKind::ExceptIf(b)
            | NodeKind::Alternative(b)
            | NodeKind::Next(b)
            | NodeKind::ForAll(b)
            | NodeKind::Exists(b) => (b.left.get(), b.right.get()),
            _ => unreachable!("operands requested for a non-binary node"),
        }
    }

    /// A node yields an output only if that output, restricted to its
    /// projection for the current truth branch, has not been yielded before
    /// under the same (eval-)parent.
    pub fn is_duplicate(&self, id: NodeId, output: &Assignment) -> bool {
        let node = self.node(id);
        let when_true = !node.is_false.get();
        let projection = self.projection(id, when_true);
        if projection.is_empty() {
            return false;
        }
        let required: Assignment = output
            .iter()
            .filter(|(k, _)| projection.contains(*k))
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        if required.is_empty() {
            return false;
        }
        let parent_uid = self.parent_of(id).map_or(node.uid, |p| self.node(p).uid);
        let mut by_parent = node.seen_by_parent.borrow_mut();
        let seen = &mut by_parent.entry(parent_uid).or_insert_with(|| [SeenSet::new(), SeenSet::new()])
            [usize::from(when_true)];
        if seen.check(&required) {
            return true;
        }
        seen.add(&required);
        false
    }

    /// Human-readable node name, used in warnings and Debug output.
    pub fn display_name(&self, id: NodeId) -> String {
        let node = self.node(id);
        match &node.kind {
            NodeKind::Var(d) => d.name.clone(),
            NodeKind::Attribute { child, attr } => {
                format!("{}.{attr}", self.display_name(*child))
            }
            NodeKind::Index { child, key } => format!("{}[{}]", self.display_name(*child), key.render()),
            NodeKind::Call { child, method, .. } => {
                format!("{}.{method}()", self.display_name(*child))
            }
            NodeKind::Flatten { child } => format!("flatten({})", self.display_name(*child)),
            NodeKind::Comparator(c) => format!(
                "{} {} {}",
                self.display_name(c.left),
                c.op.get().symbol(),
                self.display_name(c.right)
            ),
            NodeKind::And(_) => "and".into(),
            NodeKind::ElseIf(_) => "else-if".into(),
            NodeKind::Union(_) => "union".into(),
            NodeKind::ExceptIf(_) => "except-if".into(),
            NodeKind::Alternative(_) => "alternative".into(),
            NodeKind::Next(_) => "next".into(),
            NodeKind::ForAll(_) => "for-all".into(),
            NodeKind::Exists(_) => "exists".into(),
            NodeKind::Entity(d) | NodeKind::SetOf(d) => {
                let names: Vec<String> = d.selected.iter().map(|s| self.display_name(*s)).collect();
                format!("({})", names.join(", "))
            }
            NodeKind::An { .. } => "an".into(),
            NodeKind::The { .. } => "the".into(),
        }
    }
}

/// Structural children of a node, used by adoption and reset.
pub(crate) fn structural_children(kind: &NodeKind) -> Vec<NodeId> {
    match kind {
        NodeKind::Var(d) => d.child_vars.iter().map(|(_, id)| *id).collect(),
        NodeKind::Attribute { child, .. }
        | NodeKind::Index { child, .. }
        | NodeKind::Call { child, .. }
        | NodeKind::Flatten { child }
        | NodeKind::An { child }
        | NodeKind::The { child } => vec![*child],
        NodeKind::Comparator(c) => vec![c.left, c.right],
        NodeKind::And(b)
        | NodeKind::ElseIf(b)
        | NodeKind::Union(b)
        | NodeKind::ExceptIf(b)
        | NodeKind::Alternative(b)
        | NodeKind::Next(b)
        | NodeKind::ForAll(b)
        | NodeKind::Exists(b) => vec![b.left.get(), b.right.get()],
        NodeKind::Entity(d) | NodeKind::SetOf(d) => {
            let mut out = d.selected.clone();
            if let Some(child) = d.child.get() {
                out.push(child);
            }
            out
        }
    }
}

/// Evaluation context shared by all iterators of one `evaluate()` call.
pub(crate) struct EvalEnv {
    pub arena: Rc<Arena>,
    pub graph: Arc<SymbolGraph>,
    pub config: EngineConfig,
    /// Set for rule trees; disables the AND right-cache shortcut so
    /// conclusion selection is never skipped by a cache hit.
    pub is_rule: bool,
}

impl EvalEnv {
    pub fn caching(&self) -> bool {
        self.config.evaluation.caching
    }
}

pub(crate) type BindingIter = Box<dyn Iterator<Item = Result<Assignment>>>;

pub(crate) fn once_ok(assignment: Assignment) -> BindingIter {
    Box::new(std::iter::once(Ok(assignment)))
}

pub(crate) fn once_err(err: crate::error::EqlError) -> BindingIter {
    Box::new(std::iter::once(Err(err)))
}

/// Lazily evaluate a node under the given sources.
///
/// `yield_when_false` requests outputs even when the node's truth is false
/// (the caller filters); `parent` overrides the tree parent for projection
/// and duplicate suppression.
pub(crate) fn evaluate(
    env: &Rc<EvalEnv>,
    id: NodeId,
    sources: Assignment,
    yield_when_false: bool,
    parent: Option<NodeId>,
) -> BindingIter {
    let node = env.arena.node(id);
    node.eval_parent.set(parent);
    match &node.kind {
        NodeKind::Var(_) => variable::eval_variable(env, id, sources, yield_when_false),
        NodeKind::Attribute { .. } | NodeKind::Index { .. } | NodeKind::Call { .. } | NodeKind::Flatten { .. } => {
            mapping::eval_mapping(env, id, sources, yield_when_false)
        }
        NodeKind::Comparator(_) => comparator::eval_comparator(env, id, sources, yield_when_false),
        NodeKind::And(_) => logical::eval_and(env, id, sources, yield_when_false),
        NodeKind::ElseIf(_) => logical::eval_else_if(env, id, sources, yield_when_false),
        NodeKind::Union(_) => logical::eval_union(env, id, sources, yield_when_false),
        NodeKind::ForAll(_) => logical::eval_for_all(env, id, sources),
        NodeKind::Exists(_) => logical::eval_exists(env, id, sources),
        NodeKind::ExceptIf(_) => selector::eval_except_if(env, id, sources, yield_when_false),
        NodeKind::Alternative(_) => selector::eval_alternative(env, id, sources, yield_when_false),
        NodeKind::Next(_) => selector::eval_next(env, id, sources, yield_when_false),
        NodeKind::Entity(_) | NodeKind::SetOf(_) => quantifier::eval_descriptor(env, id, sources, yield_when_false),
        NodeKind::An { .. } | NodeKind::The { .. } => quantifier::eval_quantifier(env, id, sources, yield_when_false),
    }
}

/// Yield cached outputs: set the node's truth from the leaf and apply the
/// duplicate check to false outputs.
pub(crate) fn yield_from_cache(
    env: &Rc<EvalEnv>,
    id: NodeId,
    sources: &Assignment,
    use_right_cache: bool,
) -> BindingIter {
    let node = env.arena.node(id);
    let entries = if use_right_cache {
        node.right_cache.borrow().retrieve(sources)
    } else {
        node.cache.borrow().retrieve(sources)
    };
    let env = env.clone();
    Box::new(entries.into_iter().filter_map(move |(output, leaf_is_false)| {
        let node = env.arena.node(id);
        node.is_false.set(leaf_is_false);
        if leaf_is_false && env.arena.is_duplicate(id, &output) {
            return None;
        }
        Some(Ok(output))
    }))
}

/// Record an output in a node's cache, restricted to the cache key set.
pub(crate) fn update_cache(env: &Rc<EvalEnv>, id: NodeId, values: &Assignment, use_right_cache: bool) {
    if !env.caching() {
        return;
    }
    let node = env.arena.node(id);
    let mut cache = if use_right_cache {
        node.right_cache.borrow_mut()
    } else {
        node.cache.borrow_mut()
    };
    let filtered: Assignment = values
        .iter()
        .filter(|(k, _)| cache.keys().contains(k))
        .map(|(k, v)| (*k, v.clone()))
        .collect();
    cache.insert(&filtered, node.is_false.get(), true);
}

/// `{**base, **overlay}`: overlay wins.
pub(crate) fn merged(base: &Assignment, overlay: &Assignment) -> Assignment {
    let mut out = base.clone();
    for (k, v) in overlay {
        out.insert(*k, v.clone());
    }
    out
}
