//! Thread-scoped construction context.
//!
//! Expression construction runs inside a symbolic-mode scope held in
//! thread-local storage: the current mode (query or rule), the stack of
//! enclosing expressions, the node arena, the current symbol graph and the
//! engine configuration. Two threads can construct two independent queries
//! simultaneously; a single expression tree must be evaluated by one thread
//! at a time.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::expr::{Arena, NodeId, NodeKind};
use crate::graph::SymbolGraph;

/// Construction mode: a query searches for matches, a rule infers new
/// instances and relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Query,
    Rule,
}

pub(crate) struct SessionState {
    pub arena: Rc<Arena>,
    pub mode: Option<Mode>,
    pub stack: Vec<NodeId>,
    pub graph: Arc<SymbolGraph>,
    pub config: EngineConfig,
}

thread_local! {
    static SESSION: RefCell<Option<SessionState>> = const { RefCell::new(None) };
}

pub(crate) fn with_session<R>(f: impl FnOnce(&mut SessionState) -> R) -> R {
    SESSION.with(|cell| {
        let mut slot = cell.borrow_mut();
        let state = slot.get_or_insert_with(|| SessionState {
            arena: Rc::new(Arena::new()),
            mode: None,
            stack: Vec::new(),
            graph: SymbolGraph::global(),
            config: EngineConfig::default(),
        });
        f(state)
    })
}

/// Whether a symbolic construction scope is active on this thread.
pub fn in_symbolic_mode() -> bool {
    current_mode().is_some()
}

pub(crate) fn current_mode() -> Option<Mode> {
    with_session(|state| state.mode)
}

pub(crate) fn arena() -> Rc<Arena> {
    with_session(|state| state.arena.clone())
}

pub(crate) fn current_graph() -> Arc<SymbolGraph> {
    with_session(|state| state.graph.clone())
}

pub(crate) fn current_config() -> EngineConfig {
    with_session(|state| state.config.clone())
}

struct ModeGuard {
    previous: Option<Mode>,
}

impl ModeGuard {
    fn set(mode: Option<Mode>) -> Self {
        let previous = with_session(|state| std::mem::replace(&mut state.mode, mode));
        ModeGuard { previous }
    }
}

impl Drop for ModeGuard {
    fn drop(&mut self) {
        let previous = self.previous;
        with_session(|state| state.mode = previous);
    }
}

struct StackGuard {
    pushed: bool,
}

impl StackGuard {
    fn push(node: Option<NodeId>) -> Self {
        if let Some(node) = node {
            with_session(|state| state.stack.push(node));
            StackGuard { pushed: true }
        } else {
            StackGuard { pushed: false }
        }
    }
}

impl Drop for StackGuard {
    fn drop(&mut self) {
        if self.pushed {
            with_session(|state| {
                state.stack.pop();
            });
        }
    }
}

/// Run `f` in query construction mode.
pub fn symbolic_mode<R>(f: impl FnOnce() -> R) -> R {
    let _guard = ModeGuard::set(Some(Mode::Query));
    f()
}

/// Run `f` in rule construction mode without entering a query.
pub fn rule_mode<R>(f: impl FnOnce() -> R) -> R {
    let _guard = ModeGuard::set(Some(Mode::Rule));
    f()
}

/// Run `f` in rule construction mode with `query` entered: its conditions
/// root becomes the attachment point for conclusions and branch builders,
/// and the query is marked as a rule.
pub fn rule_mode_for<R>(query: &crate::Query, f: impl FnOnce() -> R) -> R {
    query.is_rule.set(true);
    let conditions_root = query.arena.conditions_root(query.root);
    let _mode = ModeGuard::set(Some(Mode::Rule));
    let _stack = StackGuard::push(Some(conditions_root));
    f()
}

/// Run `f` with a specific symbol graph as the current one. Queries capture
/// the current graph at construction time.
pub fn with_graph<R>(graph: &Arc<SymbolGraph>, f: impl FnOnce() -> R) -> R {
    let previous = with_session(|state| std::mem::replace(&mut state.graph, graph.clone()));
    let result = f();
    with_session(|state| state.graph = previous);
    result
}

/// Run `f` with a specific engine configuration.
pub fn with_config<R>(config: &EngineConfig, f: impl FnOnce() -> R) -> R {
    let previous = with_session(|state| std::mem::replace(&mut state.config, config.clone()));
    let result = f();
    with_session(|state| state.config = previous);
    result
}

/// The selected variable of the query enclosing the current construction
/// stack, used to implicitly bind a predicate's first argument.
pub(crate) fn enclosing_selected_variable() -> Option<NodeId> {
    with_session(|state| {
        let top = *state.stack.last()?;
        // Walk up to the quantifier root.
        let mut current = top;
        loop {
            match state.arena.node(current).parent.get() {
                Some(parent) => current = parent,
                None => break,
            }
        }
        match &state.arena.node(current).kind {
            NodeKind::An { child } | NodeKind::The { child } => {
                match &state.arena.node(*child).kind {
                    NodeKind::Entity(d) | NodeKind::SetOf(d) => d.selected.first().copied(),
                    _ => None,
                }
            }
            _ => None,
        }
    })
}
