//! Execution contexts: the unit of "run this expression, observe its
//! results" per spec §5 and §6.1.
//!
//! Grounded in the teacher's `SessionManager`/`ReplSession` split
//! (`crates/ouros/src/session_manager.rs`): one named session per client,
//! each owning its own interpreter state, history and resource limits,
//! looked up by id out of a registry. Generalized to spec's
//! `ExecutionContext`: a stack of call frames, a set of attached
//! visualisations, and its own private call-target cache (see `DESIGN.md`
//! "Call-target instantiation" for why the cache is per-context rather than
//! shared). The teacher's `SessionManager` itself runs every session
//! in-process on one thread; the worker-thread pool this context is pinned
//! to (`crate::jobqueue`) is not part of that design — see `jobqueue.rs`'s
//! own module doc for where that comes from.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::{
    ast::node::{CallTarget, ExprNode},
    ast::template::{ExpressionId, FunctionTemplate},
    errors::EngineError,
    instrumentation::ExprCache,
    intern::InternedStr,
    values::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VisualisationId(pub u64);

/// One frame of the explicit call stack exposed through the public API,
/// spec §6.1 items 1-2: "push an explicit method call or a local-call
/// (re-entry into an already-evaluated expression) onto a context's stack;
/// pop the top frame".
#[derive(Debug, Clone, PartialEq)]
pub enum StackItem {
    /// Call `method_name` on the value produced by evaluating `module`'s
    /// entry point, optionally against a specific receiver type (used to
    /// disambiguate when the entry point itself is polymorphic).
    ExplicitCall {
        module: InternedStr,
        type_name: Option<InternedStr>,
        method_name: InternedStr,
    },
    /// Re-enter at an already-identified expression within the current top
    /// frame, without a fresh method dispatch.
    LocalCall { expression_id: ExpressionId },
}

/// A visualisation attached to one expression: an independent expression
/// evaluated against that expression's current value whenever it changes
/// (spec §5 "visualisation attach/modify/detach atomicity").
#[derive(Debug, Clone)]
pub struct Visualisation {
    pub id: VisualisationId,
    pub expression_id: ExpressionId,
    pub visualisation_module: InternedStr,
    pub visualisation_expression: String,
}

static NEXT_CONTEXT_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
static NEXT_VISUALISATION_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

/// One execution context: a call stack, its attached visualisations, and
/// its private, lazily-populated call-target cache.
///
/// `!Send` by construction (its fields hold `Rc`s): an `ExecutionContext`
/// is pinned to the worker thread that created it for its entire lifetime
/// (spec §5 "Concurrency model"; see `crate::jobqueue`).
#[derive(Debug)]
pub struct ExecutionContext {
    pub id: ContextId,
    pub root_module: InternedStr,
    stack: RefCell<Vec<StackItem>>,
    visualisations: RefCell<HashMap<VisualisationId, Visualisation>>,
    call_targets: RefCell<HashMap<crate::ast::template::FunctionTemplateId, Rc<CallTarget>>>,
    pub expr_cache: ExprCache,
    cancelled: Cell<bool>,
    pic_capacity: usize,
    /// Call-target roots (by `Rc::as_ptr` identity) currently active on this
    /// context's native call stack, innermost last; see [`Self::begin_call`].
    active_call_roots: RefCell<Vec<usize>>,
    /// Whether the innermost live [`CallRootGuard`] is a suppressed
    /// recursive re-entry (spec §4.3 item 2).
    instrumentation_suppressed: Cell<bool>,
    /// The arguments each call-target root was last invoked with at the top
    /// frame, used to detect a fresh top-level call with different
    /// arguments so its stale cached subexpression values can be dropped
    /// before evaluation (see `DESIGN.md`'s cross-call cache-scoping entry).
    last_call_args: RefCell<HashMap<usize, Vec<Value>>>,
    /// Current depth of genuinely-recursive (non-tail) `call_function`
    /// activations on this context's native call stack. The trampoline loop
    /// itself never increases this — only a fresh, non-looping call does
    /// (spec §4.2's "non-tail calls... the common case compiles to a direct
    /// invocation" consuming one native frame each, as opposed to a
    /// trampolined tail call, which reuses the same frame).
    native_depth: Cell<usize>,
    max_native_recursion: usize,
}

impl ExecutionContext {
    #[must_use]
    pub fn new(root_module: InternedStr, pic_capacity: usize) -> Self {
        Self::with_max_native_recursion(root_module, pic_capacity, crate::config::DEFAULT_MAX_NATIVE_RECURSION)
    }

    #[must_use]
    pub fn with_max_native_recursion(root_module: InternedStr, pic_capacity: usize, max_native_recursion: usize) -> Self {
        Self {
            id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed)),
            root_module,
            stack: RefCell::new(Vec::new()),
            visualisations: RefCell::new(HashMap::new()),
            call_targets: RefCell::new(HashMap::new()),
            expr_cache: ExprCache::new(),
            cancelled: Cell::new(false),
            pic_capacity,
            active_call_roots: RefCell::new(Vec::new()),
            instrumentation_suppressed: Cell::new(false),
            last_call_args: RefCell::new(HashMap::new()),
            native_depth: Cell::new(0),
            max_native_recursion: max_native_recursion.max(1),
        }
    }

    pub fn push(&self, item: StackItem) {
        self.stack.borrow_mut().push(item);
    }

    pub fn pop(&self) -> Result<StackItem, EngineError> {
        self.stack.borrow_mut().pop().ok_or(EngineError::EmptyStack)
    }

    #[must_use]
    pub fn stack_depth(&self) -> usize {
        self.stack.borrow().len()
    }

    #[must_use]
    pub fn top(&self) -> Option<StackItem> {
        self.stack.borrow().last().cloned()
    }

    /// Returns this context's shared, mutable call-target for `template`,
    /// instantiating one on first use. Every call to `template` within this
    /// context funnels through the same `CallTarget`, which is exactly what
    /// lets its PIC and tail-call state accumulate across repeated calls.
    pub fn call_target_for(&self, template: &Rc<FunctionTemplate>) -> Rc<CallTarget> {
        if let Some(existing) = self.call_targets.borrow().get(&template.id) {
            return Rc::clone(existing);
        }
        let target = CallTarget::instantiate(template, self.pic_capacity);
        self.call_targets.borrow_mut().insert(template.id, Rc::clone(&target));
        target
    }

    pub fn attach_visualisation(&self, expression_id: ExpressionId, module: InternedStr, expression: String) -> VisualisationId {
        let id = VisualisationId(NEXT_VISUALISATION_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed));
        self.visualisations.borrow_mut().insert(
            id,
            Visualisation {
                id,
                expression_id,
                visualisation_module: module,
                visualisation_expression: expression,
            },
        );
        id
    }

    pub fn modify_visualisation(&self, id: VisualisationId, expression: String) -> Result<(), EngineError> {
        let mut visualisations = self.visualisations.borrow_mut();
        let vis = visualisations
            .get_mut(&id)
            .ok_or(EngineError::VisualisationNotFound { id: id.0 })?;
        vis.visualisation_expression = expression;
        Ok(())
    }

    pub fn detach_visualisation(&self, id: VisualisationId) -> Result<(), EngineError> {
        self.visualisations
            .borrow_mut()
            .remove(&id)
            .map(|_| ())
            .ok_or(EngineError::VisualisationNotFound { id: id.0 })
    }

    #[must_use]
    pub fn visualisations_for(&self, expression_id: ExpressionId) -> Vec<Visualisation> {
        self.visualisations
            .borrow()
            .values()
            .filter(|v| v.expression_id == expression_id)
            .cloned()
            .collect()
    }

    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }

    /// Clears per-function specialisation state without discarding the
    /// context itself, invoked after a module edit invalidates its compiled
    /// call targets (spec §6.1 item 4).
    pub fn reset_specialisation_state(&self) {
        self.call_targets.borrow_mut().clear();
        self.expr_cache.invalidate_all();
        self.last_call_args.borrow_mut().clear();
    }

    /// Begins one activation of `root` on this context's native call stack
    /// (spec §4.3 item 2: "instrumentation and caching apply only within
    /// the observed call-target's root span, and only for its top frame").
    ///
    /// If `root` is already active further up this context's call stack,
    /// this activation is a recursive re-entry and instrumentation is
    /// suppressed for its duration (nested calls to a *different*
    /// call-target from within it are unaffected — each activation's
    /// suppression state is computed independently and restored when the
    /// returned guard drops).
    ///
    /// Otherwise this is a fresh top-level activation. If `args` differ
    /// from the arguments `root` was last top-level-invoked with, every
    /// cached expression id in `root`'s own subtree is invalidated before
    /// evaluation proceeds — without this, two top-level calls to the same
    /// function with different arguments would read back each other's
    /// stale cached subexpression values, since every call to one
    /// `FunctionTemplate` within a context shares the same mutable root
    /// (see `Self::call_target_for`). A repeated call with unchanged
    /// arguments leaves the cache untouched, so it still hits.
    pub fn begin_call(&self, root: &Rc<ExprNode>, args: &[Value]) -> CallRootGuard<'_> {
        let root_ptr = Rc::as_ptr(root) as usize;
        let is_reentrant = self.active_call_roots.borrow().contains(&root_ptr);
        let previous_suppressed = self.instrumentation_suppressed.get();

        if !is_reentrant {
            let args_changed = self
                .last_call_args
                .borrow()
                .get(&root_ptr)
                .map_or(true, |prev| prev.as_slice() != args);
            if args_changed {
                let mut ids = Vec::new();
                crate::ast::node::collect_expression_ids(root, &mut ids);
                for id in ids {
                    self.expr_cache.invalidate(id);
                }
            }
            self.last_call_args.borrow_mut().insert(root_ptr, args.to_vec());
        }

        self.instrumentation_suppressed.set(previous_suppressed || is_reentrant);
        self.active_call_roots.borrow_mut().push(root_ptr);
        CallRootGuard {
            ectx: self,
            previous_suppressed,
        }
    }

    /// Whether the innermost live [`CallRootGuard`] marks a suppressed
    /// recursive re-entry; `eval_node` consults this before touching the
    /// expression cache or firing callbacks on an id-bearing node.
    #[must_use]
    pub fn instrumentation_suppressed(&self) -> bool {
        self.instrumentation_suppressed.get()
    }

    /// Enters one genuinely-recursive `call_function` activation, bumping
    /// this context's native-recursion depth counter and failing with
    /// `EngineError::Internal` rather than a real Rust stack overflow once
    /// `max_native_recursion` is exceeded (spec §8 property 2's "bounded
    /// native stack" guarantee is for *tail* recursion specifically — this
    /// is the matching guard for the non-tail case the trampoline
    /// deliberately leaves on the native stack, spec §4.2 "leaving non-tail
    /// calls on the native stack").
    pub fn enter_native_frame(&self) -> Result<NativeDepthGuard<'_>, EngineError> {
        let depth = self.native_depth.get();
        if depth >= self.max_native_recursion {
            return Err(EngineError::Internal(format!(
                "native recursion depth exceeded ({depth} >= {})",
                self.max_native_recursion
            )));
        }
        self.native_depth.set(depth + 1);
        Ok(NativeDepthGuard { ectx: self })
    }
}

/// RAII guard returned by [`ExecutionContext::begin_call`]; pops its root
/// off the context's active-call stack and restores the previous
/// suppression state when dropped.
pub struct CallRootGuard<'a> {
    ectx: &'a ExecutionContext,
    previous_suppressed: bool,
}

impl Drop for CallRootGuard<'_> {
    fn drop(&mut self) {
        self.ectx.active_call_roots.borrow_mut().pop();
        self.ectx.instrumentation_suppressed.set(self.previous_suppressed);
    }
}

/// RAII guard returned by [`ExecutionContext::enter_native_frame`]; restores
/// the native-recursion depth counter when a `call_function` activation
/// returns (normally, via a panic, or via a tail call escaping to an
/// enclosing trampoline loop).
pub struct NativeDepthGuard<'a> {
    ectx: &'a ExecutionContext,
}

impl Drop for NativeDepthGuard<'_> {
    fn drop(&mut self) {
        self.ectx.native_depth.set(self.ectx.native_depth.get() - 1);
    }
}

/// Convenience value for pushing/popping onto the explicit-call-style
/// stack from the public API when a caller only has a method name.
#[must_use]
pub fn explicit_call(module: InternedStr, method_name: InternedStr) -> StackItem {
    StackItem::ExplicitCall {
        module,
        type_name: None,
        method_name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::intern;

    #[test]
    fn push_pop_round_trips() {
        let ctx = ExecutionContext::new(intern("M"), 3);
        ctx.push(explicit_call(intern("M"), intern("main")));
        assert_eq!(ctx.stack_depth(), 1);
        let top = ctx.pop().unwrap();
        assert_eq!(top, explicit_call(intern("M"), intern("main")));
        assert!(ctx.pop().is_err());
    }

    #[test]
    fn visualisation_lifecycle() {
        let ctx = ExecutionContext::new(intern("M"), 3);
        let expr_id = ExpressionId::new();
        let vis_id = ctx.attach_visualisation(expr_id, intern("M"), "x -> x".to_owned());
        assert_eq!(ctx.visualisations_for(expr_id).len(), 1);
        ctx.modify_visualisation(vis_id, "x -> x + 1".to_owned()).unwrap();
        ctx.detach_visualisation(vis_id).unwrap();
        assert!(ctx.visualisations_for(expr_id).is_empty());
        assert!(matches!(
            ctx.detach_visualisation(vis_id),
            Err(EngineError::VisualisationNotFound { .. })
        ));
    }

    #[test]
    fn native_frame_guard_releases_depth_on_drop() {
        let ctx = ExecutionContext::with_max_native_recursion(intern("M"), 3, 2);
        {
            let _first = ctx.enter_native_frame().unwrap();
            {
                let _second = ctx.enter_native_frame().unwrap();
                assert!(ctx.enter_native_frame().is_err());
            }
            // Dropping `_second` frees a slot the exhausted call above couldn't use.
            assert!(ctx.enter_native_frame().is_ok());
        }
    }

    #[test]
    fn native_frame_guard_rejects_past_the_configured_depth() {
        let ctx = ExecutionContext::with_max_native_recursion(intern("M"), 3, 1);
        let _guard = ctx.enter_native_frame().unwrap();
        assert!(matches!(ctx.enter_native_frame(), Err(EngineError::Internal(_))));
    }
}
