//! The tail-call trampoline's per-call-site optimiser state and the
//! pending-call payload it hands back up to the driving loop.

use std::rc::{Rc, Weak};

use crate::{ast::node::CallTarget, ast::template::LocalScope, call::ArgSchema, values::Value};

/// A call a tail position wants performed, handed up through
/// `EvalResult::Err(Signal::TailCall(..))` to the nearest trampoline loop
/// (spec §4.2 "instead of recursing, a tail-position call returns a pending
/// call descriptor to its enclosing loop, which invokes it and reuses the
/// native frame").
#[derive(Debug, Clone)]
pub struct PendingTailCall {
    pub target: Rc<CallTarget>,
    pub captured_scope: Option<LocalScope>,
    pub args: Vec<Value>,
    pub schema: Rc<ArgSchema>,
}

/// The state machine driving one call site's tail-call classification.
///
/// Spec §4.2: "A call site starts unclassified. After its first call it
/// becomes monomorphic-tail if the callee was called from tail position.
/// After observing the callee recur into itself from that same tail
/// position, the site is promoted to loop-optimised and all further calls
/// through it are driven iteratively rather than recursively."
#[derive(Debug, Clone, Default)]
pub enum CallOptimiserState {
    #[default]
    Fresh,
    /// Exactly one callee has been observed from this tail position so far.
    Simple { last_target: Weak<CallTarget> },
    /// The callee has recurred into itself from this position at least
    /// once; all future calls through this site are trampolined.
    Looping,
}

impl CallOptimiserState {
    /// Records an observed call to `target` from this site, returning
    /// whether the site should (now or still) be driven as a loop.
    pub fn observe(&mut self, target: &Rc<CallTarget>) -> bool {
        match self {
            Self::Fresh => {
                *self = Self::Simple {
                    last_target: Rc::downgrade(target),
                };
                false
            }
            Self::Simple { last_target } => {
                let same = last_target.upgrade().is_some_and(|prev| Rc::ptr_eq(&prev, target));
                if same {
                    *self = Self::Looping;
                    true
                } else {
                    *last_target = Rc::downgrade(target);
                    false
                }
            }
            Self::Looping => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::template::FunctionTemplate;

    fn dummy_target() -> Rc<CallTarget> {
        let template = FunctionTemplate::new(
            crate::intern::intern("f"),
            0,
            Vec::new(),
            Vec::new(),
            0,
            crate::ast::template::TaggedTemplate::new(crate::ast::template::NodeTemplate::Literal(Value::Unit)),
            None,
            crate::types::scope::ModuleScope::new(crate::intern::intern("TestScope")),
        );
        CallTarget::instantiate(&template, 3)
    }

    #[test]
    fn promotes_to_looping_on_second_identical_callee() {
        let target = dummy_target();
        let mut state = CallOptimiserState::default();
        assert!(!state.observe(&target));
        assert!(state.observe(&target));
        assert!(matches!(state, CallOptimiserState::Looping));
    }

    #[test]
    fn stays_simple_across_distinct_callees() {
        let a = dummy_target();
        let b = dummy_target();
        let mut state = CallOptimiserState::default();
        assert!(!state.observe(&a));
        assert!(!state.observe(&b));
        assert!(matches!(state, CallOptimiserState::Simple { .. }));
    }
}
