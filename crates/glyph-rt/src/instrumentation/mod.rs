//! The instrumentation fabric: expression cache plus observer callbacks.
//!
//! Spec §4.3 "Instrumentation": every evaluation of an id-bearing node
//! notifies a set of registered observers (used to drive visualisations)
//! before consulting, and after updating, the expression cache.

pub mod cache;

use crate::ast::template::ExpressionId;
use crate::errors::EngineError;
use crate::values::Value;

pub use cache::ExprCache;

/// The observed outcome of one function call, passed to
/// [`Callbacks::on_function_return`] (spec §4.3 item 5).
#[derive(Debug, Clone)]
pub struct FunctionCall {
    pub id: ExpressionId,
    pub result: Value,
}

/// Observer hooks invoked around node evaluation.
///
/// Mirrors the teacher's `VmTracer` trait (`crates/ouros/src/tracer.rs`):
/// every method has a no-op default so most evaluations pay only the cost
/// of a handful of empty virtual calls, and a caller only overrides the
/// hooks it actually needs (e.g. a visualisation's `on_value`).
pub trait Callbacks {
    /// A node carrying an expression id is about to be (re-)evaluated.
    fn on_enter(&self, _id: ExpressionId) {}

    /// A node carrying an expression id produced `value`.
    fn on_value(&self, _id: ExpressionId, _value: &Value) {}

    /// A call site's callee returned; distinct from `on_value` because a
    /// call site's own id (if any) is wrapped in a
    /// `FunctionCallInstrumentation` node rather than a generic sentry
    /// (spec §4.3 item 5). Returning `Some(value)` tells the evaluator to
    /// discard the callee's own result and unwind with `value` instead —
    /// how a cache-backed observer short-circuits re-execution of a call
    /// it has already observed once.
    fn on_function_return(&self, _call: &FunctionCall) -> Option<Value> {
        None
    }

    /// A panic is unwinding through a node carrying an expression id.
    fn on_panic(&self, _id: ExpressionId, _message: &str) {}

    /// A visualisation attached to `id` needs its expression recomputed;
    /// returning `Err` surfaces as `EngineError::VisualisationExpressionFailed`
    /// to the visualisation's owner, not as a panic through the evaluator.
    fn on_visualisation_update(&self, _id: ExpressionId, _value: &Value) -> Result<(), EngineError> {
        Ok(())
    }
}

/// The default, observing-nothing implementation, used when no
/// visualisation is attached to the current execution context.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallbacks;

impl Callbacks for NoopCallbacks {}

/// Fans a single evaluation's callbacks out to every attached
/// visualisation (spec §4.3 "observers... one per attached visualisation").
#[derive(Default)]
pub struct CallbackList<'a> {
    observers: Vec<&'a dyn Callbacks>,
}

impl<'a> CallbackList<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self { observers: Vec::new() }
    }

    pub fn push(&mut self, observer: &'a dyn Callbacks) {
        self.observers.push(observer);
    }
}

impl Callbacks for CallbackList<'_> {
    fn on_enter(&self, id: ExpressionId) {
        for o in &self.observers {
            o.on_enter(id);
        }
    }

    fn on_value(&self, id: ExpressionId, value: &Value) {
        for o in &self.observers {
            o.on_value(id, value);
        }
    }

    fn on_function_return(&self, call: &FunctionCall) -> Option<Value> {
        let mut replacement = None;
        for o in &self.observers {
            if let Some(value) = o.on_function_return(call) {
                replacement = Some(value);
            }
        }
        replacement
    }

    fn on_panic(&self, id: ExpressionId, message: &str) {
        for o in &self.observers {
            o.on_panic(id, message);
        }
    }

    fn on_visualisation_update(&self, id: ExpressionId, value: &Value) -> Result<(), EngineError> {
        for o in &self.observers {
            o.on_visualisation_update(id, value)?;
        }
        Ok(())
    }
}
