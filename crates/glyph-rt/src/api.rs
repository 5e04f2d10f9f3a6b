//! The public API surface, SPEC_FULL §6.1 "Public operations".
//!
//! [`Engine`] is the handle a host process actually drives: it owns the
//! bounded worker pool ([`crate::jobqueue::EngineHandle`]) and translates
//! its `String`-keyed, `Result<_, String>` job responses into the engine's
//! proper [`EngineError`] taxonomy. Grounded in the teacher's top-level
//! `Interpreter` facade (`crates/ouros/src/lib.rs`), which plays the same
//! role over its own session manager.

use crate::{
    config::EngineConfig,
    context::{ContextId, VisualisationId},
    errors::EngineError,
    jobqueue::{BoundaryValue, EngineHandle, EvaluationFailure},
};

fn to_engine_error(message: String) -> EngineError {
    EngineError::Internal(message)
}

/// Preserves a panic's origin expression id across the `Evaluate` job's
/// boundary (spec §8 scenario 5) instead of flattening it to `Internal`.
fn evaluation_error(failure: EvaluationFailure) -> EngineError {
    match failure.origin {
        Some(origin) => EngineError::Panicked { message: failure.message, origin: Some(origin) },
        None => EngineError::Internal(failure.message),
    }
}

/// The embeddable entry point: one bounded worker pool, handing out
/// execution contexts and routing requests to whichever worker owns them.
pub struct Engine {
    handle: EngineHandle,
}

impl Engine {
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            handle: EngineHandle::new(config),
        }
    }

    /// Creates a fresh execution context rooted at `module`, spec §6.1 item
    /// 1 ("push an explicit method call... onto a context's stack") minus
    /// the explicit push, which [`EngineHandle::create_context`] performs
    /// automatically for the context's entry point.
    pub fn create_context(&self, module: impl Into<String>) -> ContextId {
        self.handle.create_context(module)
    }

    /// Evaluates `source` as a free-standing expression within
    /// `context_id`, spec §6.1's `evaluate_expression_in_module`.
    ///
    /// `module` is accepted for spec-surface parity with a multi-module
    /// host but unused here: each context is pinned to the single module it
    /// was created against (see `DESIGN.md` "Module-to-thread pinning").
    pub fn evaluate_expression_in_module(
        &self,
        context_id: ContextId,
        module: &str,
        source: &str,
    ) -> Result<BoundaryValue, EngineError> {
        let _ = module;
        self.handle.evaluate(context_id, source).map_err(evaluation_error)
    }

    /// Calls `method` on the value produced by evaluating `receiver`,
    /// passing `args` positionally after the receiver — spec §6.1's
    /// `call_method`, expressed in terms of the same builtin-call
    /// convention [`crate::eval`]'s `method-dispatch` node uses internally
    /// (receiver prepended to the argument list).
    pub fn call_method(
        &self,
        context_id: ContextId,
        receiver: &str,
        method: &str,
        args: &[&str],
    ) -> Result<BoundaryValue, EngineError> {
        let mut call_args = Vec::with_capacity(args.len() + 1);
        call_args.push(receiver);
        call_args.extend_from_slice(args);
        let source = format!("{method}({})", call_args.join(", "));
        self.handle.evaluate(context_id, &source).map_err(evaluation_error)
    }

    /// Spec §6.1 item 4: shadows the context's module with an in-memory
    /// literal source, invalidating its accumulated specialisation state.
    pub fn set_literal_source(&self, context_id: ContextId, source: &str) -> Result<(), EngineError> {
        self.handle.set_literal_source(context_id, source).map_err(to_engine_error)
    }

    /// Spec §6.1 item 5: discards any literal-source override.
    pub fn reset_to_on_disk(&self, context_id: ContextId) -> Result<(), EngineError> {
        self.handle.reset_to_on_disk(context_id).map_err(to_engine_error)
    }

    /// Invalidates `context_id`'s call-target cache and expression cache, as
    /// a module edit that doesn't change the literal-source override would
    /// (e.g. an on-disk file changing underneath an unmodified context).
    pub fn edit_module(&self, context_id: ContextId) -> Result<(), EngineError> {
        self.handle.edit_module(context_id).map_err(to_engine_error)
    }

    /// Attaches a visualisation evaluating `expression` against the value of
    /// the most recently evaluated top-level expression in `context_id`.
    pub fn attach_visualisation(&self, context_id: ContextId, expression: &str) -> Result<VisualisationId, EngineError> {
        self.handle.attach_visualisation(context_id, expression).map_err(to_engine_error)
    }

    pub fn modify_visualisation(
        &self,
        context_id: ContextId,
        visualisation_id: VisualisationId,
        expression: &str,
    ) -> Result<(), EngineError> {
        self.handle
            .modify_visualisation(context_id, visualisation_id, expression)
            .map_err(to_engine_error)
    }

    pub fn detach_visualisation(&self, context_id: ContextId, visualisation_id: VisualisationId) -> Result<(), EngineError> {
        self.handle.detach_visualisation(context_id, visualisation_id).map_err(to_engine_error)
    }

    /// Spec §5 "cancellation cancels the in-flight execute": requests
    /// cancellation of `context_id`. See [`EngineHandle::cancel`] for the
    /// granularity this actually achieves.
    pub fn cancel_context(&self, context_id: ContextId) {
        self.handle.cancel(context_id);
    }

    /// Shuts down every worker thread, joining each before returning.
    pub fn shutdown(self) {
        self.handle.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_an_expression_in_a_fresh_context() {
        let engine = Engine::new(&EngineConfig::new().with_worker_threads(1));
        let ctx = engine.create_context("Main");
        let result = engine.evaluate_expression_in_module(ctx, "Main", "2 * 21").unwrap();
        assert_eq!(result, BoundaryValue::Long(42));
        engine.shutdown();
    }

    #[test]
    fn calls_a_builtin_method_with_receiver_prepended() {
        let engine = Engine::new(&EngineConfig::new().with_worker_threads(1));
        let ctx = engine.create_context("Main");
        let result = engine.call_method(ctx, "10", "is_error", &[]).unwrap();
        assert_eq!(result, BoundaryValue::Boolean(false));
        engine.shutdown();
    }

    #[test]
    fn visualisation_lifecycle_through_the_public_api() {
        let engine = Engine::new(&EngineConfig::new().with_worker_threads(1));
        let ctx = engine.create_context("Main");
        engine.evaluate_expression_in_module(ctx, "Main", "1 + 1").unwrap();
        let vis = engine.attach_visualisation(ctx, "x -> x").unwrap();
        engine.modify_visualisation(ctx, vis, "x -> x * 2").unwrap();
        engine.detach_visualisation(ctx, vis).unwrap();
        engine.shutdown();
    }

    #[test]
    fn cancelling_a_context_rejects_further_evaluation() {
        let engine = Engine::new(&EngineConfig::new().with_worker_threads(1));
        let ctx = engine.create_context("Main");
        engine.cancel_context(ctx);
        assert!(engine.evaluate_expression_in_module(ctx, "Main", "1 + 1").is_err());
        engine.shutdown();
    }
}
