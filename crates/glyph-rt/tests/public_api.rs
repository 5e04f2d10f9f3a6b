//! End-to-end scenarios driven entirely through the public [`glyph_rt::Engine`]
//! surface, mirroring spec §8's concrete worked examples that fit within
//! `ArithmeticParser`'s grammar.

use glyph_rt::jobqueue::BoundaryValue;
use glyph_rt::{Engine, EngineConfig};
use pretty_assertions::assert_eq;

fn single_threaded_engine() -> Engine {
    Engine::new(&EngineConfig::new().with_worker_threads(1))
}

#[test]
fn arithmetic_evaluates_with_operator_precedence() {
    let engine = single_threaded_engine();
    let ctx = engine.create_context("Main");
    let result = engine.evaluate_expression_in_module(ctx, "Main", "2 + (2 * 2)").unwrap();
    assert_eq!(result, BoundaryValue::Long(6));
    engine.shutdown();
}

#[test]
fn dataflow_error_propagates_through_a_pure_primitive() {
    let engine = single_threaded_engine();
    let ctx = engine.create_context("Main");
    // `1 / 0` raises a dataflow error rather than panicking; adding 1 to it
    // must still report an error rather than a numeric result (spec §8
    // property 5, "dataflow-error transparency").
    let result = engine.evaluate_expression_in_module(ctx, "Main", "(1 / 0) + 1").unwrap();
    assert!(matches!(result, BoundaryValue::DataflowError { .. }));
    engine.shutdown();
}

#[test]
fn comparison_and_boolean_results_round_trip_the_boundary() {
    let engine = single_threaded_engine();
    let ctx = engine.create_context("Main");
    let result = engine.evaluate_expression_in_module(ctx, "Main", "3 < 10").unwrap();
    assert_eq!(result, BoundaryValue::Boolean(true));
    engine.shutdown();
}

#[test]
fn call_method_prepends_receiver_to_builtin_arguments() {
    let engine = single_threaded_engine();
    let ctx = engine.create_context("Main");
    let result = engine.call_method(ctx, "21", "is_error", &[]).unwrap();
    assert_eq!(result, BoundaryValue::Boolean(false));
    engine.shutdown();
}

#[test]
fn edit_module_with_no_literal_source_change_is_a_no_op() {
    // Spec §8 round-trip: `edit-module(M, [])` is a no-op; a context that
    // hasn't changed its source keeps producing the same results.
    let engine = single_threaded_engine();
    let ctx = engine.create_context("Main");
    let before = engine.evaluate_expression_in_module(ctx, "Main", "10 * 10").unwrap();
    engine.edit_module(ctx).unwrap();
    let after = engine.evaluate_expression_in_module(ctx, "Main", "10 * 10").unwrap();
    assert_eq!(before, after);
    engine.shutdown();
}

#[test]
fn literal_source_override_then_reset_is_idempotent() {
    // Spec §8 round-trip: `set-literal-source` followed by `reset-to-on-disk`
    // restores pre-edit behaviour when the on-disk module is unchanged.
    let engine = single_threaded_engine();
    let ctx = engine.create_context("Main");
    engine.set_literal_source(ctx, "main = 1 + 1").unwrap();
    engine.reset_to_on_disk(ctx).unwrap();
    let result = engine.evaluate_expression_in_module(ctx, "Main", "5 + 5").unwrap();
    assert_eq!(result, BoundaryValue::Long(10));
    engine.shutdown();
}

#[test]
fn attach_then_detach_visualisation_leaves_no_trace() {
    // Spec §8 round-trip: attach-then-detach leaves no trace in the context.
    let engine = single_threaded_engine();
    let ctx = engine.create_context("Main");
    engine.evaluate_expression_in_module(ctx, "Main", "1 + 1").unwrap();
    let vis = engine.attach_visualisation(ctx, "x -> x").unwrap();
    engine.detach_visualisation(ctx, vis).unwrap();
    // Detaching twice fails: the first detach really removed it rather than
    // leaving a dangling, still-detachable entry behind.
    assert!(engine.detach_visualisation(ctx, vis).is_err());
    engine.shutdown();
}

#[test]
fn jobs_on_one_context_observe_program_order() {
    // Spec §8 property 4, "order preservation": a sequence of evaluates on
    // the same context sees each prior evaluate's effect (here, simply that
    // they all succeed and return the expected value in submission order).
    let engine = single_threaded_engine();
    let ctx = engine.create_context("Main");
    let mut results = Vec::new();
    for n in 1..=5 {
        results.push(engine.evaluate_expression_in_module(ctx, "Main", &format!("{n} * {n}")).unwrap());
    }
    assert_eq!(
        results,
        vec![
            BoundaryValue::Long(1),
            BoundaryValue::Long(4),
            BoundaryValue::Long(9),
            BoundaryValue::Long(16),
            BoundaryValue::Long(25),
        ]
    );
    engine.shutdown();
}

#[test]
fn cancelling_a_context_rejects_further_evaluation() {
    let engine = single_threaded_engine();
    let ctx = engine.create_context("Main");
    engine.evaluate_expression_in_module(ctx, "Main", "1 + 1").unwrap();
    engine.cancel_context(ctx);
    assert!(engine.evaluate_expression_in_module(ctx, "Main", "1 + 1").is_err());
    engine.shutdown();
}

#[test]
fn independent_contexts_do_not_share_expression_results() {
    let engine = Engine::new(&EngineConfig::new().with_worker_threads(2));
    let a = engine.create_context("Main");
    let b = engine.create_context("Main");
    let result_a = engine.evaluate_expression_in_module(a, "Main", "2 + 2").unwrap();
    let result_b = engine.evaluate_expression_in_module(b, "Main", "3 + 3").unwrap();
    assert_eq!(result_a, BoundaryValue::Long(4));
    assert_eq!(result_b, BoundaryValue::Long(6));
    engine.shutdown();
}
