//! Property-based tests for spec §8's quantified invariants, driven at the
//! level of the individual subsystems (PIC, call-optimiser, builtins) rather
//! than through a full parsed program, since `ArithmeticParser` has no
//! surface syntax for user-defined types or tail-recursive function
//! definitions. The two worked scenarios spec §8 states in source form
//! (method dispatch on a user type, million-iteration tail recursion) are
//! instead built directly against the runtime's own node representation,
//! below the `proptest!` block — the same representation any real parser
//! (per SPEC_FULL §B.1) would compile source into.

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use proptest::prelude::*;

use glyph_rt::ast::node::{instantiate, BuiltinFn, CallTarget};
use glyph_rt::ast::template::{ArgStrategy, CaseArm, ExpressionId, FunctionTemplate, NodeTemplate, SlotId, TaggedTemplate, TailStatus};
use glyph_rt::call::trampoline::CallOptimiserState;
use glyph_rt::call::ArgSchema;
use glyph_rt::context::ExecutionContext;
use glyph_rt::dispatch::{DispatchOutcome, Pic};
use glyph_rt::errors::Signal;
use glyph_rt::instrumentation::NoopCallbacks;
use glyph_rt::intern::intern;
use glyph_rt::types::ctor::{TypeCtor, TypeId};
use glyph_rt::types::scope::ModuleScope;
use glyph_rt::values::{Atom, FunctionValue, Value};
use glyph_rt::{builtins::standard_builtins, eval::call_function, eval::call_value, eval::eval_node};

fn make_template(name: &str, scope: &ModuleScope) -> Rc<FunctionTemplate> {
    FunctionTemplate::new(
        intern(name),
        0,
        Vec::new(),
        Vec::new(),
        0,
        TaggedTemplate::new(NodeTemplate::Literal(Value::Unit)),
        None,
        scope.clone(),
    )
}

fn call_builtin(name: &str, args: Vec<Value>) -> Value {
    let table = standard_builtins();
    let Value::Function(f) = table.get(name).unwrap().clone() else {
        unreachable!("every standard builtin is a Value::Function")
    };
    let ectx = ExecutionContext::new(intern("Test"), 3);
    call_value(&ectx, &f, args, &NoopCallbacks).expect("builtins never panic on these inputs")
}

fn dataflow_error() -> Value {
    glyph_rt::eval::raise_dataflow_error(Value::text("boom"), "test", None)
}

proptest! {
    /// Spec §8 property 1, "PIC soundness": resolving through the PIC agrees
    /// with the uncached resolver across an arbitrary number of sequential
    /// resolutions, for any fixed `(type, method)`.
    #[test]
    fn pic_soundness_across_repeated_resolutions(resolution_count in 1usize..50) {
        let scope = ModuleScope::new(intern("M"));
        let ty = TypeId::fresh();
        let expected = make_template("go", &scope);
        scope.define_method(ty, intern("go"), Rc::clone(&expected));
        let mut pic = Pic::new(3);

        for _ in 0..resolution_count {
            let (resolved, _) = pic.dispatch(ty, &scope, intern("go"));
            let uncached = scope.resolve_method(ty, intern("go"));
            prop_assert!(Rc::ptr_eq(&resolved.unwrap(), &uncached.unwrap()));
        }
    }

    /// Spec §8 boundary test: a PIC at exactly `K` entries hits; the
    /// `(K+1)`-th receiver type triggers megamorphic mode and the site never
    /// re-specializes afterwards.
    #[test]
    fn exceeding_pic_capacity_is_permanent(capacity in 1usize..6, extra_types in 1usize..6) {
        let scope = ModuleScope::new(intern("M"));
        let mut pic = Pic::new(capacity);
        let total = capacity + extra_types;
        let types: Vec<TypeId> = (0..total).map(|_| TypeId::fresh()).collect();
        for (i, ty) in types.iter().enumerate() {
            scope.define_method(*ty, intern("go"), make_template(&format!("go{i}"), &scope));
        }
        for ty in &types {
            pic.dispatch(*ty, &scope, intern("go"));
        }
        prop_assert!(pic.is_megamorphic());

        // Re-dispatching a type seen before the overflow must still resolve
        // correctly, and must never un-demote the site.
        let (resolved, outcome) = pic.dispatch(types[0], &scope, intern("go"));
        prop_assert!(resolved.is_some());
        prop_assert_eq!(outcome, DispatchOutcome::Megamorphic);
        prop_assert!(pic.is_megamorphic());
    }

    /// Spec §8 property 5, "dataflow-error transparency": for any pure
    /// primitive `p` and error value `e`, `p(..., e, ...) = e` by identity,
    /// regardless of which position `e` occupies or what the other operand
    /// is.
    #[test]
    fn dataflow_error_identity_propagates_through_arithmetic(
        op in prop::sample::select(vec!["+", "-", "*", "/", "<"]),
        operand in any::<i32>(),
        error_first in any::<bool>(),
    ) {
        let err = dataflow_error();
        let other = Value::Long(i64::from(operand));
        let args = if error_first {
            vec![err.clone(), other]
        } else {
            vec![other, err.clone()]
        };
        let result = call_builtin(op, args);
        prop_assert!(result.is_dataflow_error());
        prop_assert_eq!(result, err);
    }

    /// Spec §8 property 2, "tail-call boundedness": the call-optimiser's
    /// state never grows past the three-variant state machine no matter how
    /// many times the same self-recursive callee is observed — the
    /// structural property the trampoline's O(1)-per-iteration native stack
    /// usage depends on.
    #[test]
    fn call_optimiser_state_stays_bounded_across_many_observations(iterations in 1usize..10_000) {
        let scope = ModuleScope::new(intern("M"));
        let target = CallTarget::instantiate(&make_template("f", &scope), 3);
        let mut state = CallOptimiserState::default();
        for _ in 0..iterations {
            state.observe(&target);
        }
        prop_assert!(matches!(state, CallOptimiserState::Looping));
    }
}

#[test]
fn megamorphic_pic_never_re_specializes_after_one_more_distinct_type() {
    let scope = ModuleScope::new(intern("M"));
    let mut pic = Pic::new(2);
    let types: Vec<TypeId> = (0..5).map(|_| TypeId::fresh()).collect();
    for (i, ty) in types.iter().enumerate() {
        scope.define_method(*ty, intern("go"), make_template(&format!("go{i}"), &scope));
    }
    for ty in &types {
        pic.dispatch(*ty, &scope, intern("go"));
    }
    assert!(pic.is_megamorphic());
    assert_eq!(pic.misses(), types.len() as u64);
}

fn builtin_call(name: &str, args: Vec<TaggedTemplate>, table: &HashMap<String, Value>) -> TaggedTemplate {
    let callee = Box::new(TaggedTemplate::new(NodeTemplate::Literal(
        table.get(name).expect("standard builtin registered").clone(),
    )));
    TaggedTemplate::new(NodeTemplate::FunctionCall {
        callee,
        args: args.into_iter().map(|a| (a, ArgStrategy::Eager)).collect(),
    })
}

fn var(slot: u32) -> TaggedTemplate {
    TaggedTemplate::new(NodeTemplate::VariableRead(SlotId(slot)))
}

/// Spec §8's "method on a user type" scenario: a `Vector` module declares a
/// `Vec { x, y, z }` constructor and a `squareNorm` method; dispatching
/// `squareNorm` on `Vec(1, 2, 3)` resolves through `resolve_method`, binds
/// the atom's fields via `try_match_arm`'s `CaseBranch` destructuring (the
/// only field-extraction path the evaluator has — see `eval::try_match_arm`),
/// and computes `x*x + y*y + z*z`.
#[test]
fn method_dispatch_on_user_defined_atom_computes_square_norm() {
    let table = standard_builtins();
    let scope = ModuleScope::new(intern("Vector"));
    let ty = TypeId::fresh();
    let ctor = Rc::new(TypeCtor::new(ty, intern("Vec"), vec![intern("x"), intern("y"), intern("z")], None, scope.clone()));
    scope.register_constructor(Rc::clone(&ctor));

    // Fields are bound starting at slot 1 (slot 0 holds the receiver); the
    // body is ordinary arithmetic over those bound slots.
    let square_norm = builtin_call(
        "+",
        vec![
            builtin_call(
                "+",
                vec![builtin_call("*", vec![var(1), var(1)], &table), builtin_call("*", vec![var(2), var(2)], &table)],
                &table,
            ),
            builtin_call("*", vec![var(3), var(3)], &table),
        ],
        &table,
    );
    let body = TaggedTemplate::new(NodeTemplate::CaseBranch {
        scrutinee: Box::new(var(0)),
        arms: vec![CaseArm {
            ctor_name: Some(intern("Vec")),
            bind_from: SlotId(1),
            body: square_norm,
        }],
    });

    let method = FunctionTemplate::new(intern("squareNorm"), 1, vec![None], vec![ArgStrategy::Eager], 4, body, None, scope.clone());
    scope.define_method(ty, intern("squareNorm"), Rc::clone(&method));

    let receiver = Value::Atom(Atom {
        ctor: Rc::clone(&ctor),
        fields: Rc::from(vec![Value::Long(1), Value::Long(2), Value::Long(3)].into_boxed_slice()),
    });

    let ectx = ExecutionContext::new(intern("Test"), 3);
    let target = ectx.call_target_for(&method);
    let schema = ArgSchema::new(method.param_strategies.clone());
    let result = call_function(&ectx, target, None, vec![receiver], schema, &NoopCallbacks).expect("squareNorm does not panic");
    assert_eq!(result, Value::Long(14));
}

/// Spec §8's "tail recursion" scenario: `sumTo(acc, n) = if n == 0 then acc
/// else sumTo(acc + n, n - 1)` run to `n = 1_000_000`. The recursive call is
/// tail-marked and targets the self slot `FunctionTemplate::new` always
/// reserves one past `namespace_size` (see `eval::build_frame`'s doc
/// comment), so after the call-optimiser promotes this site to `Looping`
/// (`call::trampoline::CallOptimiserState`) every further iteration runs
/// inside `eval::call_function`'s own loop rather than recursing the Rust
/// stack — if it didn't, this call would blow through
/// `max_native_recursion` long before reaching the answer.
#[test]
fn self_tail_recursive_function_sums_to_one_million_without_native_recursion() {
    let table = standard_builtins();
    let scope = ModuleScope::new(intern("M"));

    let is_zero = builtin_call("==", vec![var(1), TaggedTemplate::new(NodeTemplate::Literal(Value::Long(0)))], &table);
    let base_case = var(0);
    let recurse = TaggedTemplate::new(NodeTemplate::FunctionCall {
        callee: Box::new(var(2)),
        args: vec![
            (builtin_call("+", vec![var(0), var(1)], &table), ArgStrategy::Eager),
            (
                builtin_call("-", vec![var(1), TaggedTemplate::new(NodeTemplate::Literal(Value::Long(1)))], &table),
                ArgStrategy::Eager,
            ),
        ],
    })
    .with_tail_status(TailStatus::TailDirect);

    let body = TaggedTemplate::new(NodeTemplate::CaseBranch {
        scrutinee: Box::new(is_zero),
        arms: vec![
            CaseArm {
                ctor_name: Some(intern("True")),
                bind_from: SlotId(2),
                body: base_case,
            },
            CaseArm {
                ctor_name: None,
                bind_from: SlotId(2),
                body: recurse,
            },
        ],
    });

    let sum_to = FunctionTemplate::new(
        intern("sumTo"),
        2,
        vec![None, None],
        vec![ArgStrategy::Eager, ArgStrategy::Eager],
        2,
        body,
        None,
        scope.clone(),
    );

    let ectx = ExecutionContext::new(intern("Test"), 3);
    let target = ectx.call_target_for(&sum_to);
    let schema = ArgSchema::new(sum_to.param_strategies.clone());
    let result = call_function(&ectx, target, None, vec![Value::Long(0), Value::Long(1_000_000)], schema, &NoopCallbacks)
        .expect("a trampolined million-iteration sum must not exhaust max_native_recursion");
    assert_eq!(result, Value::Long(500_000_500_000));
}

/// Wraps a counting builtin (arity 0) as a `function-call` node carrying
/// `id`, the shape `eval_node`'s instrumentation fabric caches against.
fn counting_call_node(id: ExpressionId, counter: Rc<Cell<i32>>) -> Rc<glyph_rt::ast::node::ExprNode> {
    let builtin = Rc::new(BuiltinFn {
        name: intern("count"),
        arity: 0,
        func: Box::new(move |_args: &[Value]| {
            counter.set(counter.get() + 1);
            Ok(Value::Long(i64::from(counter.get())))
        }),
    });
    let callee_value = Value::Function(FunctionValue {
        target: CallTarget::builtin(builtin),
        captured_scope: None,
        schema: ArgSchema::new(Vec::new()),
    });
    let tagged = TaggedTemplate::new(NodeTemplate::FunctionCall {
        callee: Box::new(TaggedTemplate::new(NodeTemplate::Literal(callee_value))),
        args: Vec::new(),
    })
    .with_id(id);
    instantiate(&tagged, 3, tagged.span)
}

/// Spec §8 scenario 4: evaluating the same cached node twice within one
/// execution context must not re-run its builtin the second time — the
/// second `eval_node` call is satisfied entirely out of `ExprCache`.
#[test]
fn re_evaluating_a_cached_node_does_not_re_execute_its_builtin() {
    let id = ExpressionId::new();
    let counter = Rc::new(Cell::new(0));
    let node = counting_call_node(id, Rc::clone(&counter));
    let ectx = ExecutionContext::new(intern("Test"), 3);
    let mut frame = vec![Value::Unit];

    let first = eval_node(&node, &mut frame, &ectx, &NoopCallbacks).unwrap();
    assert_eq!(first, Value::Long(1));
    assert_eq!(counter.get(), 1);

    let second = eval_node(&node, &mut frame, &ectx, &NoopCallbacks).unwrap();
    assert_eq!(second, Value::Long(1), "a cache hit must return the previously cached value, not recompute");
    assert_eq!(counter.get(), 1, "the builtin must not run again on the second evaluation");
}

/// Spec §8 scenario 5: a panic's reported origin matches the originating
/// node's expression id, localized by `invoke_with_args` the first time the
/// unwind crosses a call-site node.
#[test]
fn panic_origin_is_localized_to_the_call_site_node_that_raised_it() {
    let table = standard_builtins();
    let Value::Function(div_strict) = table.get("divStrict").unwrap().clone() else {
        unreachable!("divStrict is a builtin function")
    };
    let id = ExpressionId::new();
    let tagged = TaggedTemplate::new(NodeTemplate::FunctionCall {
        callee: Box::new(TaggedTemplate::new(NodeTemplate::Literal(Value::Function(div_strict)))),
        args: vec![
            (TaggedTemplate::new(NodeTemplate::Literal(Value::Long(1))), ArgStrategy::Eager),
            (TaggedTemplate::new(NodeTemplate::Literal(Value::Long(0))), ArgStrategy::Eager),
        ],
    })
    .with_id(id);
    let node = instantiate(&tagged, 3, tagged.span);
    let ectx = ExecutionContext::new(intern("Test"), 3);
    let mut frame = vec![Value::Unit];

    let err = eval_node(&node, &mut frame, &ectx, &NoopCallbacks).unwrap_err();
    let Signal::Panic(payload) = err else {
        panic!("divStrict(1, 0) must panic, not raise a dataflow error");
    };
    assert_eq!(payload.origin, Some(id));
}
