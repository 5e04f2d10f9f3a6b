//! The tree-walking evaluator.
//!
//! This is where the four subsystems spec §2 calls out meet on every
//! expression: node evaluation consults the [`crate::dispatch::Pic`] at a
//! `method-dispatch` node, routes tail calls through
//! [`crate::call::trampoline`], and notifies
//! [`crate::instrumentation::Callbacks`] plus the
//! [`crate::instrumentation::ExprCache`] around any node carrying an
//! expression id. Grounded in the teacher's bytecode dispatch loop
//! (`run()` in `crates/ouros/src/bytecode/vm/mod.rs`): a single flat `match`
//! over opcodes, here over `NodeKind` variants instead, with explicit
//! recursive calls standing in for what the teacher does with jump targets
//! over a flat instruction stream.

use std::rc::Rc;

use crate::{
    ast::node::{CallTarget, ExprNode, NodeKind},
    ast::template::{ArgStrategy, FunctionTemplate, LocalScope, TailStatus},
    call::trampoline::PendingTailCall,
    context::ExecutionContext,
    errors::{EngineError, EvalResult, Signal},
    instrumentation::Callbacks,
    values::{Atom, DataflowError, FunctionValue, Thunk, Value},
};

/// A function's local variable slots for one activation. Built fresh on
/// every call; closures snapshot the slots they capture into an
/// [`LocalScope`] rather than sharing this `Vec` (spec's language has no
/// mutable local reassignment, so a snapshot is always safe).
pub type Frame = Vec<Value>;

/// Reserved frame slot, one past a function's declared locals, holding the
/// `Value::Function` currently being run. Lets a named function reference
/// itself recursively (`VariableRead(SlotId(template.namespace_size))`)
/// without any mutable-variable machinery: the evaluator populates this
/// slot on every call, whether or not the body actually reads it.
fn build_frame(template: &FunctionTemplate, args: &[Value], captured: Option<&LocalScope>, self_value: Value) -> Frame {
    let mut frame = Vec::with_capacity(template.namespace_size + 1);
    frame.extend(args.iter().cloned());
    if let Some(captured) = captured {
        frame.extend(captured.iter().cloned());
    }
    frame.resize(template.namespace_size, Value::Unit);
    frame.push(self_value);
    frame
}

/// Invokes `target` with `args`, driving any tail-position self-call
/// through an iterative loop instead of native recursion (spec §4.2,
/// spec §8 property 2: "a self-tail-recursive function run for 10^6
/// iterations consumes bounded native stack").
pub fn call_function(
    ectx: &ExecutionContext,
    mut target: Rc<CallTarget>,
    mut captured: Option<LocalScope>,
    mut args: Vec<Value>,
    mut schema: Rc<crate::call::ArgSchema>,
    cb: &dyn Callbacks,
) -> EvalResult {
    let _depth_guard = ectx.enter_native_frame().map_err(engine_error_to_signal)?;
    loop {
        let (template, root) = match &*target {
            CallTarget::Builtin(builtin) => return (builtin.func)(&args),
            CallTarget::Compiled { template, root } => (template, root),
        };
        let self_value = Value::Function(FunctionValue {
            target: Rc::clone(&target),
            captured_scope: captured.clone(),
            schema: Rc::clone(&schema),
        });
        let mut frame = build_frame(template, &args, captured.as_ref(), self_value);
        let _call_guard = ectx.begin_call(root, &args);
        match eval_node(root, &mut frame, ectx, cb) {
            Err(Signal::TailCall(pending)) => {
                let PendingTailCall {
                    target: next_target,
                    captured_scope,
                    args: next_args,
                    schema: next_schema,
                } = pending;
                target = next_target;
                captured = captured_scope;
                args = next_args;
                schema = next_schema;
            }
            other => return other,
        }
    }
}

/// Calls a [`FunctionValue`] (as opposed to an already-resolved
/// [`CallTarget`]), the shape every `function-call`/`method-dispatch` node
/// actually has in hand after resolving its callee.
pub fn call_value(ectx: &ExecutionContext, callee: &FunctionValue, args: Vec<Value>, cb: &dyn Callbacks) -> EvalResult {
    call_function(
        ectx,
        Rc::clone(&callee.target),
        callee.captured_scope.clone(),
        args,
        Rc::clone(&callee.schema),
        cb,
    )
}

fn eval_args(
    args: &[(Rc<ExprNode>, ArgStrategy)],
    frame: &mut Frame,
    ectx: &ExecutionContext,
    cb: &dyn Callbacks,
) -> Result<Vec<Value>, Signal> {
    args.iter()
        .map(|(node, strategy)| match strategy {
            ArgStrategy::Eager => eval_node(node, frame, ectx, cb),
            ArgStrategy::Suspended => {
                // A suspended argument becomes a thunk over the *current*
                // frame, snapshotted so later slot reassignment in the
                // caller (there is none here, but a future IR producer
                // might reorder evaluation) cannot retroactively change
                // what the thunk sees.
                let scope: LocalScope = Rc::from(frame.clone().into_boxed_slice());
                Ok(Value::Thunk(Thunk::suspended(Rc::clone(node), scope)))
            }
        })
        .collect()
}

/// Evaluates one node to a value, or propagates a [`Signal`].
///
/// Dataflow errors are never special-cased here: a `Value::DataflowError`
/// flowing out of a subexpression is just another `Value` as far as this
/// function is concerned (spec §4.5 "ordinary values... propagate by
/// ordinary return"). Individual primitive operations (see
/// `crate::builtins`) are what choose to short-circuit on one.
pub fn eval_node(node: &Rc<ExprNode>, frame: &mut Frame, ectx: &ExecutionContext, cb: &dyn Callbacks) -> EvalResult {
    let instrument = node.id.is_some() && !node.avoid_id_instrumentation && !ectx.instrumentation_suppressed();

    if let Some(id) = node.id {
        if instrument {
            if let Some(cached) = ectx.expr_cache.get(id) {
                tracing::trace!(expression_id = %id.0, "node cache hit");
                if let Value::Panic(payload) = cached {
                    return Err(Signal::Panic(payload));
                }
                return Ok(cached);
            }
            tracing::trace!(expression_id = %id.0, "node enter");
            cb.on_enter(id);
        }
    }

    let result = eval_kind(node, frame, ectx, cb);

    if let (Some(id), Ok(value)) = (node.id, &result) {
        if instrument {
            tracing::trace!(expression_id = %id.0, "node return");
            ectx.expr_cache.insert(id, value.clone());
            cb.on_value(id, value);
            for vis in ectx.visualisations_for(id) {
                let _ = cb.on_visualisation_update(vis.expression_id, value);
            }
        }
    }
    if let (Some(id), Err(Signal::Panic(payload))) = (node.id, &result) {
        if instrument {
            cb.on_panic(id, &payload.message);
            ectx.expr_cache.insert(id, Value::Panic(payload.clone()));
        }
    }

    result
}

fn eval_kind(node: &Rc<ExprNode>, frame: &mut Frame, ectx: &ExecutionContext, cb: &dyn Callbacks) -> EvalResult {
    match &node.kind {
        NodeKind::Literal(value) => Ok(value.clone()),

        NodeKind::VariableRead(slot) => frame
            .get(slot.0 as usize)
            .cloned()
            .ok_or_else(|| Signal::panic(Value::Unit, format!("read of unbound slot {}", slot.0))),

        NodeKind::ForceThunk(inner) => {
            let value = eval_node(inner, frame, ectx, cb)?;
            force(value, ectx, cb)
        }

        NodeKind::FunctionCall { callee, args, call_opt } => {
            let callee_value = eval_node(callee, frame, ectx, cb)?;
            if callee_value.is_dataflow_error() {
                return Ok(callee_value);
            }
            let Value::Function(function) = callee_value else {
                return Err(Signal::panic(
                    Value::Unit,
                    format!("cannot call a value of type {}", callee_value.type_name()),
                ));
            };
            dispatch_call(node, function, args, call_opt, frame, ectx, cb)
        }

        NodeKind::MethodDispatch {
            method_name,
            receiver,
            args,
            pic,
            call_opt,
        } => {
            let receiver_value = eval_node(receiver, frame, ectx, cb)?;
            if receiver_value.is_dataflow_error() {
                return Ok(receiver_value);
            }
            let receiver_type = receiver_value.type_id();
            let scope = &receiver_scope(&receiver_value, ectx);
            let (resolved, _outcome) = pic.borrow_mut().dispatch(receiver_type, scope, *method_name);
            let Some(template) = resolved else {
                return Err(Signal::panic(
                    Value::Unit,
                    format!(
                        "method `{method_name}` does not exist on type `{}`",
                        receiver_value.type_name()
                    ),
                ));
            };
            let target = ectx.call_target_for(&template);
            let schema = crate::call::ArgSchema::new(template.param_strategies.clone());
            let mut evaluated_args = vec![receiver_value];
            evaluated_args.extend(eval_args(args, frame, ectx, cb)?);
            let function = FunctionValue {
                target,
                captured_scope: None,
                schema,
            };
            invoke_with_args(node, &function, evaluated_args, call_opt, ectx, cb)
        }

        NodeKind::CaseBranch { scrutinee, arms } => {
            let scrutinee_value = eval_node(scrutinee, frame, ectx, cb)?;
            if scrutinee_value.is_dataflow_error() {
                return Ok(scrutinee_value);
            }
            for arm in arms {
                if let Some(bound) = try_match_arm(arm, &scrutinee_value) {
                    for (offset, value) in bound.into_iter().enumerate() {
                        let slot = arm.bind_from.0 as usize + offset;
                        if slot < frame.len() {
                            frame[slot] = value;
                        }
                    }
                    return eval_node(&arm.body, frame, ectx, cb);
                }
            }
            Err(Signal::panic(Value::Unit, "no case branch matched the scrutinee".to_owned()))
        }

        NodeKind::CreateFunction { template, captured_slots } => {
            let captured: LocalScope = Rc::from(
                captured_slots
                    .iter()
                    .map(|slot| frame.get(slot.0 as usize).cloned().unwrap_or(Value::Unit))
                    .collect::<Vec<_>>()
                    .into_boxed_slice(),
            );
            let target = ectx.call_target_for(template);
            let schema = crate::call::ArgSchema::new(template.param_strategies.clone());
            Ok(Value::Function(FunctionValue {
                target,
                captured_scope: Some(captured),
                schema,
            }))
        }

        NodeKind::InstrumentSentry(inner) => eval_node(inner, frame, ectx, cb),

        NodeKind::FunctionCallInstrumentation(inner) => {
            let result = eval_node(inner, frame, ectx, cb)?;
            if let Some(id) = inner.id {
                if !inner.avoid_id_instrumentation && !ectx.instrumentation_suppressed() {
                    let call = crate::instrumentation::FunctionCall { id, result: result.clone() };
                    if let Some(replacement) = cb.on_function_return(&call) {
                        return Ok(replacement);
                    }
                }
            }
            Ok(result)
        }
    }
}

/// Resolves the `ModuleScope` a `method-dispatch` node's PIC falls back to
/// on a cache miss: an atom's own constructor module, or the process-wide
/// [`crate::types::scope::primitives_scope`] for every other receiver kind
/// (spec §4.1 step 1: "a primitive whose constructor is a fixed,
/// per-primitive sentinel" — sentinels share one scope since no module
/// declares them).
fn receiver_scope(receiver: &Value, _ectx: &ExecutionContext) -> crate::types::scope::ModuleScope {
    match receiver {
        Value::Atom(Atom { ctor, .. }) => ctor.defining_scope.clone(),
        _ => crate::types::scope::primitives_scope(),
    }
}

#[allow(clippy::too_many_arguments)]
fn dispatch_call(
    node: &Rc<ExprNode>,
    function: FunctionValue,
    args: &[(Rc<ExprNode>, ArgStrategy)],
    call_opt: &std::cell::RefCell<crate::call::trampoline::CallOptimiserState>,
    frame: &mut Frame,
    ectx: &ExecutionContext,
    cb: &dyn Callbacks,
) -> EvalResult {
    let evaluated_args = eval_args(args, frame, ectx, cb)?;
    invoke_with_args(node, &function, evaluated_args, call_opt, ectx, cb)
}

fn invoke_with_args(
    node: &Rc<ExprNode>,
    function: &FunctionValue,
    args: Vec<Value>,
    call_opt: &std::cell::RefCell<crate::call::trampoline::CallOptimiserState>,
    ectx: &ExecutionContext,
    cb: &dyn Callbacks,
) -> EvalResult {
    let is_tail = matches!(node.tail_status.get(), TailStatus::TailDirect | TailStatus::TailLoop);
    let should_loop = call_opt.borrow_mut().observe(&function.target);

    if is_tail && should_loop {
        return Err(Signal::TailCall(PendingTailCall {
            target: Rc::clone(&function.target),
            captured_scope: function.captured_scope.clone(),
            args,
            schema: Rc::clone(&function.schema),
        }));
    }

    match call_value(ectx, function, args, cb) {
        Err(Signal::Panic(mut payload)) => {
            if payload.origin.is_none() {
                payload.origin = node.id;
            }
            Err(Signal::Panic(payload))
        }
        other => other,
    }
}

/// The sentinel constructor names spec.md §4.1 step 1 gives `Boolean`
/// receivers (`all booleans map to Boolean-ctor`) — `True`/`False` rather
/// than one shared name, so a `case-branch` arm can select a branch by
/// outcome the same way it selects an `Atom` arm by constructor name.
fn boolean_ctor_name(value: bool) -> crate::intern::InternedStr {
    static TRUE: std::sync::OnceLock<crate::intern::InternedStr> = std::sync::OnceLock::new();
    static FALSE: std::sync::OnceLock<crate::intern::InternedStr> = std::sync::OnceLock::new();
    if value {
        *TRUE.get_or_init(|| crate::intern::intern("True"))
    } else {
        *FALSE.get_or_init(|| crate::intern::intern("False"))
    }
}

fn try_match_arm(arm: &crate::ast::node::RuntimeCaseArm, value: &Value) -> Option<Vec<Value>> {
    match (&arm.ctor_name, value) {
        (None, _) => Some(Vec::new()),
        (Some(name), Value::Atom(atom)) if atom.ctor.name == *name => Some(atom.fields.to_vec()),
        (Some(name), Value::Boolean(b)) if *name == boolean_ctor_name(*b) => Some(Vec::new()),
        _ => None,
    }
}

/// Forces a thunk to its memoized value, per spec §3 "forced at most once;
/// subsequent forces return the memoized result".
pub fn force(value: Value, ectx: &ExecutionContext, cb: &dyn Callbacks) -> EvalResult {
    let Value::Thunk(thunk) = value else {
        return Ok(value);
    };
    if let Some(memoized) = thunk.peek() {
        return Ok(memoized);
    }
    let Some((node, scope)) = thunk.take_for_forcing() else {
        return Err(Signal::panic(Value::Unit, "thunk forced while already being forced".to_owned()));
    };
    let mut frame: Frame = scope.to_vec();
    let result = eval_node(&node, &mut frame, ectx, cb)?;
    thunk.store_result(result.clone());
    Ok(result)
}

/// Constructs a fresh dataflow error value at `origin_expr`, the entry
/// point builtins use to turn a primitive failure (divide by zero, an
/// out-of-range index) into spec §4.5's first-class error value.
#[must_use]
pub fn raise_dataflow_error(payload: Value, label: &str, origin_expr: Option<crate::ast::template::ExpressionId>) -> Value {
    Value::DataflowError(DataflowError::new(payload, label, origin_expr))
}

/// Maps an [`EngineError`] surfaced from a context/module-level operation
/// into a panic signal, used by `crate::api` entry points that need to
/// fail a whole request rather than return a dataflow error value.
#[must_use]
pub fn engine_error_to_signal(err: EngineError) -> Signal {
    Signal::panic(Value::text(err.to_string()), err.to_string())
}
