//! The mutable runtime node graph, instantiated per execution context from
//! an immutable [`super::template`].
//!
//! Spec §3 "AST nodes... mutated in place during execution to carry
//! specialization state (inline cache entries, tail-call classification)".
//! This module is that mutable half: every call-site node owns a
//! [`crate::dispatch::Pic`] or [`crate::call::trampoline::CallOptimiserState`]
//! cell that the evaluator in `crate::eval` mutates as it runs.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::{
    ast::template::{
        ArgStrategy, ExpressionId, FunctionTemplate, NodeTemplate, SlotId, SourceSpan, TailStatus, TaggedTemplate,
    },
    call::trampoline::CallOptimiserState,
    dispatch::Pic,
    intern::InternedStr,
};

/// One runtime node. Shared via `Rc` among whatever holds a reference to
/// it (its parent node, a `CallTarget` root, instrumentation bookkeeping);
/// never mutably borrowed through `&mut` because several call frames across
/// a recursive evaluation may be looking at the same node's interior cells
/// at once.
#[derive(Debug)]
pub struct ExprNode {
    pub id: Option<ExpressionId>,
    pub span: Option<SourceSpan>,
    pub tail_status: Cell<TailStatus>,
    pub avoid_id_instrumentation: bool,
    pub kind: NodeKind,
}

#[derive(Debug)]
pub struct RuntimeCaseArm {
    pub ctor_name: Option<InternedStr>,
    pub bind_from: SlotId,
    pub body: Rc<ExprNode>,
}

#[derive(Debug)]
pub enum NodeKind {
    Literal(crate::values::Value),
    VariableRead(SlotId),
    FunctionCall {
        callee: Rc<ExprNode>,
        args: Vec<(Rc<ExprNode>, ArgStrategy)>,
        call_opt: RefCell<CallOptimiserState>,
    },
    MethodDispatch {
        method_name: InternedStr,
        receiver: Rc<ExprNode>,
        args: Vec<(Rc<ExprNode>, ArgStrategy)>,
        pic: RefCell<Pic>,
        call_opt: RefCell<CallOptimiserState>,
    },
    CaseBranch {
        scrutinee: Rc<ExprNode>,
        arms: Vec<RuntimeCaseArm>,
    },
    CreateFunction {
        template: Rc<FunctionTemplate>,
        captured_slots: Vec<SlotId>,
    },
    ForceThunk(Rc<ExprNode>),
    InstrumentSentry(Rc<ExprNode>),
    FunctionCallInstrumentation(Rc<ExprNode>),
}

/// Whether a node's span falls inside its function's instrumented range
/// (spec §4.3 item 1: "excludes nested lambdas spawned mid-expression").
/// Missing span data on either side means the question can't be answered,
/// so it defaults to allowed rather than silently suppressing instrumentation
/// for nodes a parser never annotated with spans (see `crate::parser`).
fn instrumentation_allowed(root_span: Option<SourceSpan>, node_span: Option<SourceSpan>) -> bool {
    match (root_span, node_span) {
        (Some(root), Some(node)) => root.contains_line_range(&node),
        _ => true,
    }
}

/// Instantiates a fresh, independently-mutable runtime tree from an
/// immutable template, seeding every `method-dispatch` node's PIC at
/// `pic_capacity`. `root_span` is the owning function's span (see
/// [`FunctionTemplate::span`]); it is threaded unchanged through every
/// recursive call in this function's own body, but never passed into a
/// nested `CreateFunction`'s template — that closure gets its own root span
/// the first time it is itself instantiated as a call-target.
#[must_use]
pub fn instantiate(tagged: &TaggedTemplate, pic_capacity: usize, root_span: Option<SourceSpan>) -> Rc<ExprNode> {
    let kind = match &tagged.kind {
        NodeTemplate::Literal(v) => NodeKind::Literal(v.clone()),
        NodeTemplate::VariableRead(slot) => NodeKind::VariableRead(*slot),
        NodeTemplate::FunctionCall { callee, args } => NodeKind::FunctionCall {
            callee: instantiate(callee, pic_capacity, root_span),
            args: args.iter().map(|(a, s)| (instantiate(a, pic_capacity, root_span), *s)).collect(),
            call_opt: RefCell::new(CallOptimiserState::default()),
        },
        NodeTemplate::MethodDispatch {
            method_name,
            receiver,
            args,
        } => NodeKind::MethodDispatch {
            method_name: *method_name,
            receiver: instantiate(receiver, pic_capacity, root_span),
            args: args.iter().map(|(a, s)| (instantiate(a, pic_capacity, root_span), *s)).collect(),
            pic: RefCell::new(Pic::new(pic_capacity)),
            call_opt: RefCell::new(CallOptimiserState::default()),
        },
        NodeTemplate::CaseBranch { scrutinee, arms } => NodeKind::CaseBranch {
            scrutinee: instantiate(scrutinee, pic_capacity, root_span),
            arms: arms
                .iter()
                .map(|arm| RuntimeCaseArm {
                    ctor_name: arm.ctor_name,
                    bind_from: arm.bind_from,
                    body: instantiate(&arm.body, pic_capacity, root_span),
                })
                .collect(),
        },
        NodeTemplate::CreateFunction { template, captured_slots } => NodeKind::CreateFunction {
            template: Rc::clone(template),
            captured_slots: captured_slots.clone(),
        },
        NodeTemplate::ForceThunk(inner) => NodeKind::ForceThunk(instantiate(inner, pic_capacity, root_span)),
        NodeTemplate::InstrumentSentry(inner) => NodeKind::InstrumentSentry(instantiate(inner, pic_capacity, root_span)),
        NodeTemplate::FunctionCallInstrumentation(inner) => {
            NodeKind::FunctionCallInstrumentation(instantiate(inner, pic_capacity, root_span))
        }
    };

    Rc::new(ExprNode {
        id: tagged.id,
        span: tagged.span,
        tail_status: Cell::new(tagged.tail_status),
        avoid_id_instrumentation: tagged.avoid_id_instrumentation || !instrumentation_allowed(root_span, tagged.span),
        kind,
    })
}

/// Collects every expression id reachable from `root`'s own subtree
/// (following into nested `CaseBranch` arms and sentry/instrumentation
/// wrappers, but not into a `CreateFunction`'s captured template — that is
/// a different call-target's root). Used to invalidate exactly one
/// call-target's own cached entries when a fresh top-level call to it
/// arrives with different arguments rather than invalidating the whole
/// context's cache (see `DESIGN.md` "Top-frame-only instrumentation and
/// cross-call cache scoping").
pub fn collect_expression_ids(root: &Rc<ExprNode>, out: &mut Vec<ExpressionId>) {
    if let Some(id) = root.id {
        out.push(id);
    }
    match &root.kind {
        NodeKind::Literal(_) | NodeKind::VariableRead(_) | NodeKind::CreateFunction { .. } => {}
        NodeKind::FunctionCall { callee, args, .. } => {
            collect_expression_ids(callee, out);
            for (arg, _) in args {
                collect_expression_ids(arg, out);
            }
        }
        NodeKind::MethodDispatch { receiver, args, .. } => {
            collect_expression_ids(receiver, out);
            for (arg, _) in args {
                collect_expression_ids(arg, out);
            }
        }
        NodeKind::CaseBranch { scrutinee, arms } => {
            collect_expression_ids(scrutinee, out);
            for arm in arms {
                collect_expression_ids(&arm.body, out);
            }
        }
        NodeKind::ForceThunk(inner) | NodeKind::InstrumentSentry(inner) | NodeKind::FunctionCallInstrumentation(inner) => {
            collect_expression_ids(inner, out);
        }
    }
}

/// A native function, exposed to the evaluator as an ordinary callable
/// (SPEC_FULL §B.2 "builtin function seam"). Builtins never recurse and so
/// never participate in the tail-call trampoline; they run to completion
/// the moment they're invoked.
pub struct BuiltinFn {
    pub name: InternedStr,
    pub arity: usize,
    pub func: Box<dyn Fn(&[crate::values::Value]) -> crate::errors::EvalResult>,
}

impl std::fmt::Debug for BuiltinFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinFn").field("name", &self.name).field("arity", &self.arity).finish()
    }
}

/// An invocable handle, spec §3 "Call-target — an invocable handle backed
/// by a compiled AST root; holds per-function specialisation state".
///
/// `Compiled` is a per-context mutable AST root plus the immutable template
/// it was instantiated from: one `CallTarget` is shared by every call and
/// every closure instance of the same `FunctionTemplate` within a single
/// execution context (see `DESIGN.md` "Call-target instantiation" for why
/// sharing is scoped to a context rather than process-wide). `Builtin`
/// wraps a native Rust function and carries no per-function specialisation
/// state of its own.
#[derive(Debug)]
pub enum CallTarget {
    Compiled { template: Rc<FunctionTemplate>, root: Rc<ExprNode> },
    Builtin(Rc<BuiltinFn>),
}

impl CallTarget {
    #[must_use]
    pub fn instantiate(template: &Rc<FunctionTemplate>, pic_capacity: usize) -> Rc<Self> {
        Rc::new(Self::Compiled {
            template: Rc::clone(template),
            root: instantiate(&template.body, pic_capacity, template.span),
        })
    }

    #[must_use]
    pub fn builtin(builtin: Rc<BuiltinFn>) -> Rc<Self> {
        Rc::new(Self::Builtin(builtin))
    }
}
