//! Immutable IR produced at module-compile time.
//!
//! Spec §3 "AST nodes": "nodes are produced from IR at module-compile time,
//! mutated in place during execution... released when their owning
//! function's call-target is discarded." [`NodeTemplate`] is the
//! *produced-from-IR* half — a plain, `Clone`-able tree with no runtime
//! state — and [`super::node::ExprNode`] is the *mutated-in-place* half,
//! instantiated from a template the first time an execution context calls
//! the owning function (see `DESIGN.md` for why instantiation is
//! per-context rather than process-global).
//!
//! This is the seam an external IR-producing parser (spec §6.1 item 1,
//! explicitly out of core scope) targets: anything that can build a
//! [`FunctionTemplate`] tree can drive the rest of the engine.

use std::sync::atomic::{AtomicU32, Ordering};

use uuid::Uuid;

use crate::{intern::InternedStr, values::Value};

/// Primary key of the expression cache (spec GLOSSARY "Expression id").
///
/// Attached during IR lowering to source-identifiable expressions; not
/// every node has one (e.g. a node synthesized during a later
/// specialization pass might not be independently cacheable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExpressionId(pub Uuid);

impl ExpressionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExpressionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExpressionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A `{line, col}` source location, line/col both zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourcePos {
    pub line: u32,
    pub col: u32,
}

/// A half-open `[start, end)` source range, spec §6.1 item 3's `TextEdit`
/// range shape reused for node spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceSpan {
    pub start: SourcePos,
    pub end: SourcePos,
}

impl SourceSpan {
    #[must_use]
    pub fn contains_line_range(&self, other: &SourceSpan) -> bool {
        self.start.line <= other.start.line && other.end.line <= self.end.line
    }
}

/// Local variable slot index within a function's namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub u32);

/// A local scope snapshot captured by a closure or thunk.
///
/// The language this engine executes has no mutable local reassignment
/// (spec's data model never mentions one), so a captured scope is an
/// immutable, cheaply-`Clone`-able snapshot rather than a `RefCell`ed
/// vector — simpler than the teacher's mutable `Namespace`
/// (`crates/ouros/src/namespace.rs`), which exists to support Python's
/// `nonlocal`/cell-variable mutation.
pub type LocalScope = std::rc::Rc<[Value]>;

/// Process-wide unique id for a [`FunctionTemplate`], used as the cache key
/// an [`crate::context::ExecutionContext`] uses to find (or lazily build)
/// the shared, mutable [`super::node::CallTarget`] for that function within
/// itself. See `DESIGN.md` "Call-target instantiation" for the rationale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionTemplateId(u32);

static NEXT_TEMPLATE_ID: AtomicU32 = AtomicU32::new(0);

impl FunctionTemplateId {
    fn fresh() -> Self {
        Self(NEXT_TEMPLATE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Tail status of a node, spec §3 "a tail-status flag
/// (`not-tail | tail-direct | tail-loop`)".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailStatus {
    NotTail,
    /// Syntactically a tail call but not (yet) proven to be a *self* tail
    /// call; still routed through the call-optimiser so megamorphic
    /// mutual-recursion cycles are also trampolined.
    TailDirect,
    /// A tail call the optimiser has confirmed loops (directly or via
    /// mutual recursion) and is driving iteratively.
    TailLoop,
}

/// One argument expression in a call, paired with whether it should be
/// evaluated eagerly or handed to the callee as a `Thunk` (spec §3: a
/// `Function`'s `schema: ArgSchema` governs this per-parameter; the template
/// mirrors that decision per call-site argument so `create-function`/
/// `function-call` nodes agree on evaluation strategy without consulting the
/// callee at every call).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgStrategy {
    Eager,
    Suspended,
}

/// An immutable IR node, as produced by module compilation.
///
/// Mirrors spec §3's case list: "literal, variable-read, function-call,
/// case-branch, method-dispatch, create-function, force-thunk,
/// instrument-sentry", plus the `FunctionCallInstrumentationNode` wrapper
/// spec §3 calls out as a distinct, no-op node interposed at every call
/// site.
#[derive(Debug, Clone)]
pub enum NodeTemplate {
    Literal(Value),
    VariableRead(SlotId),
    /// A non-polymorphic call: callee is already resolved to a concrete
    /// function value (e.g. a local closure variable, not a
    /// `receiver.method(...)` dispatch).
    FunctionCall {
        callee: Box<TaggedTemplate>,
        args: Vec<(TaggedTemplate, ArgStrategy)>,
    },
    /// `receiver.method(args...)`, spec §4.1: resolved through the PIC at
    /// the call-site this template instantiates.
    MethodDispatch {
        method_name: InternedStr,
        receiver: Box<TaggedTemplate>,
        args: Vec<(TaggedTemplate, ArgStrategy)>,
    },
    CaseBranch {
        scrutinee: Box<TaggedTemplate>,
        /// Each arm matches a constructor by name (None = wildcard/default
        /// arm) and binds its fields into fresh slots starting at
        /// `bind_from`.
        arms: Vec<CaseArm>,
    },
    CreateFunction {
        template: std::rc::Rc<FunctionTemplate>,
        /// Enclosing-scope slots captured into the closure's `LocalScope`,
        /// in order.
        captured_slots: Vec<SlotId>,
    },
    ForceThunk(Box<TaggedTemplate>),
    /// Wraps any identified expression so the instrumentation fabric can
    /// observe its enter/return events (spec §4.3).
    InstrumentSentry(Box<TaggedTemplate>),
    /// Wraps a call site specifically, distinct from a general sentry
    /// (spec §4.3 item 5: function-call instrumentation nodes report
    /// `onFunctionReturn`, not the generic enter/return pair).
    FunctionCallInstrumentation(Box<TaggedTemplate>),
}

#[derive(Debug, Clone)]
pub struct CaseArm {
    pub ctor_name: Option<InternedStr>,
    pub bind_from: SlotId,
    pub body: TaggedTemplate,
}

/// A tagged template, carrying the optional expression id/span/tail-status
/// spec §3 attaches to every node, plus an "avoid instrumentation" flag for
/// nodes explicitly excluded from the expression cache (spec §4.3 item 1c).
#[derive(Debug, Clone)]
pub struct TaggedTemplate {
    pub id: Option<ExpressionId>,
    pub span: Option<SourceSpan>,
    pub tail_status: TailStatus,
    pub avoid_id_instrumentation: bool,
    pub kind: NodeTemplate,
}

impl TaggedTemplate {
    #[must_use]
    pub fn new(kind: NodeTemplate) -> Self {
        Self {
            id: None,
            span: None,
            tail_status: TailStatus::NotTail,
            avoid_id_instrumentation: false,
            kind,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: ExpressionId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn with_span(mut self, span: SourceSpan) -> Self {
        self.span = Some(span);
        self
    }

    #[must_use]
    pub fn with_tail_status(mut self, status: TailStatus) -> Self {
        self.tail_status = status;
        self
    }
}

/// The compiled, not-yet-specialized shape of a function body (spec §3
/// "AST nodes... Lifecycle").
#[derive(Debug)]
pub struct FunctionTemplate {
    pub id: FunctionTemplateId,
    pub name: InternedStr,
    pub param_count: usize,
    pub param_defaults: Vec<Option<TaggedTemplate>>,
    pub param_strategies: Vec<ArgStrategy>,
    pub namespace_size: usize,
    pub body: TaggedTemplate,
    /// Source span covering the whole function; instrumentation only
    /// captures nodes whose span lies within this range (spec §4.3 item 1:
    /// "excludes nested lambdas spawned mid-expression").
    pub span: Option<SourceSpan>,
    /// Whether `body`'s root is itself eligible for tail-call optimisation
    /// (spec §4.2: "Every `MethodRootNode` and closure root carries a
    /// tail-status flag").
    pub is_tail_root: bool,
    /// The module this function was compiled into. Consulted by every
    /// `method-dispatch` node in `body` to resolve method lookups and
    /// imports — a function's defining module never changes after it is
    /// compiled, so this is plain data rather than something threaded
    /// through every call.
    pub defining_scope: crate::types::scope::ModuleScope,
}

impl FunctionTemplate {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: InternedStr,
        param_count: usize,
        param_defaults: Vec<Option<TaggedTemplate>>,
        param_strategies: Vec<ArgStrategy>,
        namespace_size: usize,
        body: TaggedTemplate,
        span: Option<SourceSpan>,
        defining_scope: crate::types::scope::ModuleScope,
    ) -> std::rc::Rc<Self> {
        std::rc::Rc::new(Self {
            id: FunctionTemplateId::fresh(),
            name,
            param_count,
            param_defaults,
            param_strategies,
            namespace_size,
            body,
            span,
            is_tail_root: true,
            defining_scope,
        })
    }
}
