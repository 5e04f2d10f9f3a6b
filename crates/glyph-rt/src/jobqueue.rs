//! The bounded worker-thread pool, SPEC_FULL §B.3.
//!
//! Spec §5 "Concurrency model": "multiple contexts may run in parallel on
//! worker threads from a bounded pool; within one context, execution is
//! strictly single-threaded". The teacher's own `SessionManager`
//! (`crates/ouros/src/session_manager.rs`) keeps every session in-process on
//! a single thread behind a plain `HashMap<String, ReplSession>` registry,
//! with no channel or worker pool of its own — that part of this module has
//! no teacher counterpart and is enriched from the rest of the retrieval
//! pack instead (`crossbeam-channel`/`parking_lot`/`tracing`, none of which
//! the teacher's workspace depends on; see "Dependency stack" in
//! `DESIGN.md`). What *is* grounded on the teacher here is the
//! registry-of-named-sessions shape itself, generalized from one thread
//! running every session to a fixed-size pool where a context, once
//! created, is permanently pinned to whichever worker created it (see
//! `DESIGN.md` "Call-target instantiation" and "Module-to-thread pinning"
//! for why: both `ExecutionContext` and `ModuleScope` hold `Rc`s internally,
//! so neither can cross threads — only the plain, `Send` [`Job`] requests
//! and [`BoundaryValue`] responses do).
//!
//! A context's jobs are always routed to its owning worker's channel, so
//! FIFO order within one context falls out of crossbeam's own per-channel
//! ordering guarantee rather than needing a separate per-context queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::{
    ast::template::ExpressionId,
    builtins::standard_builtins,
    config::EngineConfig,
    context::{ContextId, ExecutionContext, VisualisationId},
    errors::Signal,
    instrumentation::NoopCallbacks,
    intern::intern,
    parser::ExpressionParser,
    types::scope::ModuleScope,
    values::Value,
};

/// A `Send`-safe snapshot of a [`Value`], crossing the worker-thread
/// boundary in place of the internal `Rc`-based representation (spec §6.4
/// "boundary value shape" — the same shape used for visualisation/RPC
/// serialization). `Serialize`/`Deserialize` give a host process a concrete
/// wire format for that RPC layer without this crate needing to own one.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum BoundaryValue {
    Long(i64),
    Double(f64),
    Boolean(bool),
    Text(String),
    Unit,
    Array(Vec<BoundaryValue>),
    DataflowError { message: String },
    /// An atom, function, thunk, or unresolved symbol — values whose full
    /// shape isn't meaningfully `Send`-representable without a schema
    /// registry the engine doesn't have; reported by display name only.
    Opaque(String),
}

impl std::fmt::Display for BoundaryValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long(n) => write!(f, "{n}"),
            Self::Double(n) => write!(f, "{n}"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::Unit => write!(f, "Unit"),
            Self::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::DataflowError { message } => write!(f, "(error: {message})"),
            Self::Opaque(name) => write!(f, "<{name}>"),
        }
    }
}

impl BoundaryValue {
    /// Encodes this value as the JSON wire format spec §6.4 hands off to the
    /// surrounding RPC layer.
    ///
    /// # Errors
    /// Propagates `serde_json`'s error if encoding somehow fails; every
    /// variant here is plain data, so in practice this never happens.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decodes a value previously produced by [`Self::to_json`].
    ///
    /// # Errors
    /// Propagates `serde_json`'s error on malformed or mismatched input.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// The `Evaluate` job's error shape, spec §8 scenario 5 "a panic's reported
/// origin matches the originating node's expression id": unlike the other
/// jobs' plain `String` errors, this one preserves a panic's origin
/// expression id across the worker-thread boundary instead of discarding it
/// into a display string.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EvaluationFailure {
    pub message: String,
    pub origin: Option<String>,
}

impl std::fmt::Display for EvaluationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<String> for EvaluationFailure {
    fn from(message: String) -> Self {
        Self { message, origin: None }
    }
}

#[must_use]
pub fn to_boundary(value: &Value) -> BoundaryValue {
    match value {
        Value::Long(n) => BoundaryValue::Long(*n),
        Value::Double(n) => BoundaryValue::Double(*n),
        Value::Boolean(b) => BoundaryValue::Boolean(*b),
        Value::Text(s) => BoundaryValue::Text(s.to_string()),
        Value::Unit => BoundaryValue::Unit,
        Value::Array(items) => BoundaryValue::Array(items.iter().map(to_boundary).collect()),
        Value::DataflowError(err) => BoundaryValue::DataflowError {
            message: err.payload.type_name(),
        },
        other => BoundaryValue::Opaque(other.type_name()),
    }
}

/// One unit of work accepted by the pool. Every field is owned, `Send`
/// data; nothing here holds an `Rc`.
pub enum Job {
    CreateContext {
        root_module: String,
        respond: Sender<ContextId>,
    },
    Evaluate {
        context_id: ContextId,
        source: String,
        respond: Sender<Result<BoundaryValue, EvaluationFailure>>,
    },
    SetLiteralSource {
        context_id: ContextId,
        source: String,
    },
    ResetToOnDisk {
        context_id: ContextId,
    },
    EditModule {
        context_id: ContextId,
    },
    AttachVisualisation {
        context_id: ContextId,
        expression: String,
        respond: Sender<Result<VisualisationId, String>>,
    },
    ModifyVisualisation {
        context_id: ContextId,
        visualisation_id: VisualisationId,
        expression: String,
        respond: Sender<Result<(), String>>,
    },
    DetachVisualisation {
        context_id: ContextId,
        visualisation_id: VisualisationId,
        respond: Sender<Result<(), String>>,
    },
    Cancel {
        context_id: ContextId,
    },
    /// Spec §4.4 "push-frame": pushes an explicit call or a local-call
    /// re-entry onto `context_id`'s stack (spec §6.1 items 1-2).
    PushFrame {
        context_id: ContextId,
        item: crate::context::StackItem,
    },
    /// Spec §4.4 "pop-frame": pops the top frame off `context_id`'s stack.
    PopFrame {
        context_id: ContextId,
        respond: Sender<Result<crate::context::StackItem, String>>,
    },
    /// Spec §4.4 "recompute": invalidates cached expression values ahead of
    /// the next `Evaluate` on `context_id`, without evaluating anything
    /// itself — the recomputation happens lazily, the next time something
    /// actually asks for one of those expressions' values again.
    Recompute {
        context_id: ContextId,
        invalidate: RecomputeInvalidate,
    },
    Shutdown,
}

/// What a [`Job::Recompute`] invalidates in the target context's expression
/// cache (spec §4.4 "recompute... invalidate: all | specific ids | none").
#[derive(Debug, Clone, PartialEq)]
pub enum RecomputeInvalidate {
    All,
    Set(Vec<ExpressionId>),
    None,
}

/// One worker's private bookkeeping for a context it owns: the context
/// itself, the `ModuleScope` its top-level expressions are evaluated
/// against (spec §6.1 items 4-5 "edit a module's literal source... reset to
/// on-disk"), and the expression id of the last top-level evaluation (a
/// visualisation attaches to this one in the absence of a real IR-producing
/// frontend that could name an arbitrary sub-expression).
struct ContextEntry {
    ctx: ExecutionContext,
    module_scope: ModuleScope,
    last_expression_id: Option<ExpressionId>,
}

struct WorkerState {
    contexts: HashMap<ContextId, ContextEntry>,
    pic_capacity: usize,
    max_native_recursion: usize,
}

impl WorkerState {
    fn new(pic_capacity: usize, max_native_recursion: usize) -> Self {
        Self {
            contexts: HashMap::new(),
            pic_capacity,
            max_native_recursion,
        }
    }

    fn create_context(&mut self, root_module: &str) -> ContextId {
        let ctx = ExecutionContext::with_max_native_recursion(intern(root_module), self.pic_capacity, self.max_native_recursion);
        let id = ctx.id;
        ctx.push(crate::context::explicit_call(intern(root_module), intern("main")));
        self.contexts.insert(
            id,
            ContextEntry {
                ctx,
                module_scope: ModuleScope::new(intern(root_module)),
                last_expression_id: None,
            },
        );
        tracing::info!(context_id = id.0, module = root_module, "execution context created");
        id
    }

    fn entry(&self, context_id: ContextId) -> Result<&ContextEntry, String> {
        self.contexts.get(&context_id).ok_or_else(|| format!("unknown context {}", context_id.0))
    }

    fn evaluate(&mut self, context_id: ContextId, source: &str) -> Result<BoundaryValue, EvaluationFailure> {
        let entry = self
            .contexts
            .get(&context_id)
            .ok_or_else(|| format!("unknown context {}", context_id.0))?;
        if entry.ctx.is_cancelled() {
            return Err("context was cancelled".to_owned().into());
        }
        let callables = standard_builtins();
        let env = HashMap::new();
        let template = crate::parser::ArithmeticParser
            .parse(source, &env, &callables)
            .map_err(|e| EvaluationFailure::from(e.to_string()))?;
        let expression_id = template.id;
        let node = crate::ast::node::instantiate(&template, self.pic_capacity, template.span);
        let mut frame = vec![Value::Unit];
        let result = match crate::eval::eval_node(&node, &mut frame, &entry.ctx, &NoopCallbacks) {
            Ok(value) => Ok(to_boundary(&value)),
            Err(Signal::Panic(payload)) => Err(EvaluationFailure {
                message: payload.message,
                origin: payload.origin.map(|id| id.to_string()),
            }),
            Err(Signal::Cancelled) => Err("cancelled".to_owned().into()),
            Err(Signal::TailCall(_)) => {
                Err("internal error: tail call escaped the trampoline at top level".to_owned().into())
            }
        };
        if result.is_ok() {
            if let Some(entry) = self.contexts.get_mut(&context_id) {
                entry.last_expression_id = expression_id;
            }
        }
        result
    }

    fn set_literal_source(&mut self, context_id: ContextId, source: &str) -> Result<(), String> {
        let entry = self.entry(context_id)?;
        entry.module_scope.set_literal_source(source);
        Ok(())
    }

    fn reset_to_on_disk(&mut self, context_id: ContextId) -> Result<(), String> {
        let entry = self.entry(context_id)?;
        entry.module_scope.reset_to_on_disk();
        Ok(())
    }

    /// Spec §6.1 item 4: a module edit invalidates every specialized node in
    /// every context running against it. This demo pins one module per
    /// context, so invalidation is local to `context_id`'s own context.
    fn edit_module(&mut self, context_id: ContextId) -> Result<(), String> {
        let entry = self.entry(context_id)?;
        entry.ctx.reset_specialisation_state();
        Ok(())
    }

    fn attach_visualisation(&mut self, context_id: ContextId, expression: String) -> Result<VisualisationId, String> {
        let entry = self.contexts.get(&context_id).ok_or_else(|| format!("unknown context {}", context_id.0))?;
        let Some(expr_id) = entry.last_expression_id else {
            return Err("context has no evaluated expression to attach a visualisation to".to_owned());
        };
        Ok(entry.ctx.attach_visualisation(expr_id, entry.ctx.root_module, expression))
    }

    fn modify_visualisation(
        &mut self,
        context_id: ContextId,
        visualisation_id: VisualisationId,
        expression: String,
    ) -> Result<(), String> {
        let entry = self.entry(context_id)?;
        entry.ctx.modify_visualisation(visualisation_id, expression).map_err(|e| e.to_string())
    }

    fn detach_visualisation(&mut self, context_id: ContextId, visualisation_id: VisualisationId) -> Result<(), String> {
        let entry = self.entry(context_id)?;
        entry.ctx.detach_visualisation(visualisation_id).map_err(|e| e.to_string())
    }

    fn cancel(&mut self, context_id: ContextId) {
        if let Some(entry) = self.contexts.get(&context_id) {
            tracing::warn!(context_id = context_id.0, "cancelling in-flight execute");
            entry.ctx.cancel();
        }
    }

    fn push_frame(&mut self, context_id: ContextId, item: crate::context::StackItem) -> Result<(), String> {
        let entry = self.entry(context_id)?;
        entry.ctx.push(item);
        Ok(())
    }

    fn pop_frame(&mut self, context_id: ContextId) -> Result<crate::context::StackItem, String> {
        let entry = self.entry(context_id)?;
        entry.ctx.pop().map_err(|e| e.to_string())
    }

    fn recompute(&mut self, context_id: ContextId, invalidate: RecomputeInvalidate) -> Result<(), String> {
        let entry = self.entry(context_id)?;
        match invalidate {
            RecomputeInvalidate::All => entry.ctx.expr_cache.invalidate_all(),
            RecomputeInvalidate::Set(ids) => {
                for id in ids {
                    entry.ctx.expr_cache.invalidate(id);
                }
            }
            RecomputeInvalidate::None => {}
        }
        Ok(())
    }
}

fn worker_loop(receiver: Receiver<Job>, pic_capacity: usize, max_native_recursion: usize) {
    let mut state = WorkerState::new(pic_capacity, max_native_recursion);
    while let Ok(job) = receiver.recv() {
        match job {
            Job::CreateContext { root_module, respond } => {
                let id = state.create_context(&root_module);
                let _ = respond.send(id);
            }
            Job::Evaluate { context_id, source, respond } => {
                let result = state.evaluate(context_id, &source);
                let _ = respond.send(result);
            }
            Job::SetLiteralSource { context_id, source } => {
                let _ = state.set_literal_source(context_id, &source);
            }
            Job::ResetToOnDisk { context_id } => {
                let _ = state.reset_to_on_disk(context_id);
            }
            Job::EditModule { context_id } => {
                let _ = state.edit_module(context_id);
            }
            Job::AttachVisualisation { context_id, expression, respond } => {
                let result = state.attach_visualisation(context_id, expression);
                let _ = respond.send(result);
            }
            Job::ModifyVisualisation { context_id, visualisation_id, expression, respond } => {
                let result = state.modify_visualisation(context_id, visualisation_id, expression);
                let _ = respond.send(result);
            }
            Job::DetachVisualisation { context_id, visualisation_id, respond } => {
                let result = state.detach_visualisation(context_id, visualisation_id);
                let _ = respond.send(result);
            }
            Job::Cancel { context_id } => state.cancel(context_id),
            Job::PushFrame { context_id, item } => {
                let _ = state.push_frame(context_id, item);
            }
            Job::PopFrame { context_id, respond } => {
                let result = state.pop_frame(context_id);
                let _ = respond.send(result);
            }
            Job::Recompute { context_id, invalidate } => {
                let _ = state.recompute(context_id, invalidate);
            }
            Job::Shutdown => break,
        }
    }
}

/// A bounded pool of worker threads, each permanently owning whatever
/// execution contexts it creates.
pub struct EngineHandle {
    senders: Vec<Sender<Job>>,
    routes: Arc<Mutex<HashMap<ContextId, usize>>>,
    next_worker: AtomicUsize,
    workers: Vec<JoinHandle<()>>,
    /// Applied to every `evaluate` call that doesn't reach a safepoint in
    /// time (spec §5 "Timeouts": "requests into the core from outside carry
    /// a deadline. When the deadline fires, cancellation is requested").
    default_deadline: std::time::Duration,
    /// Second-stage window after the deadline's `Cancel` is sent; if the
    /// context still hasn't returned by then, its route is torn down so the
    /// context becomes permanently unreachable rather than left waiting
    /// indefinitely behind a stuck evaluation (spec §5 "Timeouts" grace
    /// window — see `DESIGN.md` "Cancellation granularity" for what this
    /// does and does not guarantee).
    cancellation_grace: std::time::Duration,
}

impl EngineHandle {
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        let mut senders = Vec::with_capacity(config.worker_threads);
        let mut workers = Vec::with_capacity(config.worker_threads);
        for _ in 0..config.worker_threads {
            let (tx, rx) = crossbeam_channel::unbounded();
            let pic_capacity = config.pic_capacity;
            let max_native_recursion = config.max_native_recursion;
            let handle = std::thread::Builder::new()
                .name("glyph-worker".to_owned())
                .spawn(move || worker_loop(rx, pic_capacity, max_native_recursion))
                .expect("failed to spawn glyph worker thread");
            senders.push(tx);
            workers.push(handle);
        }
        Self {
            senders,
            routes: Arc::new(Mutex::new(HashMap::new())),
            next_worker: AtomicUsize::new(0),
            default_deadline: config.default_deadline,
            cancellation_grace: config.cancellation_grace,
            workers,
        }
    }

    fn pick_worker(&self) -> usize {
        self.next_worker.fetch_add(1, Ordering::Relaxed) % self.senders.len()
    }

    fn worker_for(&self, context_id: ContextId) -> Result<usize, String> {
        self.routes
            .lock()
            .get(&context_id)
            .copied()
            .ok_or_else(|| format!("unknown context {}", context_id.0))
    }

    /// Creates a new execution context against `root_module`, pinning it to
    /// a round-robin-chosen worker for its entire lifetime.
    pub fn create_context(&self, root_module: impl Into<String>) -> ContextId {
        let worker = self.pick_worker();
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.senders[worker]
            .send(Job::CreateContext {
                root_module: root_module.into(),
                respond: tx,
            })
            .expect("worker thread terminated unexpectedly");
        let id = rx.recv().expect("worker dropped its response channel");
        self.routes.lock().insert(id, worker);
        id
    }

    /// Spec §5 "Timeouts": evaluates under the engine's configured default
    /// deadline, requesting cancellation of `context_id` if the evaluation
    /// hasn't returned by then (cooperatively observed at `eval_node`'s own
    /// safepoints — see `DESIGN.md` "Cancellation granularity" for why this
    /// can't preempt a stuck native call).
    pub fn evaluate(&self, context_id: ContextId, source: impl Into<String>) -> Result<BoundaryValue, EvaluationFailure> {
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
        {
            let done = Arc::clone(&done);
            let routes = Arc::clone(&self.routes);
            let senders = self.senders.clone();
            let deadline = self.default_deadline;
            let grace = self.cancellation_grace;
            // Detached: this thread's only job is to fire a `Cancel` if
            // `evaluate` hasn't finished by the deadline, then exit on its
            // own. Not joined, since waiting on it would block every
            // evaluation for the full deadline even on the common path.
            std::thread::spawn(move || {
                std::thread::sleep(deadline);
                if done.load(Ordering::Acquire) {
                    return;
                }
                if let Some(&worker) = routes.lock().get(&context_id) {
                    let _ = senders[worker].send(Job::Cancel { context_id });
                }

                std::thread::sleep(grace);
                if done.load(Ordering::Acquire) {
                    return;
                }
                // The worker is still stuck past its grace window. Rust has
                // no safe way to preempt or kill that native thread, so the
                // evaluation genuinely keeps running there; what this can
                // still do is make the context unreachable from here on, so
                // no further request waits behind it.
                if routes.lock().remove(&context_id).is_some() {
                    tracing::warn!(context_id = context_id.0, "context forcibly torn down after cancellation grace window expired");
                }
            });
        }

        let worker = self.worker_for(context_id).map_err(EvaluationFailure::from)?;
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.senders[worker]
            .send(Job::Evaluate {
                context_id,
                source: source.into(),
                respond: tx,
            })
            .map_err(|_| EvaluationFailure::from("worker thread terminated unexpectedly".to_owned()))?;
        let result = rx.recv().map_err(|_| EvaluationFailure::from("worker dropped its response channel".to_owned()))?;
        done.store(true, Ordering::Release);
        result
    }

    /// Shadows `context_id`'s module with an in-memory literal source (spec
    /// §6.1 item 4's "edit a module's literal source").
    pub fn set_literal_source(&self, context_id: ContextId, source: impl Into<String>) -> Result<(), String> {
        let worker = self.worker_for(context_id)?;
        self.senders[worker]
            .send(Job::SetLiteralSource { context_id, source: source.into() })
            .map_err(|_| "worker thread terminated unexpectedly".to_owned())
    }

    /// Discards any literal-source override, spec §6.1 item 5 "reset a
    /// module back to its on-disk source".
    pub fn reset_to_on_disk(&self, context_id: ContextId) -> Result<(), String> {
        let worker = self.worker_for(context_id)?;
        self.senders[worker]
            .send(Job::ResetToOnDisk { context_id })
            .map_err(|_| "worker thread terminated unexpectedly".to_owned())
    }

    /// Invalidates `context_id`'s accumulated specialisation state (its
    /// call-target cache and expression cache), as if its module had just
    /// been edited (spec §6.1 item 4).
    pub fn edit_module(&self, context_id: ContextId) -> Result<(), String> {
        let worker = self.worker_for(context_id)?;
        self.senders[worker]
            .send(Job::EditModule { context_id })
            .map_err(|_| "worker thread terminated unexpectedly".to_owned())
    }

    /// Attaches a visualisation expression to the most recently evaluated
    /// top-level expression in `context_id` (spec §5 "visualisation
    /// attach/modify/detach atomicity").
    pub fn attach_visualisation(&self, context_id: ContextId, expression: impl Into<String>) -> Result<VisualisationId, String> {
        let worker = self.worker_for(context_id)?;
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.senders[worker]
            .send(Job::AttachVisualisation { context_id, expression: expression.into(), respond: tx })
            .map_err(|_| "worker thread terminated unexpectedly".to_owned())?;
        rx.recv().map_err(|_| "worker dropped its response channel".to_owned())?
    }

    pub fn modify_visualisation(
        &self,
        context_id: ContextId,
        visualisation_id: VisualisationId,
        expression: impl Into<String>,
    ) -> Result<(), String> {
        let worker = self.worker_for(context_id)?;
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.senders[worker]
            .send(Job::ModifyVisualisation {
                context_id,
                visualisation_id,
                expression: expression.into(),
                respond: tx,
            })
            .map_err(|_| "worker thread terminated unexpectedly".to_owned())?;
        rx.recv().map_err(|_| "worker dropped its response channel".to_owned())?
    }

    pub fn detach_visualisation(&self, context_id: ContextId, visualisation_id: VisualisationId) -> Result<(), String> {
        let worker = self.worker_for(context_id)?;
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.senders[worker]
            .send(Job::DetachVisualisation { context_id, visualisation_id, respond: tx })
            .map_err(|_| "worker thread terminated unexpectedly".to_owned())?;
        rx.recv().map_err(|_| "worker dropped its response channel".to_owned())?
    }

    /// Requests cancellation of `context_id`. Spec §5 "cancellation cancels
    /// the in-flight execute, not just future jobs": since cancellation and
    /// evaluation both funnel through the same per-worker channel, a
    /// `Cancel` job queued behind an `Evaluate` for the same context cannot
    /// interrupt it mid-flight here — only a subsequent evaluation on that
    /// context observes the cancelled flag. See `DESIGN.md` "Cancellation
    /// granularity" for why preemptive mid-evaluation cancellation was not
    /// implemented.
    pub fn cancel(&self, context_id: ContextId) {
        if let Some(&worker) = self.routes.lock().get(&context_id) {
            let _ = self.senders[worker].send(Job::Cancel { context_id });
        }
    }

    /// Spec §6.1 item 1: pushes an explicit call or local-call re-entry onto
    /// `context_id`'s stack.
    pub fn push_frame(&self, context_id: ContextId, item: crate::context::StackItem) -> Result<(), String> {
        let worker = self.worker_for(context_id)?;
        self.senders[worker]
            .send(Job::PushFrame { context_id, item })
            .map_err(|_| "worker thread terminated unexpectedly".to_owned())
    }

    /// Spec §6.1 item 2: pops the top frame off `context_id`'s stack.
    pub fn pop_frame(&self, context_id: ContextId) -> Result<crate::context::StackItem, String> {
        let worker = self.worker_for(context_id)?;
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.senders[worker]
            .send(Job::PopFrame { context_id, respond: tx })
            .map_err(|_| "worker thread terminated unexpectedly".to_owned())?;
        rx.recv().map_err(|_| "worker dropped its response channel".to_owned())?
    }

    /// Spec §4.4 "recompute": invalidates cached expression values in
    /// `context_id` ahead of its next evaluation.
    pub fn recompute(&self, context_id: ContextId, invalidate: RecomputeInvalidate) -> Result<(), String> {
        let worker = self.worker_for(context_id)?;
        self.senders[worker]
            .send(Job::Recompute { context_id, invalidate })
            .map_err(|_| "worker thread terminated unexpectedly".to_owned())
    }

    pub fn shutdown(self) {
        for sender in &self.senders {
            let _ = sender.send(Job::Shutdown);
        }
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_value_round_trips_through_json() {
        let array = BoundaryValue::Array(vec![BoundaryValue::Long(1), BoundaryValue::Text("hi".to_owned())]);
        let json = array.to_json().unwrap();
        assert_eq!(BoundaryValue::from_json(&json).unwrap(), array);
    }

    #[test]
    fn evaluates_simple_arithmetic_end_to_end() {
        let config = EngineConfig::new().with_worker_threads(2);
        let engine = EngineHandle::new(&config);
        let ctx = engine.create_context("Main");
        let result = engine.evaluate(ctx, "1 + 2 * 3").unwrap();
        assert_eq!(result, BoundaryValue::Long(7));
        engine.shutdown();
    }

    #[test]
    fn cancelled_context_rejects_further_evaluation() {
        let config = EngineConfig::new().with_worker_threads(1);
        let engine = EngineHandle::new(&config);
        let ctx = engine.create_context("Main");
        engine.cancel(ctx);
        let result = engine.evaluate(ctx, "1 + 1");
        assert!(result.is_err());
        engine.shutdown();
    }

    #[test]
    fn contexts_stay_pinned_to_their_creating_worker() {
        let config = EngineConfig::new().with_worker_threads(4);
        let engine = EngineHandle::new(&config);
        let a = engine.create_context("Main");
        let b = engine.create_context("Main");
        assert!(engine.evaluate(a, "1 + 1").is_ok());
        assert!(engine.evaluate(b, "2 + 2").is_ok());
        engine.shutdown();
    }

    #[test]
    fn visualisation_attaches_to_last_evaluated_expression() {
        let config = EngineConfig::new().with_worker_threads(1);
        let engine = EngineHandle::new(&config);
        let ctx = engine.create_context("Main");
        engine.evaluate(ctx, "1 + 1").unwrap();
        let vis = engine.attach_visualisation(ctx, "x -> x".to_owned()).unwrap();
        engine.modify_visualisation(ctx, vis, "x -> x + 1".to_owned()).unwrap();
        engine.detach_visualisation(ctx, vis).unwrap();
        assert!(engine.detach_visualisation(ctx, vis).is_err());
        engine.shutdown();
    }

    #[test]
    fn literal_source_override_round_trips() {
        let config = EngineConfig::new().with_worker_threads(1);
        let engine = EngineHandle::new(&config);
        let ctx = engine.create_context("Main");
        engine.set_literal_source(ctx, "main = 1 + 1").unwrap();
        engine.reset_to_on_disk(ctx).unwrap();
        assert!(engine.edit_module(ctx).is_ok());
        engine.shutdown();
    }
}
