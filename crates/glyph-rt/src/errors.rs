//! Error taxonomy exposed at the engine boundary.
//!
//! Mirrors the teacher's `ReplError`/`SessionError` split: a flat enum with a
//! hand-written `Display`/`std::error::Error` impl and `From` conversions,
//! rather than a `thiserror` derive. Variants correspond 1:1 to the abstract
//! error kinds the surrounding RPC layer is expected to map to stable numeric
//! codes.

use std::fmt;

use crate::values::Value;

/// An engine-level error kind, stable across the public API surface.
///
/// These are the kinds an enclosing RPC layer maps to numeric codes; the
/// engine itself never assigns numbers.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Method lookup walked the whole type chain without finding `name`.
    MethodDoesNotExist { type_name: String, method_name: String },
    /// A primitive operation received a value of the wrong shape.
    TypeError { expected: String, got: String, context: String },
    /// Integer division or modulo by zero.
    DivideByZero,
    /// An array index was out of bounds or not an integer.
    InvalidArrayIndex { index: i64, length: usize },
    /// `evaluate_expression_in_module`/`call_method` referenced a module that
    /// isn't registered.
    ModuleNotFound { module: String },
    /// An execution-context operation referenced an unknown `ContextId`.
    ContextNotFound { id: u64 },
    /// A `pop()` job arrived with no frame left to pop.
    EmptyStack,
    /// A stack item was pushed or inspected in a shape the current top frame
    /// does not accept.
    InvalidStackItem { reason: String },
    /// A visualisation operation referenced an unknown `VisualisationId`.
    VisualisationNotFound { id: u64 },
    /// A visualisation's expression raised while being evaluated.
    VisualisationExpressionFailed { reason: String },
    /// An invariant the public API assumes was violated. Should never be
    /// reachable in practice; kept as an escape hatch rather than a panic so
    /// that a bug in one request cannot take down the whole process.
    Internal(String),
    /// A language-level panic unwound to the request root. `origin` is the
    /// originating expression id (spec §8 "a panic's reported origin matches
    /// the originating node's expression id"), when one was recorded.
    Panicked { message: String, origin: Option<String> },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MethodDoesNotExist { type_name, method_name } => {
                write!(f, "method `{method_name}` does not exist on type `{type_name}`")
            }
            Self::TypeError { expected, got, context } => {
                write!(f, "type error in {context}: expected {expected}, got {got}")
            }
            Self::DivideByZero => write!(f, "divide by zero"),
            Self::InvalidArrayIndex { index, length } => {
                write!(f, "index {index} out of bounds for array of length {length}")
            }
            Self::ModuleNotFound { module } => write!(f, "module not found: {module}"),
            Self::ContextNotFound { id } => write!(f, "execution context not found: {id}"),
            Self::EmptyStack => write!(f, "stack is empty"),
            Self::InvalidStackItem { reason } => write!(f, "invalid stack item: {reason}"),
            Self::VisualisationNotFound { id } => write!(f, "visualisation not found: {id}"),
            Self::VisualisationExpressionFailed { reason } => {
                write!(f, "visualisation expression failed: {reason}")
            }
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
            Self::Panicked { message, origin: Some(origin) } => write!(f, "panic at {origin}: {message}"),
            Self::Panicked { message, origin: None } => write!(f, "panic: {message}"),
        }
    }
}

impl std::error::Error for EngineError {}

/// The two non-local transfers the interpreter can produce, per spec §4.5.
///
/// A `DataflowError` is a first-class `Value` (see [`Value::DataflowError`])
/// that propagates by ordinary return, never through this type. `Signal` is
/// reserved for control flow that is *not* representable as a value: a
/// panic unwinding to the request root, or a tail call being handed back to
/// its trampoline.
#[derive(Debug, Clone)]
pub enum Signal {
    /// An abortive panic unwinding toward the execution request's root.
    Panic(crate::values::PanicPayload),
    /// A tail position wants its callee invoked by the trampoline instead of
    /// recursing natively. Only ever observed by `call::trampoline`.
    TailCall(crate::call::trampoline::PendingTailCall),
    /// Cooperative cancellation observed at a safepoint.
    Cancelled,
}

impl Signal {
    #[must_use]
    pub fn panic(payload: impl Into<Value>, message: impl Into<String>) -> Self {
        Self::Panic(crate::values::PanicPayload {
            payload: payload.into(),
            message: message.into(),
            origin: None,
        })
    }
}

pub type EvalResult = Result<Value, Signal>;
