//! The runtime value taxonomy, spec §3 "Data model".
//!
//! Grounded in the teacher's `value::Value` (`crates/ouros/src/value.rs`),
//! an `enum`-of-variants value representation with `Rc`-shared heap data —
//! generalized from CPython's object model down to the closed set of kinds
//! spec §3 actually names.

use std::rc::Rc;

use crate::{
    ast::template::ExpressionId,
    intern::InternedStr,
    types::ctor::TypeCtor,
};

/// One frame of a dataflow error's or panic's origin trace, spec §4.5 "each
/// `DataflowError` records... an optional chain of prior dataflow errors it
/// was derived from (for `map`-like propagation)".
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorTraceFrame {
    pub expression_id: Option<ExpressionId>,
    pub label: String,
}

/// A first-class error value, spec §4.5 "Dataflow errors are ordinary
/// values... never unwind the native call stack".
///
/// Two `DataflowError`s are the "same" error (spec §8 "dataflow-error
/// identity propagation") iff they share an `origin_id`: propagation through
/// `map`/arithmetic/etc. clones the payload and trace but keeps the id, so a
/// caller can recognize "this is still that one division by zero" without
/// comparing payload contents.
#[derive(Debug, Clone, PartialEq)]
pub struct DataflowError {
    pub origin_id: u64,
    pub payload: Box<Value>,
    pub trace: Vec<ErrorTraceFrame>,
}

static NEXT_ERROR_ORIGIN_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

impl DataflowError {
    /// Constructs a brand-new error at its point of origin.
    #[must_use]
    pub fn new(payload: Value, origin_label: impl Into<String>, origin_expr: Option<ExpressionId>) -> Self {
        Self {
            origin_id: NEXT_ERROR_ORIGIN_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
            payload: Box::new(payload),
            trace: vec![ErrorTraceFrame {
                expression_id: origin_expr,
                label: origin_label.into(),
            }],
        }
    }

    /// Propagates this error through another expression, preserving
    /// `origin_id` and appending a trace frame.
    #[must_use]
    pub fn propagate_through(&self, label: impl Into<String>, expr: Option<ExpressionId>) -> Self {
        let mut trace = self.trace.clone();
        trace.push(ErrorTraceFrame {
            expression_id: expr,
            label: label.into(),
        });
        Self {
            origin_id: self.origin_id,
            payload: self.payload.clone(),
            trace,
        }
    }
}

/// The payload carried by a [`crate::errors::Signal::Panic`], spec §4.5
/// "Panics... carry an arbitrary value payload and, once caught, a
/// best-effort origin-expression id for diagnostics".
#[derive(Debug, Clone, PartialEq)]
pub struct PanicPayload {
    pub payload: Value,
    pub message: String,
    /// The expression the panic was first raised from, filled in by the
    /// first `force-thunk`/`function-call` node that observes it unwinding
    /// through it, spec §8 "panic localization to exact expression id".
    pub origin: Option<ExpressionId>,
}

/// A suspended computation, forced at most once (spec §3 "Thunk... forced
/// at most once; subsequent forces return the memoized result").
#[derive(Debug)]
pub struct Thunk {
    state: std::cell::RefCell<ThunkState>,
}

#[derive(Debug)]
enum ThunkState {
    Suspended {
        node: Rc<crate::ast::node::ExprNode>,
        scope: crate::ast::template::LocalScope,
    },
    Forced(Value),
    /// Forcing is in progress on the current call stack; a recursive force
    /// of the same thunk is a use-before-ready bug in the source program,
    /// not an engine defect, and is reported as an ordinary panic rather
    /// than a native stack overflow or silent deadlock.
    InProgress,
}

impl Thunk {
    #[must_use]
    pub fn suspended(node: Rc<crate::ast::node::ExprNode>, scope: crate::ast::template::LocalScope) -> Rc<Self> {
        Rc::new(Self {
            state: std::cell::RefCell::new(ThunkState::Suspended { node, scope }),
        })
    }

    /// Returns the memoized value if this thunk has already been forced.
    #[must_use]
    pub fn peek(&self) -> Option<Value> {
        match &*self.state.borrow() {
            ThunkState::Forced(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Takes ownership of the suspended node/scope for forcing, marking the
    /// thunk `InProgress`. Returns `None` if the thunk is already forced or
    /// being forced.
    pub fn take_for_forcing(&self) -> Option<(Rc<crate::ast::node::ExprNode>, crate::ast::template::LocalScope)> {
        let mut state = self.state.borrow_mut();
        match std::mem::replace(&mut *state, ThunkState::InProgress) {
            ThunkState::Suspended { node, scope } => Some((node, scope)),
            other @ (ThunkState::Forced(_) | ThunkState::InProgress) => {
                *state = other;
                None
            }
        }
    }

    pub fn store_result(&self, value: Value) {
        *self.state.borrow_mut() = ThunkState::Forced(value);
    }
}

impl PartialEq for Thunk {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

/// A heap-allocated record: a constructor identity plus its field values
/// (spec §3 "Atom — `{ constructor: CtorId, fields: Value[] }`").
#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    pub ctor: Rc<TypeCtor>,
    pub fields: Rc<[Value]>,
}

impl Atom {
    #[must_use]
    pub fn field(&self, name: InternedStr) -> Option<&Value> {
        self.ctor
            .field_names
            .iter()
            .position(|&n| n == name)
            .and_then(|i| self.fields.get(i))
    }
}

/// A callable value: a call-target plus an optional captured closure scope
/// and its argument-evaluation schema (spec §3 "Function — `{ target:
/// CallTarget, scope?: LocalScope, schema: ArgSchema }`").
#[derive(Debug, Clone)]
pub struct FunctionValue {
    pub target: Rc<crate::ast::node::CallTarget>,
    pub captured_scope: Option<crate::ast::template::LocalScope>,
    pub schema: Rc<crate::call::ArgSchema>,
}

impl PartialEq for FunctionValue {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.target, &other.target) && self.captured_scope == other.captured_scope
    }
}

/// An unresolved reference to a name, produced when a symbol cannot be
/// looked up at the point it's read (spec §3 "UnresolvedSymbol — a deferred
/// lookup, re-resolved each time a method-dispatch node's receiver type
/// changes").
#[derive(Debug, Clone, PartialEq)]
pub struct UnresolvedSymbol {
    pub name: InternedStr,
    pub in_module: InternedStr,
}

/// The runtime's closed set of value kinds, spec §3 "Data model".
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Long(i64),
    Double(f64),
    Boolean(bool),
    Text(Rc<str>),
    Unit,
    Atom(Atom),
    Function(FunctionValue),
    UnresolvedSymbol(UnresolvedSymbol),
    Thunk(Rc<Thunk>),
    DataflowError(DataflowError),
    Array(Rc<[Value]>),
    /// A panic, reified as a cacheable value (spec §4.3 "cache entries for
    /// panics behave exactly like cached values"). Never produced by a
    /// builtin directly — only `eval::eval_node` wraps an unwinding
    /// `Signal::Panic` into this shape when it stores the node's outcome in
    /// `ExprCache`, and unwraps it back into `Err(Signal::Panic(..))` on the
    /// next cache hit.
    Panic(PanicPayload),
}

impl Value {
    #[must_use]
    pub fn type_id(&self) -> crate::types::ctor::TypeId {
        use crate::types::ctor::TypeId;
        match self {
            Self::Long(_) => TypeId::INTEGER,
            Self::Double(_) => TypeId::DECIMAL,
            Self::Boolean(_) => TypeId::BOOLEAN,
            Self::Text(_) => TypeId::TEXT,
            Self::Unit => TypeId::UNIT,
            Self::Atom(a) => a.ctor.type_id,
            Self::Function(_) => TypeId::FUNCTION,
            Self::Array(_) => TypeId::ARRAY,
            Self::DataflowError(_) => TypeId::ERROR,
            // An unresolved symbol or unforced thunk has no stable receiver
            // type until resolved/forced; callers are expected to resolve it
            // before dispatching on it (see `dispatch::resolve_receiver`).
            Self::UnresolvedSymbol(_) => TypeId::UNIT,
            Self::Thunk(_) => TypeId::UNIT,
            Self::Panic(_) => TypeId::PANIC,
        }
    }

    #[must_use]
    pub fn is_dataflow_error(&self) -> bool {
        matches!(self, Self::DataflowError(_))
    }

    #[must_use]
    pub fn unit() -> Self {
        Self::Unit
    }

    #[must_use]
    pub fn text(s: impl Into<Rc<str>>) -> Self {
        Self::Text(s.into())
    }

    /// Human-readable type name for diagnostics, mirroring spec §4.1's
    /// primitive sentinel names (`Integer`, `Decimal`, `Boolean`, `Text`).
    #[must_use]
    pub fn type_name(&self) -> String {
        match self {
            Self::Long(_) => "Integer".to_owned(),
            Self::Double(_) => "Decimal".to_owned(),
            Self::Boolean(_) => "Boolean".to_owned(),
            Self::Text(_) => "Text".to_owned(),
            Self::Unit => "Unit".to_owned(),
            Self::Atom(a) => a.ctor.name.to_string(),
            Self::Function(_) => "Function".to_owned(),
            Self::Array(_) => "Array".to_owned(),
            Self::DataflowError(_) => "DataflowError".to_owned(),
            Self::UnresolvedSymbol(s) => format!("UnresolvedSymbol({})", s.name),
            Self::Thunk(_) => "Thunk".to_owned(),
            Self::Panic(_) => "Panic".to_owned(),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_name_matches_primitive_sentinels() {
        assert_eq!(Value::Long(1).type_name(), "Integer");
        assert_eq!(Value::Double(1.0).type_name(), "Decimal");
        assert_eq!(Value::Boolean(true).type_name(), "Boolean");
        assert_eq!(Value::text("hi").type_name(), "Text");
    }

    #[test]
    fn dataflow_error_propagation_preserves_origin_id() {
        let err = DataflowError::new(Value::text("boom"), "division", None);
        let propagated = err.propagate_through("map", None);
        assert_eq!(err.origin_id, propagated.origin_id);
        assert_eq!(propagated.trace.len(), 2);
    }
}
