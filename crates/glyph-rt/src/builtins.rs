//! Primitive operations, SPEC_FULL §B.2 "builtin function seam".
//!
//! Every builtin is an ordinary `Value::Function` backed by
//! `CallTarget::Builtin`, so the evaluator never special-cases them: a
//! `function-call` node invoking `+` looks exactly like one invoking a
//! user-defined function. Grounded in the teacher's `builtins` module
//! (`crates/ouros/src/builtins/`), which registers native Rust closures
//! under interned names the same way.

use std::collections::HashMap;
use std::rc::Rc;

use crate::{
    ast::node::{BuiltinFn, CallTarget},
    call::ArgSchema,
    errors::{EvalResult, Signal},
    eval::raise_dataflow_error,
    intern::intern,
    values::{FunctionValue, Value},
};

fn make(name: &str, arity: usize, func: impl Fn(&[Value]) -> EvalResult + 'static) -> Value {
    let builtin = Rc::new(BuiltinFn {
        name: intern(name),
        arity,
        func: Box::new(func),
    });
    Value::Function(FunctionValue {
        target: CallTarget::builtin(builtin),
        captured_scope: None,
        schema: ArgSchema::new(vec![crate::ast::template::ArgStrategy::Eager; arity]),
    })
}

fn type_error(expected: &str, got: &Value, context: &str) -> Signal {
    Signal::panic(
        Value::Unit,
        format!("type error in {context}: expected {expected}, got {}", got.type_name()),
    )
}

/// `a + b`, spec §4.1's worked example of a primitive dispatched by type.
fn add(args: &[Value]) -> EvalResult {
    match (&args[0], &args[1]) {
        (Value::Long(a), Value::Long(b)) => Ok(Value::Long(a.wrapping_add(*b))),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(a + b)),
        (Value::Long(a), Value::Double(b)) | (Value::Double(b), Value::Long(a)) => {
            Ok(Value::Double(*a as f64 + b))
        }
        (Value::Text(a), Value::Text(b)) => Ok(Value::text(format!("{a}{b}"))),
        (a, _) if matches!(a, Value::DataflowError(_)) => Ok(a.clone()),
        (_, b) if matches!(b, Value::DataflowError(_)) => Ok(b.clone()),
        (a, _) => Err(type_error("Integer, Decimal, or Text", a, "+")),
    }
}

fn sub(args: &[Value]) -> EvalResult {
    match (&args[0], &args[1]) {
        (Value::Long(a), Value::Long(b)) => Ok(Value::Long(a.wrapping_sub(*b))),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(a - b)),
        (Value::Long(a), Value::Double(b)) => Ok(Value::Double(*a as f64 - b)),
        (Value::Double(a), Value::Long(b)) => Ok(Value::Double(a - *b as f64)),
        (a, _) if a.is_dataflow_error() => Ok(a.clone()),
        (_, b) if b.is_dataflow_error() => Ok(b.clone()),
        (a, _) => Err(type_error("Integer or Decimal", a, "-")),
    }
}

fn mul(args: &[Value]) -> EvalResult {
    match (&args[0], &args[1]) {
        (Value::Long(a), Value::Long(b)) => Ok(Value::Long(a.wrapping_mul(*b))),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(a * b)),
        (Value::Long(a), Value::Double(b)) | (Value::Double(b), Value::Long(a)) => {
            Ok(Value::Double(*a as f64 * b))
        }
        (a, _) if a.is_dataflow_error() => Ok(a.clone()),
        (_, b) if b.is_dataflow_error() => Ok(b.clone()),
        (a, _) => Err(type_error("Integer or Decimal", a, "*")),
    }
}

/// `a / b`, spec §4.5's canonical dataflow-error producer: division by zero
/// never panics, it returns a `DataflowError` value (spec §8 "dataflow
/// error identity propagation").
fn div(args: &[Value]) -> EvalResult {
    match (&args[0], &args[1]) {
        (Value::Long(_), Value::Long(0)) => Ok(raise_dataflow_error(Value::text("Divide by zero"), "/", None)),
        (Value::Long(a), Value::Long(b)) => Ok(Value::Long(a.wrapping_div(*b))),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(a / b)),
        (Value::Long(a), Value::Double(b)) => Ok(Value::Double(*a as f64 / b)),
        (Value::Double(a), Value::Long(b)) => Ok(Value::Double(a / *b as f64)),
        (a, _) if a.is_dataflow_error() => Ok(a.clone()),
        (_, b) if b.is_dataflow_error() => Ok(b.clone()),
        (a, _) => Err(type_error("Integer or Decimal", a, "/")),
    }
}

/// `a divStrict b`, a second division primitive that panics rather than
/// returning a `DataflowError` on a zero divisor (spec §8 scenario 5's
/// worked "divide-by-zero panic" example). `/` above stays the
/// dataflow-error-producing primitive spec §4.5 names as its canonical
/// example; this is a distinct builtin, not a behavior change to `/` — see
/// `DESIGN.md` for why both exist side by side.
fn div_strict(args: &[Value]) -> EvalResult {
    match (&args[0], &args[1]) {
        (Value::Long(_), Value::Long(0)) => Err(Signal::panic(Value::text("Divide by zero"), "divide by zero")),
        (Value::Long(a), Value::Long(b)) => Ok(Value::Long(a.wrapping_div(*b))),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(a / b)),
        (Value::Long(a), Value::Double(b)) => Ok(Value::Double(*a as f64 / b)),
        (Value::Double(a), Value::Long(b)) => Ok(Value::Double(a / *b as f64)),
        (a, _) if a.is_dataflow_error() => Ok(a.clone()),
        (_, b) if b.is_dataflow_error() => Ok(b.clone()),
        (a, _) => Err(type_error("Integer or Decimal", a, "divStrict")),
    }
}

fn less_than(args: &[Value]) -> EvalResult {
    match (&args[0], &args[1]) {
        (Value::Long(a), Value::Long(b)) => Ok(Value::Boolean(a < b)),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Boolean(a < b)),
        (Value::Long(a), Value::Double(b)) => Ok(Value::Boolean((*a as f64) < *b)),
        (Value::Double(a), Value::Long(b)) => Ok(Value::Boolean(*a < *b as f64)),
        (a, _) if a.is_dataflow_error() => Ok(a.clone()),
        (_, b) if b.is_dataflow_error() => Ok(b.clone()),
        (a, _) => Err(type_error("Integer or Decimal", a, "<")),
    }
}

fn equals(args: &[Value]) -> EvalResult {
    Ok(Value::Boolean(args[0] == args[1]))
}

/// `array.at(index)`, spec §3's `Array` value, bounds-checked against a
/// `DataflowError` rather than a panic (an out-of-range index is ordinary
/// user-program data, not an engine invariant violation).
fn array_at(args: &[Value]) -> EvalResult {
    let Value::Array(items) = &args[0] else {
        return Err(type_error("Array", &args[0], "Array.at"));
    };
    let Value::Long(index) = &args[1] else {
        return Err(type_error("Integer", &args[1], "Array.at"));
    };
    let Ok(idx) = usize::try_from(*index) else {
        return Ok(raise_dataflow_error(
            Value::text(format!("Index out of bounds: {index}")),
            "Array.at",
            None,
        ));
    };
    items.get(idx).cloned().map_or_else(
        || {
            Ok(raise_dataflow_error(
                Value::text(format!("Index out of bounds: {index}")),
                "Array.at",
                None,
            ))
        },
        Ok,
    )
}

fn array_length(args: &[Value]) -> EvalResult {
    let Value::Array(items) = &args[0] else {
        return Err(type_error("Array", &args[0], "Array.length"));
    };
    Ok(Value::Long(items.len() as i64))
}

/// `error.catch(handler)`-adjacent primitive: unwraps a `DataflowError`'s
/// payload, or passes a non-error value through unchanged.
fn catch(args: &[Value]) -> EvalResult {
    match &args[0] {
        Value::DataflowError(err) => Ok((*err.payload).clone()),
        other => Ok(other.clone()),
    }
}

fn is_error(args: &[Value]) -> EvalResult {
    Ok(Value::Boolean(args[0].is_dataflow_error()))
}

/// Builds the process-wide table of builtin callables, keyed by the name
/// an `ArithmeticParser`-produced `function-call` node looks them up under.
#[must_use]
pub fn standard_builtins() -> HashMap<String, Value> {
    let mut table = HashMap::new();
    table.insert("+".to_owned(), make("+", 2, add));
    table.insert("-".to_owned(), make("-", 2, sub));
    table.insert("*".to_owned(), make("*", 2, mul));
    table.insert("/".to_owned(), make("/", 2, div));
    table.insert("divStrict".to_owned(), make("divStrict", 2, div_strict));
    table.insert("<".to_owned(), make("<", 2, less_than));
    table.insert("==".to_owned(), make("==", 2, equals));
    table.insert("Array.at".to_owned(), make("Array.at", 2, array_at));
    table.insert("Array.length".to_owned(), make("Array.length", 1, array_length));
    table.insert("catch".to_owned(), make("catch", 1, catch));
    table.insert("is_error".to_owned(), make("is_error", 1, is_error));
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{context::ExecutionContext, instrumentation::NoopCallbacks};

    fn call(name: &str, args: Vec<Value>) -> EvalResult {
        let table = standard_builtins();
        let Value::Function(f) = table.get(name).unwrap().clone() else {
            unreachable!()
        };
        let ectx = ExecutionContext::new(intern("Test"), 3);
        crate::eval::call_value(&ectx, &f, args, &NoopCallbacks)
    }

    #[test]
    fn add_integers() {
        assert_eq!(call("+", vec![Value::Long(2), Value::Long(3)]).unwrap(), Value::Long(5));
    }

    #[test]
    fn divide_by_zero_is_a_dataflow_error_not_a_panic() {
        let result = call("/", vec![Value::Long(1), Value::Long(0)]).unwrap();
        assert!(result.is_dataflow_error());
    }

    #[test]
    fn div_strict_by_zero_panics_instead_of_raising_a_dataflow_error() {
        let err = call("divStrict", vec![Value::Long(1), Value::Long(0)]).unwrap_err();
        assert!(matches!(err, Signal::Panic(_)));
    }

    #[test]
    fn array_at_out_of_bounds_is_a_dataflow_error() {
        let arr = Value::Array(Rc::from(vec![Value::Long(1), Value::Long(2)].into_boxed_slice()));
        let result = call("Array.at", vec![arr, Value::Long(5)]).unwrap();
        assert!(result.is_dataflow_error());
    }

    #[test]
    fn catch_unwraps_dataflow_error_payload() {
        let err = raise_dataflow_error(Value::text("boom"), "test", None);
        let result = call("catch", vec![err]).unwrap();
        assert_eq!(result, Value::text("boom"));
    }
}
