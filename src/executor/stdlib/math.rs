//! Numeric builtins

use super::arity;
use crate::executor::errors::TYPE_ERROR;
use crate::executor::expressions::{throw, EvalResult};
use crate::executor::types::Val;

pub fn abs(args: &[Val]) -> EvalResult {
    arity!("abs", args, 1, 1);
    match &args[0] {
        Val::Num(n) => EvalResult::Value { v: Val::Num(n.abs()) },
        other => throw(
            TYPE_ERROR,
            format!("bad operand type for abs(): '{}'", other.type_name()),
        ),
    }
}

/// round(x) / round(x, ndigits)
pub fn round(args: &[Val]) -> EvalResult {
    arity!("round", args, 1, 2);
    let Val::Num(n) = &args[0] else {
        return throw(
            TYPE_ERROR,
            format!("round() expects a num, got '{}'", args[0].type_name()),
        );
    };
    let digits = match args.get(1) {
        None => 0,
        Some(Val::Num(d)) if d.fract() == 0.0 => *d as i32,
        Some(other) => {
            return throw(
                TYPE_ERROR,
                format!("round() ndigits must be an integer, not '{}'", other.type_name()),
            )
        }
    };
    let factor = 10f64.powi(digits);
    EvalResult::Value {
        v: Val::Num((n * factor).round() / factor),
    }
}
