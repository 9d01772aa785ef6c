//! List and object builtins

use super::arity;
use crate::executor::errors::{TYPE_ERROR, VALUE_ERROR};
use crate::executor::expressions::{throw, EvalResult, MAX_SEQUENCE_LEN};
use crate::executor::types::Val;
use std::cmp::Ordering;

/// Largest magnitude below which every integer is an exact f64
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

/// range(stop) / range(start, stop) / range(start, stop, step)
pub fn range(args: &[Val]) -> EvalResult {
    arity!("range", args, 1, 3);

    let mut nums = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            Val::Num(n) if n.fract() == 0.0 => {
                if n.abs() > MAX_EXACT_INT {
                    return throw(
                        VALUE_ERROR,
                        format!("range() argument {} is out of range", arg.repr()),
                    );
                }
                nums.push(*n as i64)
            }
            other => {
                return throw(
                    TYPE_ERROR,
                    format!("range() expects integers, got '{}'", other.type_name()),
                )
            }
        }
    }

    let (start, stop, step) = match nums.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return throw(TYPE_ERROR, "range() expects 1 to 3 arguments"),
    };
    if step == 0 {
        return throw(VALUE_ERROR, "range() step must not be zero");
    }

    // Bounds are at most 2^53 in magnitude, so the span fits in an i64
    let span = if step > 0 { stop - start } else { start - stop };
    let count = if span <= 0 {
        0
    } else {
        ((span as u64 - 1) / step.unsigned_abs() + 1) as usize
    };
    if count > MAX_SEQUENCE_LEN {
        return throw(VALUE_ERROR, "range() is too large");
    }

    let items = (0..count as i64)
        .map(|i| Val::Num((start + i * step) as f64))
        .collect();
    EvalResult::Value {
        v: Val::List(items),
    }
}

pub fn len(args: &[Val]) -> EvalResult {
    arity!("len", args, 1, 1);
    let n = match &args[0] {
        Val::Str(s) => s.chars().count(),
        Val::List(items) => items.len(),
        Val::Obj(map) => map.len(),
        other => {
            return throw(
                TYPE_ERROR,
                format!("object of type '{}' has no len()", other.type_name()),
            )
        }
    };
    EvalResult::Value { v: Val::Num(n as f64) }
}

pub fn keys(args: &[Val]) -> EvalResult {
    arity!("keys", args, 1, 1);
    match &args[0] {
        Val::Obj(map) => EvalResult::Value {
            v: Val::List(map.keys().cloned().map(Val::Str).collect()),
        },
        other => throw(
            TYPE_ERROR,
            format!("keys() expects an obj, got '{}'", other.type_name()),
        ),
    }
}

pub fn values(args: &[Val]) -> EvalResult {
    arity!("values", args, 1, 1);
    match &args[0] {
        Val::Obj(map) => EvalResult::Value {
            v: Val::List(map.values().cloned().collect()),
        },
        other => throw(
            TYPE_ERROR,
            format!("values() expects an obj, got '{}'", other.type_name()),
        ),
    }
}

/// append(list, value) returns a new list with `value` at the end
pub fn append(args: &[Val]) -> EvalResult {
    arity!("append", args, 2, 2);
    match &args[0] {
        Val::List(items) => {
            let mut out = items.clone();
            out.push(args[1].clone());
            EvalResult::Value { v: Val::List(out) }
        }
        other => throw(
            TYPE_ERROR,
            format!("append() expects a list, got '{}'", other.type_name()),
        ),
    }
}

pub fn sum(args: &[Val]) -> EvalResult {
    arity!("sum", args, 1, 1);
    let Val::List(items) = &args[0] else {
        return throw(
            TYPE_ERROR,
            format!("sum() expects a list, got '{}'", args[0].type_name()),
        );
    };
    let mut total = 0.0;
    for item in items {
        match item {
            Val::Num(n) => total += n,
            other => {
                return throw(
                    TYPE_ERROR,
                    format!("sum() can't add '{}' values", other.type_name()),
                )
            }
        }
    }
    EvalResult::Value { v: Val::Num(total) }
}

pub fn min(args: &[Val]) -> EvalResult {
    extreme("min", args, Ordering::Less)
}

pub fn max(args: &[Val]) -> EvalResult {
    extreme("max", args, Ordering::Greater)
}

/// Shared body of min()/max(): accepts one list or several arguments
fn extreme(name: &str, args: &[Val], wanted: Ordering) -> EvalResult {
    let items: &[Val] = match args {
        [] => return throw(TYPE_ERROR, format!("{}() expects at least 1 argument", name)),
        [Val::List(items)] => items,
        [other] => {
            return throw(
                TYPE_ERROR,
                format!("'{}' object is not iterable", other.type_name()),
            )
        }
        many => many,
    };

    let mut best: Option<&Val> = None;
    for item in items {
        let Some(current) = best else {
            best = Some(item);
            continue;
        };
        let ordering = match (item, current) {
            (Val::Num(a), Val::Num(b)) => a.partial_cmp(b),
            (Val::Str(a), Val::Str(b)) => Some(a.cmp(b)),
            _ => None,
        };
        match ordering {
            Some(o) if o == wanted => best = Some(item),
            Some(_) => {}
            None => {
                return throw(
                    TYPE_ERROR,
                    format!(
                        "{}() can't compare '{}' and '{}'",
                        name,
                        item.type_name(),
                        current.type_name()
                    ),
                )
            }
        }
    }

    match best {
        Some(v) => EvalResult::Value { v: v.clone() },
        None => throw(VALUE_ERROR, format!("{}() arg is an empty sequence", name)),
    }
}
