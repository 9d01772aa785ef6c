//! String and conversion builtins

use super::arity;
use crate::executor::errors::{TYPE_ERROR, VALUE_ERROR};
use crate::executor::expressions::{throw, EvalResult};
use crate::executor::types::Val;

pub fn str(args: &[Val]) -> EvalResult {
    arity!("str", args, 1, 1);
    EvalResult::Value {
        v: Val::Str(args[0].to_string()),
    }
}

pub fn repr(args: &[Val]) -> EvalResult {
    arity!("repr", args, 1, 1);
    EvalResult::Value {
        v: Val::Str(args[0].repr()),
    }
}

pub fn type_of(args: &[Val]) -> EvalResult {
    arity!("type", args, 1, 1);
    EvalResult::Value {
        v: Val::Str(args[0].type_name().to_string()),
    }
}

pub fn int(args: &[Val]) -> EvalResult {
    arity!("int", args, 1, 1);
    match &args[0] {
        Val::Num(n) if n.is_finite() => EvalResult::Value {
            v: Val::Num(n.trunc()),
        },
        Val::Bool(b) => EvalResult::Value {
            v: Val::Num(if *b { 1.0 } else { 0.0 }),
        },
        Val::Str(s) => match s.trim().parse::<i64>() {
            Ok(n) => EvalResult::Value { v: Val::Num(n as f64) },
            Err(_) => throw(
                VALUE_ERROR,
                format!("invalid literal for int(): {}", args[0].repr()),
            ),
        },
        other => throw(
            TYPE_ERROR,
            format!("int() can't convert '{}'", other.type_name()),
        ),
    }
}

pub fn float(args: &[Val]) -> EvalResult {
    arity!("float", args, 1, 1);
    match &args[0] {
        Val::Num(n) => EvalResult::Value { v: Val::Num(*n) },
        Val::Bool(b) => EvalResult::Value {
            v: Val::Num(if *b { 1.0 } else { 0.0 }),
        },
        Val::Str(s) => match s.trim().parse::<f64>() {
            Ok(n) => EvalResult::Value { v: Val::Num(n) },
            Err(_) => throw(
                VALUE_ERROR,
                format!("could not convert string to float: {}", args[0].repr()),
            ),
        },
        other => throw(
            TYPE_ERROR,
            format!("float() can't convert '{}'", other.type_name()),
        ),
    }
}

/// join(list, sep = "") joins the `str()` of each item
pub fn join(args: &[Val]) -> EvalResult {
    arity!("join", args, 1, 2);
    let Val::List(items) = &args[0] else {
        return throw(
            TYPE_ERROR,
            format!("join() expects a list, got '{}'", args[0].type_name()),
        );
    };
    let sep = match args.get(1) {
        None => "",
        Some(Val::Str(s)) => s.as_str(),
        Some(other) => {
            return throw(
                TYPE_ERROR,
                format!("join() separator must be str, not '{}'", other.type_name()),
            )
        }
    };
    let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
    EvalResult::Value {
        v: Val::Str(parts.join(sep)),
    }
}

/// split(s) splits on whitespace; split(s, sep) splits on `sep`
pub fn split(args: &[Val]) -> EvalResult {
    arity!("split", args, 1, 2);
    let Val::Str(s) = &args[0] else {
        return throw(
            TYPE_ERROR,
            format!("split() expects a str, got '{}'", args[0].type_name()),
        );
    };
    let parts: Vec<Val> = match args.get(1) {
        None => s.split_whitespace().map(|p| Val::Str(p.to_string())).collect(),
        Some(Val::Str(sep)) if sep.is_empty() => {
            return throw(VALUE_ERROR, "empty separator");
        }
        Some(Val::Str(sep)) => s.split(sep.as_str()).map(|p| Val::Str(p.to_string())).collect(),
        Some(other) => {
            return throw(
                TYPE_ERROR,
                format!("split() separator must be str, not '{}'", other.type_name()),
            )
        }
    };
    EvalResult::Value { v: Val::List(parts) }
}

pub fn upper(args: &[Val]) -> EvalResult {
    arity!("upper", args, 1, 1);
    match &args[0] {
        Val::Str(s) => EvalResult::Value {
            v: Val::Str(s.to_uppercase()),
        },
        other => throw(
            TYPE_ERROR,
            format!("upper() expects a str, got '{}'", other.type_name()),
        ),
    }
}

pub fn lower(args: &[Val]) -> EvalResult {
    arity!("lower", args, 1, 1);
    match &args[0] {
        Val::Str(s) => EvalResult::Value {
            v: Val::Str(s.to_lowercase()),
        },
        other => throw(
            TYPE_ERROR,
            format!("lower() expects a str, got '{}'", other.type_name()),
        ),
    }
}

/// json(value) renders a value as compact JSON
pub fn json(args: &[Val]) -> EvalResult {
    arity!("json", args, 1, 1);
    match serde_json::to_string(&args[0].to_json()) {
        Ok(s) => EvalResult::Value { v: Val::Str(s) },
        Err(e) => throw(VALUE_ERROR, e.to_string()),
    }
}
