//! Expression evaluation

use super::errors::{
    self, ErrorInfo, ATTRIBUTE_ERROR, INDEX_ERROR, KEY_ERROR, NAME_ERROR, TYPE_ERROR,
    ZERO_DIVISION_ERROR,
};
use super::stdlib::call_stdlib_func;
use super::types::{Awaitable, BinaryOp, Expr, UnaryOp, Val};
use super::vm::Env;
use std::collections::BTreeMap;

/* ===================== Evaluation Result ===================== */

/// Result of evaluating an expression
#[derive(Debug, Clone, PartialEq)]
pub enum EvalResult {
    /// Expression evaluated to a value
    Value { v: Val },
    /// Expression hit an `await` on a pending awaitable
    Suspend { awaitable: Awaitable },
    /// Expression raised an error
    Throw { error: Val },
}

/// Shorthand for an `EvalResult::Throw` carrying an error value
pub fn throw(code: &str, message: impl Into<String>) -> EvalResult {
    EvalResult::Throw {
        error: Val::Error(ErrorInfo::new(code, message)),
    }
}

/// Evaluate a sub-expression, returning early from the caller unless it produced a value
macro_rules! eval_or_return {
    ($expr:expr, $env:expr, $resume:expr) => {
        match eval_expr($expr, $env, $resume) {
            EvalResult::Value { v } => v,
            other => return other,
        }
    };
}

/* ===================== Evaluation ===================== */

/// Evaluate an expression to a value
///
/// `resume_value` holds the result of a completed await. It is consumed by the
/// first `await` reached, which is always the outermost expression of the
/// statement being resumed.
pub fn eval_expr(expr: &Expr, env: &Env, resume_value: &mut Option<Val>) -> EvalResult {
    match expr {
        Expr::LitBool { v, .. } => EvalResult::Value { v: Val::Bool(*v) },

        Expr::LitNum { v, .. } => EvalResult::Value { v: Val::Num(*v) },

        Expr::LitStr { v, .. } => EvalResult::Value {
            v: Val::Str(v.clone()),
        },

        Expr::LitNull { .. } => EvalResult::Value { v: Val::Null },

        Expr::LitList { elements, .. } => {
            let mut items = Vec::with_capacity(elements.len());
            for element in elements {
                items.push(eval_or_return!(element, env, resume_value));
            }
            EvalResult::Value { v: Val::List(items) }
        }

        Expr::LitObj { properties, .. } => {
            let mut map = BTreeMap::new();
            for (key, _, value) in properties {
                let v = eval_or_return!(value, env, resume_value);
                map.insert(key.clone(), v);
            }
            EvalResult::Value { v: Val::Obj(map) }
        }

        Expr::Ident { name, .. } => match env.lookup(name) {
            Some(v) => EvalResult::Value { v: v.clone() },
            None => throw(NAME_ERROR, format!("name '{}' is not defined", name)),
        },

        Expr::Member {
            object, property, ..
        } => {
            let obj = eval_or_return!(object, env, resume_value);
            get_member(&obj, property)
        }

        Expr::Index { object, index, .. } => {
            let obj = eval_or_return!(object, env, resume_value);
            let idx = eval_or_return!(index, env, resume_value);
            get_index(&obj, &idx)
        }

        Expr::Call { callee, args, .. } => {
            let func = eval_or_return!(callee, env, resume_value);
            let mut arg_vals = Vec::with_capacity(args.len());
            for arg in args {
                arg_vals.push(eval_or_return!(arg, env, resume_value));
            }
            match func {
                Val::NativeFunc(f) => call_stdlib_func(&f, &arg_vals),
                other => throw(
                    TYPE_ERROR,
                    format!("'{}' object is not callable", other.type_name()),
                ),
            }
        }

        Expr::Await { inner, .. } => {
            if let Some(v) = resume_value.take() {
                return EvalResult::Value { v };
            }
            match eval_or_return!(inner, env, resume_value) {
                Val::Promise(awaitable) => EvalResult::Suspend { awaitable },
                other => throw(
                    TYPE_ERROR,
                    format!(
                        "object of type '{}' can't be used in 'await' expression",
                        other.type_name()
                    ),
                ),
            }
        }

        Expr::Unary { op, operand, .. } => {
            let v = eval_or_return!(operand, env, resume_value);
            match op {
                UnaryOp::Not => EvalResult::Value {
                    v: Val::Bool(!v.is_truthy()),
                },
                UnaryOp::Neg => match v {
                    Val::Num(n) => EvalResult::Value { v: Val::Num(-n) },
                    other => throw(
                        TYPE_ERROR,
                        format!("bad operand type for unary -: '{}'", other.type_name()),
                    ),
                },
            }
        }

        Expr::BinaryOp {
            op, left, right, ..
        } => {
            let left_val = eval_or_return!(left, env, resume_value);
            match op {
                BinaryOp::And => {
                    if !left_val.is_truthy() {
                        return EvalResult::Value { v: left_val };
                    }
                    eval_expr(right, env, resume_value)
                }
                BinaryOp::Or => {
                    if left_val.is_truthy() {
                        return EvalResult::Value { v: left_val };
                    }
                    eval_expr(right, env, resume_value)
                }
                _ => {
                    let right_val = eval_or_return!(right, env, resume_value);
                    binary_op(*op, left_val, right_val)
                }
            }
        }

        Expr::Ternary {
            condition,
            consequent,
            alternate,
            ..
        } => {
            let test = eval_or_return!(condition, env, resume_value);
            if test.is_truthy() {
                eval_expr(consequent, env, resume_value)
            } else {
                eval_expr(alternate, env, resume_value)
            }
        }
    }
}

/* ===================== Member and Index Access ===================== */

pub fn get_member(obj: &Val, property: &str) -> EvalResult {
    match obj {
        Val::Obj(map) => match map.get(property) {
            Some(v) => EvalResult::Value { v: v.clone() },
            None => throw(
                ATTRIBUTE_ERROR,
                format!("object has no attribute '{}'", property),
            ),
        },
        Val::Error(info) => match property {
            "code" => EvalResult::Value {
                v: Val::Str(info.code.clone()),
            },
            "message" => EvalResult::Value {
                v: Val::Str(info.message.clone()),
            },
            _ => throw(
                ATTRIBUTE_ERROR,
                format!("'error' object has no attribute '{}'", property),
            ),
        },
        other => throw(
            ATTRIBUTE_ERROR,
            format!(
                "'{}' object has no attribute '{}'",
                other.type_name(),
                property
            ),
        ),
    }
}

pub fn get_index(obj: &Val, index: &Val) -> EvalResult {
    match (obj, index) {
        (Val::List(items), Val::Num(n)) => match resolve_index(*n, items.len()) {
            Some(i) => EvalResult::Value {
                v: items[i].clone(),
            },
            None => throw(INDEX_ERROR, "list index out of range"),
        },
        (Val::Str(s), Val::Num(n)) => {
            let len = s.chars().count();
            match resolve_index(*n, len).and_then(|i| s.chars().nth(i)) {
                Some(ch) => EvalResult::Value {
                    v: Val::Str(ch.to_string()),
                },
                None => throw(INDEX_ERROR, "string index out of range"),
            }
        }
        (Val::Obj(map), Val::Str(key)) => match map.get(key) {
            Some(v) => EvalResult::Value { v: v.clone() },
            None => throw(KEY_ERROR, index.repr()),
        },
        (Val::List(_), other) | (Val::Str(_), other) => throw(
            TYPE_ERROR,
            format!("indices must be integers, not '{}'", other.type_name()),
        ),
        (Val::Obj(_), other) => throw(
            TYPE_ERROR,
            format!("keys must be strings, not '{}'", other.type_name()),
        ),
        (other, _) => throw(
            TYPE_ERROR,
            format!("'{}' object is not subscriptable", other.type_name()),
        ),
    }
}

/// Resolve a possibly negative numeric index against a length
pub fn resolve_index(n: f64, len: usize) -> Option<usize> {
    if n.fract() != 0.0 {
        return None;
    }
    let i = if n < 0.0 { len as f64 + n } else { n };
    if i < 0.0 || i >= len as f64 {
        None
    } else {
        Some(i as usize)
    }
}

/* ===================== Operators ===================== */

/// Upper bound on sequences built by repetition and `range()`
pub const MAX_SEQUENCE_LEN: usize = 10_000_000;

fn binary_op(op: BinaryOp, left: Val, right: Val) -> EvalResult {
    let v = match (op, &left, &right) {
        (BinaryOp::Eq, _, _) => Val::Bool(left == right),
        (BinaryOp::Ne, _, _) => Val::Bool(left != right),

        (BinaryOp::Add, Val::Num(a), Val::Num(b)) => Val::Num(a + b),
        (BinaryOp::Add, Val::Str(a), Val::Str(b)) => Val::Str(format!("{}{}", a, b)),
        (BinaryOp::Add, Val::List(a), Val::List(b)) => {
            Val::List(a.iter().chain(b.iter()).cloned().collect())
        }

        (BinaryOp::Sub, Val::Num(a), Val::Num(b)) => Val::Num(a - b),

        (BinaryOp::Mul, Val::Num(a), Val::Num(b)) => Val::Num(a * b),
        (BinaryOp::Mul, Val::Str(s), Val::Num(n)) | (BinaryOp::Mul, Val::Num(n), Val::Str(s)) => {
            let count = repeat_count(*n);
            if s.is_empty() || count == 0 {
                return EvalResult::Value {
                    v: Val::Str(String::new()),
                };
            }
            if s.len().saturating_mul(count) > MAX_SEQUENCE_LEN {
                return throw(errors::VALUE_ERROR, "repeated string is too large");
            }
            Val::Str(s.repeat(count))
        }
        (BinaryOp::Mul, Val::List(items), Val::Num(n))
        | (BinaryOp::Mul, Val::Num(n), Val::List(items)) => {
            let count = repeat_count(*n);
            if items.is_empty() || count == 0 {
                return EvalResult::Value {
                    v: Val::List(Vec::new()),
                };
            }
            if items.len().saturating_mul(count) > MAX_SEQUENCE_LEN {
                return throw(errors::VALUE_ERROR, "repeated list is too large");
            }
            let mut out = Vec::with_capacity(items.len() * count);
            for _ in 0..count {
                out.extend(items.iter().cloned());
            }
            Val::List(out)
        }

        (BinaryOp::Div, Val::Num(_), Val::Num(b)) if *b == 0.0 => {
            return throw(ZERO_DIVISION_ERROR, "division by zero");
        }
        (BinaryOp::Div, Val::Num(a), Val::Num(b)) => Val::Num(a / b),

        (BinaryOp::Mod, Val::Num(_), Val::Num(b)) if *b == 0.0 => {
            return throw(ZERO_DIVISION_ERROR, "modulo by zero");
        }
        (BinaryOp::Mod, Val::Num(a), Val::Num(b)) => Val::Num(((a % b) + b) % b),

        (BinaryOp::Lt, Val::Num(a), Val::Num(b)) => Val::Bool(a < b),
        (BinaryOp::Lte, Val::Num(a), Val::Num(b)) => Val::Bool(a <= b),
        (BinaryOp::Gt, Val::Num(a), Val::Num(b)) => Val::Bool(a > b),
        (BinaryOp::Gte, Val::Num(a), Val::Num(b)) => Val::Bool(a >= b),
        (BinaryOp::Lt, Val::Str(a), Val::Str(b)) => Val::Bool(a < b),
        (BinaryOp::Lte, Val::Str(a), Val::Str(b)) => Val::Bool(a <= b),
        (BinaryOp::Gt, Val::Str(a), Val::Str(b)) => Val::Bool(a > b),
        (BinaryOp::Gte, Val::Str(a), Val::Str(b)) => Val::Bool(a >= b),

        _ => {
            return throw(
                errors::TYPE_ERROR,
                format!(
                    "unsupported operand type(s) for {}: '{}' and '{}'",
                    op.symbol(),
                    left.type_name(),
                    right.type_name()
                ),
            )
        }
    };
    EvalResult::Value { v }
}

fn repeat_count(n: f64) -> usize {
    if n.is_finite() && n > 0.0 {
        n.floor() as usize
    } else {
        0
    }
}
