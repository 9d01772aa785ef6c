//! Time builtins

use super::arity;
use crate::executor::errors::{TYPE_ERROR, VALUE_ERROR};
use crate::executor::expressions::{throw, EvalResult};
use crate::executor::types::{Awaitable, Val};
use chrono::Utc;

/// sleep(seconds) returns an awaitable; nothing waits until it is awaited
pub fn sleep(args: &[Val]) -> EvalResult {
    arity!("sleep", args, 1, 1);
    match &args[0] {
        Val::Num(secs) if secs.is_finite() && *secs >= 0.0 => EvalResult::Value {
            v: Val::Promise(Awaitable::Sleep {
                millis: (secs * 1000.0).round() as u64,
            }),
        },
        Val::Num(_) => throw(VALUE_ERROR, "sleep length must be a non-negative number"),
        other => throw(
            TYPE_ERROR,
            format!("sleep() expects a num, got '{}'", other.type_name()),
        ),
    }
}

/// now() is the current UNIX time in seconds
pub fn now(args: &[Val]) -> EvalResult {
    arity!("now", args, 0, 0);
    EvalResult::Value {
        v: Val::Num(Utc::now().timestamp_millis() as f64 / 1000.0),
    }
}
