//! Standard library function implementations
//!
//! This module contains all builtin function implementations organized by category.

pub mod collections;
pub mod math;
pub mod text;
pub mod time;

use super::errors::WRONG_ARG_COUNT;
use super::expressions::{throw, EvalResult};
use super::types::Val;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/* ===================== Standard Library Function Types ===================== */

/// Standard library function identifiers
///
/// Each variant represents a specific builtin. Builtins live in their own
/// layer beneath the snippet scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StdlibFunc {
    Range,
    Len,
    Keys,
    Values,
    Append,
    Sum,
    Min,
    Max,
    Str,
    Repr,
    Int,
    Float,
    Type,
    Join,
    Split,
    Upper,
    Lower,
    Json,
    Abs,
    Round,
    Sleep,
    Now,
}

impl StdlibFunc {
    pub const ALL: &'static [StdlibFunc] = &[
        StdlibFunc::Range,
        StdlibFunc::Len,
        StdlibFunc::Keys,
        StdlibFunc::Values,
        StdlibFunc::Append,
        StdlibFunc::Sum,
        StdlibFunc::Min,
        StdlibFunc::Max,
        StdlibFunc::Str,
        StdlibFunc::Repr,
        StdlibFunc::Int,
        StdlibFunc::Float,
        StdlibFunc::Type,
        StdlibFunc::Join,
        StdlibFunc::Split,
        StdlibFunc::Upper,
        StdlibFunc::Lower,
        StdlibFunc::Json,
        StdlibFunc::Abs,
        StdlibFunc::Round,
        StdlibFunc::Sleep,
        StdlibFunc::Now,
    ];

    /// Name the builtin is bound to
    pub fn name(&self) -> &'static str {
        match self {
            StdlibFunc::Range => "range",
            StdlibFunc::Len => "len",
            StdlibFunc::Keys => "keys",
            StdlibFunc::Values => "values",
            StdlibFunc::Append => "append",
            StdlibFunc::Sum => "sum",
            StdlibFunc::Min => "min",
            StdlibFunc::Max => "max",
            StdlibFunc::Str => "str",
            StdlibFunc::Repr => "repr",
            StdlibFunc::Int => "int",
            StdlibFunc::Float => "float",
            StdlibFunc::Type => "type",
            StdlibFunc::Join => "join",
            StdlibFunc::Split => "split",
            StdlibFunc::Upper => "upper",
            StdlibFunc::Lower => "lower",
            StdlibFunc::Json => "json",
            StdlibFunc::Abs => "abs",
            StdlibFunc::Round => "round",
            StdlibFunc::Sleep => "sleep",
            StdlibFunc::Now => "now",
        }
    }
}

/* ===================== Stdlib Dispatcher ===================== */

/// Call a standard library function with arguments
pub fn call_stdlib_func(func: &StdlibFunc, args: &[Val]) -> EvalResult {
    match func {
        StdlibFunc::Range => collections::range(args),
        StdlibFunc::Len => collections::len(args),
        StdlibFunc::Keys => collections::keys(args),
        StdlibFunc::Values => collections::values(args),
        StdlibFunc::Append => collections::append(args),
        StdlibFunc::Sum => collections::sum(args),
        StdlibFunc::Min => collections::min(args),
        StdlibFunc::Max => collections::max(args),
        StdlibFunc::Str => text::str(args),
        StdlibFunc::Repr => text::repr(args),
        StdlibFunc::Int => text::int(args),
        StdlibFunc::Float => text::float(args),
        StdlibFunc::Type => text::type_of(args),
        StdlibFunc::Join => text::join(args),
        StdlibFunc::Split => text::split(args),
        StdlibFunc::Upper => text::upper(args),
        StdlibFunc::Lower => text::lower(args),
        StdlibFunc::Json => text::json(args),
        StdlibFunc::Abs => math::abs(args),
        StdlibFunc::Round => math::round(args),
        StdlibFunc::Sleep => time::sleep(args),
        StdlibFunc::Now => time::now(args),
    }
}

/* ===================== Builtin Layer ===================== */

/// Build the builtin name layer consulted after the scope
pub fn builtins() -> HashMap<String, Val> {
    StdlibFunc::ALL
        .iter()
        .map(|f| (f.name().to_string(), Val::NativeFunc(*f)))
        .collect()
}

/// True if `name` resolves to a builtin
pub fn is_builtin(name: &str) -> bool {
    StdlibFunc::ALL.iter().any(|f| f.name() == name)
}

/* ===================== Argument Helpers ===================== */

/// Check the argument count is within `min..=max`
pub(crate) fn check_arity(name: &str, args: &[Val], min: usize, max: usize) -> Option<EvalResult> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("{}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Some(throw(
            WRONG_ARG_COUNT,
            format!(
                "{}() takes {} argument(s) but {} were given",
                name,
                expected,
                args.len()
            ),
        ));
    }
    None
}

/// Return early with the arity error, if any
macro_rules! arity {
    ($name:expr, $args:expr, $min:expr, $max:expr) => {
        if let Some(err) = $crate::executor::stdlib::check_arity($name, $args, $min, $max) {
            return err;
        }
    };
}
pub(crate) use arity;
