//! Runtime error values and the traceback reported for uncaught errors

use serde::{Deserialize, Serialize};
use std::fmt;

/* ===================== Error Codes ===================== */

pub const NAME_ERROR: &str = "NameError";
pub const TYPE_ERROR: &str = "TypeError";
pub const VALUE_ERROR: &str = "ValueError";
pub const ZERO_DIVISION_ERROR: &str = "ZeroDivisionError";
pub const INDEX_ERROR: &str = "IndexError";
pub const KEY_ERROR: &str = "KeyError";
pub const ATTRIBUTE_ERROR: &str = "AttributeError";
pub const WRONG_ARG_COUNT: &str = "ArgumentError";
/// Code given to values thrown with `throw` that are not error values
pub const USER_ERROR: &str = "Error";

/* ===================== ErrorInfo ===================== */

/// Error value carried by `Val::Error` and `Control::Throw`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/* ===================== RuntimeError ===================== */

/// One line of a traceback, innermost last
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    /// 1-based line number
    pub line: usize,
    /// The source text of that line, trimmed
    pub text: Option<String>,
}

/// An error that escaped the snippet
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub error: ErrorInfo,
    /// Line of the statement that raised the error
    pub line: Option<usize>,
    pub source_line: Option<String>,
    pub traceback: Vec<TraceEntry>,
}

impl RuntimeError {
    pub fn code(&self) -> &str {
        &self.error.code
    }

    pub fn message(&self) -> &str {
        &self.error.message
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.traceback.is_empty() {
            writeln!(f, "Traceback (most recent call last):")?;
            for entry in &self.traceback {
                writeln!(f, "  line {}, in <snippet>", entry.line)?;
                if let Some(text) = &entry.text {
                    writeln!(f, "    {}", text)?;
                }
            }
        }
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for RuntimeError {}
