//! Semantic validation for snippets
//!
//! An extensible rule-based validation pass that runs after parsing to catch
//! errors the grammar can't express.
//!
//! # Usage
//!
//! ```ignore
//! use replcog_core::parser::{parse_block, semantic_validator::{validate_program, ValidationContext}};
//!
//! let program = parse_block(source)?;
//! let errors = validate_program(&program, &ValidationContext::new(source));
//! ```
//!
//! # Adding a New Rule
//!
//! 1. Create a new file in `semantic_validator/rules/`
//! 2. Implement `ValidationRule` for your struct
//! 3. Add it to the `Validator::new()` constructor

pub mod rules;

use crate::executor::types::ast::{Span, Stmt};
use std::collections::HashSet;

// ============================================================================
// Validation Error Types
// ============================================================================

/// A validation error produced by semantic analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// The source location of the issue
    pub span: Span,
    /// Human-readable message
    pub message: String,
    /// Severity level
    pub severity: Severity,
    /// Which rule produced this error
    pub rule_id: &'static str,
}

/// Severity levels for validation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Must be fixed - the snippet will not run
    Error,
    /// Probably a mistake - the snippet still runs
    Warning,
}

impl ValidationError {
    pub fn error(span: Span, message: impl Into<String>, rule_id: &'static str) -> Self {
        Self {
            span,
            message: message.into(),
            severity: Severity::Error,
            rule_id,
        }
    }

    pub fn warning(span: Span, message: impl Into<String>, rule_id: &'static str) -> Self {
        Self {
            span,
            message: message.into(),
            severity: Severity::Warning,
            rule_id,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.severity, Severity::Error)
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(
            f,
            "{} at line {}, col {}: {} [{}]",
            severity,
            self.span.start_line + 1,
            self.span.start_col + 1,
            self.message,
            self.rule_id
        )
    }
}

impl std::error::Error for ValidationError {}

// ============================================================================
// Validation Context
// ============================================================================

/// What a rule may know besides the AST
#[derive(Debug, Clone, Default)]
pub struct ValidationContext<'a> {
    /// The original source code
    pub source: &'a str,
    /// Names already bound in the scope the snippet will run in
    pub predefined: HashSet<String>,
}

impl<'a> ValidationContext<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            predefined: HashSet::new(),
        }
    }

    pub fn with_predefined<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.predefined.extend(names.into_iter().map(Into::into));
        self
    }
}

// ============================================================================
// ValidationRule Trait
// ============================================================================

/// Trait that all validation rules must implement.
///
/// Each rule checks one aspect of the program and does not depend on the
/// results of other rules.
pub trait ValidationRule: Send + Sync {
    /// Unique identifier for this rule (e.g., "nested-await")
    fn id(&self) -> &'static str;

    /// Human-readable description of what this rule checks
    fn description(&self) -> &'static str;

    /// Run the validation and return any errors found.
    fn validate(&self, program: &Stmt, ctx: &ValidationContext) -> Vec<ValidationError>;
}

// ============================================================================
// Validator - Runs All Rules
// ============================================================================

pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    /// Create a new validator with all built-in rules.
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(rules::NestedAwaitRule),
                Box::new(rules::LoopControlRule),
                Box::new(rules::UndefinedVariableRule),
            ],
        }
    }

    pub fn validate(&self, program: &Stmt, ctx: &ValidationContext) -> Vec<ValidationError> {
        self.rules
            .iter()
            .flat_map(|rule| rule.validate(program, ctx))
            .collect()
    }

    /// Registered rules as (id, description)
    pub fn rules(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.rules.iter().map(|r| (r.id(), r.description()))
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Validate a program and return all errors and warnings found.
pub fn validate_program(program: &Stmt, ctx: &ValidationContext) -> Vec<ValidationError> {
    Validator::new().validate(program, ctx)
}
