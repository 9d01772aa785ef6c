//! Snippet compilation
//!
//! Source is tried as a single expression first and as a statement block
//! second. A block is the body of an implicit generator: `yield` and `return`
//! are legal anywhere in it, and when its last top-level statement is a bare
//! expression that expression becomes the final produced value.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::executor::types::ast::{Expr, Span, Stmt};
use crate::parser::semantic_validator::{validate_program, ValidationContext, ValidationError};
use crate::parser::{parse_block, parse_expression, ParseError};
use crate::scope::Scope;

/* ===================== Compiled Units ===================== */

/// The two shapes a snippet compiles to
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "t")]
pub enum Code {
    /// Produces exactly one value
    Expression { expr: Expr },
    /// Produces each yielded value; `implicit_result` marks a trailing
    /// bare expression rewritten into a final yield
    Block {
        body: Vec<Stmt>,
        implicit_result: bool,
    },
}

/// A compiled snippet, ready for a single execution
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    pub code: Code,
    source: Arc<str>,
    /// Non-fatal diagnostics (e.g. names that may be undefined)
    pub warnings: Vec<ValidationError>,
}

impl CompiledUnit {
    pub fn is_expression(&self) -> bool {
        matches!(self.code, Code::Expression { .. })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Trimmed text of a 1-based source line
    pub fn source_line(&self, line: usize) -> Option<String> {
        source_line(&self.source, line)
    }

    /// The statement tree the VM runs
    pub fn program(&self) -> Stmt {
        match &self.code {
            Code::Expression { expr } => {
                let span = expr.span();
                Stmt::Block {
                    body: vec![Stmt::Yield {
                        value: expr.clone(),
                        implicit: true,
                        span,
                    }],
                    span,
                }
            }
            Code::Block { body, .. } => Stmt::Block {
                body: body.clone(),
                span: Span::default(),
            },
        }
    }
}

/* ===================== Compile Errors ===================== */

/// Source rejected before anything ran
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    /// Neither an expression nor a statement block
    #[error("{message}")]
    Syntax {
        message: String,
        line: Option<usize>,
        column: Option<usize>,
        source_line: Option<String>,
    },
    /// Parsed, but a semantic rule refused it
    #[error("{message}")]
    Semantic {
        message: String,
        rule_id: &'static str,
        line: usize,
        column: usize,
        source_line: Option<String>,
    },
}

impl CompileError {
    fn from_parse(err: &ParseError, source: &str) -> Self {
        let span = err.span();
        let line = span.map(|s| s.line());
        CompileError::Syntax {
            message: err.message().to_string(),
            line,
            column: span.map(|s| s.start_col + 1),
            source_line: line.and_then(|l| raw_source_line(source, l)),
        }
    }

    fn from_validation(err: ValidationError, source: &str) -> Self {
        let line = err.span.line();
        CompileError::Semantic {
            message: err.message,
            rule_id: err.rule_id,
            line,
            column: err.span.start_col + 1,
            source_line: raw_source_line(source, line),
        }
    }

    pub fn line(&self) -> Option<usize> {
        match self {
            CompileError::Syntax { line, .. } => *line,
            CompileError::Semantic { line, .. } => Some(*line),
        }
    }

    /// Multi-line report with a caret under the offending column
    ///
    /// ```text
    ///   line 2
    ///     y = (2 +
    ///             ^
    /// SyntaxError: expected expression
    /// ```
    pub fn render(&self) -> String {
        let (message, line, column, source_line) = match self {
            CompileError::Syntax {
                message,
                line,
                column,
                source_line,
            } => (message, *line, *column, source_line),
            CompileError::Semantic {
                message,
                line,
                column,
                source_line,
                ..
            } => (message, Some(*line), Some(*column), source_line),
        };

        let mut out = String::new();
        if let Some(line) = line {
            out.push_str(&format!("  line {}\n", line));
        }
        if let Some(text) = source_line {
            out.push_str(&format!("    {}\n", text));
            if let Some(column) = column {
                let caret_at = text.chars().count().min(column.saturating_sub(1));
                out.push_str(&format!("    {}^\n", " ".repeat(caret_at)));
            }
        }
        out.push_str(&format!("SyntaxError: {}", message));
        out
    }
}

/* ===================== Compilation ===================== */

/// Compile `source` against the names currently bound in `scope`
///
/// The scope is only used for diagnostics; names are resolved at run time.
pub fn compile(source: &str, scope: &Scope) -> Result<CompiledUnit, CompileError> {
    let code = match parse_expression(source) {
        Ok(expr) => Code::Expression { expr },
        Err(_) => match parse_block(source) {
            Ok(Stmt::Block { body, .. }) => classify_block(body),
            Ok(other) => classify_block(vec![other]),
            Err(err) => return Err(CompileError::from_parse(&err, source)),
        },
    };

    let unit = CompiledUnit {
        code,
        source: Arc::from(source),
        warnings: Vec::new(),
    };

    let ctx = ValidationContext::new(source).with_predefined(scope.names());
    let (errors, warnings): (Vec<_>, Vec<_>) = validate_program(&unit.program(), &ctx)
        .into_iter()
        .partition(ValidationError::is_error);

    if let Some(first) = errors.into_iter().next() {
        return Err(CompileError::from_validation(first, source));
    }

    debug!(
        expression = unit.is_expression(),
        warnings = warnings.len(),
        "compiled snippet"
    );
    Ok(CompiledUnit { warnings, ..unit })
}

/// Rewrite a trailing bare expression into the block's implicit result
fn classify_block(mut body: Vec<Stmt>) -> Code {
    let implicit_result = match body.pop() {
        Some(Stmt::Expr { expr, span }) => {
            body.push(Stmt::Yield {
                value: expr,
                implicit: true,
                span,
            });
            true
        }
        Some(other) => {
            body.push(other);
            false
        }
        None => false,
    };
    Code::Block {
        body,
        implicit_result,
    }
}

fn raw_source_line(source: &str, line: usize) -> Option<String> {
    source
        .lines()
        .nth(line.checked_sub(1)?)
        .map(|l| l.trim_end().to_string())
}

pub(crate) fn source_line(source: &str, line: usize) -> Option<String> {
    raw_source_line(source, line).map(|l| l.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::types::ast::BinaryOp;

    fn compile_ok(source: &str) -> CompiledUnit {
        compile(source, &Scope::new()).expect("Should compile")
    }

    #[test]
    fn test_expression_preferred() {
        let unit = compile_ok("3 + 4");
        match unit.code {
            Code::Expression {
                expr: Expr::BinaryOp {
                    op: BinaryOp::Add, ..
                },
            } => {}
            other => panic!("Expected Add expression, got {:?}", other),
        }
    }

    #[test]
    fn test_block_with_trailing_expression() {
        let unit = compile_ok("x = 3\nx * 2");
        match &unit.code {
            Code::Block {
                body,
                implicit_result,
            } => {
                assert!(implicit_result);
                assert!(matches!(
                    body.last(),
                    Some(Stmt::Yield { implicit: true, .. })
                ));
            }
            other => panic!("Expected Block, got {:?}", other),
        }
    }

    #[test]
    fn test_block_without_trailing_expression() {
        for source in ["x = 1", "for x in range(3): yield x", "del y", "return 5"] {
            match compile(source, &Scope::new()) {
                Ok(CompiledUnit {
                    code: Code::Block {
                        implicit_result, ..
                    },
                    ..
                }) => assert!(!implicit_result, "{:?}", source),
                other => panic!("Expected Block for {:?}, got {:?}", source, other),
            }
        }
    }

    #[test]
    fn test_trailing_expression_after_yields_is_kept() {
        let unit = compile_ok("yield 1\n2");
        assert!(matches!(
            unit.code,
            Code::Block {
                implicit_result: true,
                ..
            }
        ));
    }

    #[test]
    fn test_syntax_error_reports_block_error() {
        let err = compile("x = 1\ny = (2 +", &Scope::new()).expect_err("Should fail");
        match &err {
            CompileError::Syntax {
                line, source_line, ..
            } => {
                assert_eq!(*line, Some(2));
                assert_eq!(source_line.as_deref(), Some("y = (2 +"));
            }
            other => panic!("Expected Syntax error, got {:?}", other),
        }
        let rendered = err.render();
        assert!(rendered.contains("  line 2\n    y = (2 +\n"));
        assert!(rendered.contains('^'));
        assert!(rendered.starts_with("  line 2"));
        assert!(rendered.lines().last().unwrap_or("").starts_with("SyntaxError: "));
    }

    #[test]
    fn test_semantic_error_is_compile_error() {
        let err = compile("x = 1\nbreak", &Scope::new()).expect_err("Should fail");
        match err {
            CompileError::Semantic { rule_id, line, .. } => {
                assert_eq!(rule_id, "loop-control");
                assert_eq!(line, 2);
            }
            other => panic!("Expected Semantic error, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_await_rejected() {
        let err = compile("len(await sleep(1))", &Scope::new()).expect_err("Should fail");
        assert!(matches!(
            err,
            CompileError::Semantic {
                rule_id: "nested-await",
                ..
            }
        ));
    }

    #[test]
    fn test_warnings_use_scope_names() {
        let unit = compile_ok("y + 1");
        assert_eq!(unit.warnings.len(), 1);

        let mut scope = Scope::new();
        scope.set("y", crate::executor::Val::Num(1.0));
        let unit = compile("y + 1", &scope).expect("Should compile");
        assert!(unit.warnings.is_empty());
    }

    #[test]
    fn test_expression_program_is_implicit_yield() {
        let unit = compile_ok("sleep(1)");
        match unit.program() {
            Stmt::Block { body, .. } => {
                assert_eq!(body.len(), 1);
                assert!(matches!(body[0], Stmt::Yield { implicit: true, .. }));
            }
            other => panic!("Expected Block, got {:?}", other),
        }
    }

    #[test]
    fn test_source_line_is_trimmed() {
        let unit = compile_ok("if true {\n    1\n}");
        assert_eq!(unit.source_line(2).as_deref(), Some("1"));
        assert_eq!(unit.source_line(9), None);
    }
}
