//! Rule: Nested Await
//!
//! Reports an error when `await` appears inside an expression rather than
//! as the outermost expression of a statement. A suspended statement is
//! re-evaluated on resume, so only the outermost position is resumable.
//!
//! # Valid
//!
//! ```text
//! await sleep(1)
//! x = await sleep(1)
//! yield await sleep(1)
//! return await sleep(1)
//! ```
//!
//! # Invalid
//!
//! ```text
//! x = (await sleep(1)) or 2    # await inside binary op
//! f(await sleep(1))            # await inside call args
//! if await sleep(1): pass      # await in condition
//! ```

use crate::executor::types::ast::{Expr, MemberAccess, Stmt};

use super::super::{ValidationContext, ValidationError, ValidationRule};

pub struct NestedAwaitRule;

impl ValidationRule for NestedAwaitRule {
    fn id(&self) -> &'static str {
        "nested-await"
    }

    fn description(&self) -> &'static str {
        "await must be the outermost expression of a statement"
    }

    fn validate(&self, program: &Stmt, _ctx: &ValidationContext) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        check_stmt(program, &mut errors, self.id());
        errors
    }
}

// ============================================================================
// AST Traversal
// ============================================================================

fn check_stmt(stmt: &Stmt, errors: &mut Vec<ValidationError>, rule_id: &'static str) {
    match stmt {
        // These ALLOW await as the outermost expression
        Stmt::Expr { expr, .. } => check_top_level_expr(expr, errors, rule_id),

        Stmt::Assign { value, path, .. } => {
            for segment in path {
                if let MemberAccess::Index { expr, .. } = segment {
                    check_nested_expr(expr, errors, rule_id);
                }
            }
            check_top_level_expr(value, errors, rule_id);
        }

        Stmt::Return { value, .. } => {
            if let Some(expr) = value {
                check_top_level_expr(expr, errors, rule_id);
            }
        }

        Stmt::Yield { value, .. } | Stmt::Throw { value, .. } => {
            check_top_level_expr(value, errors, rule_id)
        }

        // These DON'T allow await in their expressions
        Stmt::If {
            test,
            then_s,
            else_s,
            ..
        } => {
            check_nested_expr(test, errors, rule_id);
            check_stmt(then_s, errors, rule_id);
            if let Some(else_stmt) = else_s {
                check_stmt(else_stmt, errors, rule_id);
            }
        }

        Stmt::While { test, body, .. } => {
            check_nested_expr(test, errors, rule_id);
            check_stmt(body, errors, rule_id);
        }

        Stmt::ForLoop { iterable, body, .. } => {
            check_nested_expr(iterable, errors, rule_id);
            check_stmt(body, errors, rule_id);
        }

        Stmt::Try {
            body, catch_body, ..
        } => {
            check_stmt(body, errors, rule_id);
            check_stmt(catch_body, errors, rule_id);
        }

        Stmt::Block { body, .. } => {
            for stmt in body {
                check_stmt(stmt, errors, rule_id);
            }
        }

        Stmt::Delete { .. } | Stmt::Break { .. } | Stmt::Continue { .. } => {}
    }
}

/// A position where an outermost await is fine; anything inside it is not
fn check_top_level_expr(expr: &Expr, errors: &mut Vec<ValidationError>, rule_id: &'static str) {
    match expr {
        Expr::Await { inner, .. } => check_nested_expr(inner, errors, rule_id),
        _ => check_nested_expr(expr, errors, rule_id),
    }
}

/// A position where any await is an error
fn check_nested_expr(expr: &Expr, errors: &mut Vec<ValidationError>, rule_id: &'static str) {
    match expr {
        Expr::Await { span, inner } => {
            errors.push(ValidationError::error(
                *span,
                "await must be the outermost expression of a statement",
                rule_id,
            ));
            check_nested_expr(inner, errors, rule_id);
        }

        Expr::BinaryOp { left, right, .. } => {
            check_nested_expr(left, errors, rule_id);
            check_nested_expr(right, errors, rule_id);
        }

        Expr::Unary { operand, .. } => check_nested_expr(operand, errors, rule_id),

        Expr::Ternary {
            condition,
            consequent,
            alternate,
            ..
        } => {
            check_nested_expr(condition, errors, rule_id);
            check_nested_expr(consequent, errors, rule_id);
            check_nested_expr(alternate, errors, rule_id);
        }

        Expr::Call { callee, args, .. } => {
            check_nested_expr(callee, errors, rule_id);
            for arg in args {
                check_nested_expr(arg, errors, rule_id);
            }
        }

        Expr::Member { object, .. } => check_nested_expr(object, errors, rule_id),

        Expr::Index { object, index, .. } => {
            check_nested_expr(object, errors, rule_id);
            check_nested_expr(index, errors, rule_id);
        }

        Expr::LitList { elements, .. } => {
            for element in elements {
                check_nested_expr(element, errors, rule_id);
            }
        }

        Expr::LitObj { properties, .. } => {
            for (_, _, value) in properties {
                check_nested_expr(value, errors, rule_id);
            }
        }

        Expr::Ident { .. }
        | Expr::LitBool { .. }
        | Expr::LitNum { .. }
        | Expr::LitStr { .. }
        | Expr::LitNull { .. } => {}
    }
}
