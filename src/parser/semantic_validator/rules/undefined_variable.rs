//! Rule: Undefined Variable
//!
//! Warns when a name is read before anything binds it. Snippets run in a
//! shared scope, so names bound by earlier evaluations or by the caller are
//! passed in through [`ValidationContext::predefined`]. This is a warning: the
//! snippet still runs and raises `NameError` if the name is really missing.
//!
//! ```text
//! y = x + 1      # warning: 'x' may be undefined
//! x = 5
//! ```

use std::collections::HashSet;

use crate::executor::stdlib::is_builtin;
use crate::executor::types::ast::{Expr, MemberAccess, Stmt};

use super::super::{ValidationContext, ValidationError, ValidationRule};

pub struct UndefinedVariableRule;

impl ValidationRule for UndefinedVariableRule {
    fn id(&self) -> &'static str {
        "undefined-variable"
    }

    fn description(&self) -> &'static str {
        "names should be bound before they are read"
    }

    fn validate(&self, program: &Stmt, ctx: &ValidationContext) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut defined: HashSet<String> = ctx.predefined.clone();
        check_stmt(program, &mut defined, &mut errors, self.id());
        errors
    }
}

// ============================================================================
// AST Traversal
// ============================================================================

fn check_stmt(
    stmt: &Stmt,
    defined: &mut HashSet<String>,
    errors: &mut Vec<ValidationError>,
    rule_id: &'static str,
) {
    match stmt {
        Stmt::Assign {
            var, path, value, ..
        } => {
            check_expr(value, defined, errors, rule_id);
            if !path.is_empty() && !is_known(var, defined) {
                errors.push(undefined(var, stmt, rule_id));
            }
            for segment in path {
                if let MemberAccess::Index { expr, .. } = segment {
                    check_expr(expr, defined, errors, rule_id);
                }
            }
            defined.insert(var.clone());
        }

        Stmt::Delete { name, .. } => {
            if !is_known(name, defined) {
                errors.push(undefined(name, stmt, rule_id));
            }
        }

        Stmt::Expr { expr, .. } => check_expr(expr, defined, errors, rule_id),

        Stmt::Yield { value, .. } | Stmt::Throw { value, .. } => {
            check_expr(value, defined, errors, rule_id)
        }

        Stmt::Return { value, .. } => {
            if let Some(expr) = value {
                check_expr(expr, defined, errors, rule_id);
            }
        }

        Stmt::If {
            test,
            then_s,
            else_s,
            ..
        } => {
            check_expr(test, defined, errors, rule_id);
            check_stmt(then_s, defined, errors, rule_id);
            if let Some(else_stmt) = else_s {
                check_stmt(else_stmt, defined, errors, rule_id);
            }
        }

        // Loop bodies may read what a previous iteration bound
        Stmt::While { test, body, .. } => {
            collect_bindings(body, defined);
            check_expr(test, defined, errors, rule_id);
            check_stmt(body, defined, errors, rule_id);
        }

        Stmt::ForLoop {
            binding,
            iterable,
            body,
            ..
        } => {
            check_expr(iterable, defined, errors, rule_id);
            defined.insert(binding.clone());
            collect_bindings(body, defined);
            check_stmt(body, defined, errors, rule_id);
        }

        Stmt::Try {
            body,
            catch_var,
            catch_body,
            ..
        } => {
            check_stmt(body, defined, errors, rule_id);
            defined.insert(catch_var.clone());
            check_stmt(catch_body, defined, errors, rule_id);
        }

        Stmt::Block { body, .. } => {
            for stmt in body {
                check_stmt(stmt, defined, errors, rule_id);
            }
        }

        Stmt::Break { .. } | Stmt::Continue { .. } => {}
    }
}

fn check_expr(
    expr: &Expr,
    defined: &HashSet<String>,
    errors: &mut Vec<ValidationError>,
    rule_id: &'static str,
) {
    match expr {
        Expr::Ident { name, span } => {
            if !is_known(name, defined) {
                errors.push(ValidationError::warning(
                    *span,
                    format!("'{}' may be undefined", name),
                    rule_id,
                ));
            }
        }
        Expr::Member { object, .. } => check_expr(object, defined, errors, rule_id),
        Expr::Index { object, index, .. } => {
            check_expr(object, defined, errors, rule_id);
            check_expr(index, defined, errors, rule_id);
        }
        Expr::Call { callee, args, .. } => {
            check_expr(callee, defined, errors, rule_id);
            for arg in args {
                check_expr(arg, defined, errors, rule_id);
            }
        }
        Expr::Await { inner, .. } => check_expr(inner, defined, errors, rule_id),
        Expr::Unary { operand, .. } => check_expr(operand, defined, errors, rule_id),
        Expr::BinaryOp { left, right, .. } => {
            check_expr(left, defined, errors, rule_id);
            check_expr(right, defined, errors, rule_id);
        }
        Expr::Ternary {
            condition,
            consequent,
            alternate,
            ..
        } => {
            check_expr(condition, defined, errors, rule_id);
            check_expr(consequent, defined, errors, rule_id);
            check_expr(alternate, defined, errors, rule_id);
        }
        Expr::LitList { elements, .. } => {
            for element in elements {
                check_expr(element, defined, errors, rule_id);
            }
        }
        Expr::LitObj { properties, .. } => {
            for (_, _, value) in properties {
                check_expr(value, defined, errors, rule_id);
            }
        }
        Expr::LitBool { .. } | Expr::LitNum { .. } | Expr::LitStr { .. } | Expr::LitNull { .. } => {}
    }
}

/// Names bound anywhere inside `stmt`
fn collect_bindings(stmt: &Stmt, defined: &mut HashSet<String>) {
    match stmt {
        Stmt::Assign { var, .. } => {
            defined.insert(var.clone());
        }
        Stmt::ForLoop { binding, body, .. } => {
            defined.insert(binding.clone());
            collect_bindings(body, defined);
        }
        Stmt::Try {
            body,
            catch_var,
            catch_body,
            ..
        } => {
            defined.insert(catch_var.clone());
            collect_bindings(body, defined);
            collect_bindings(catch_body, defined);
        }
        Stmt::If { then_s, else_s, .. } => {
            collect_bindings(then_s, defined);
            if let Some(else_stmt) = else_s {
                collect_bindings(else_stmt, defined);
            }
        }
        Stmt::While { body, .. } => collect_bindings(body, defined),
        Stmt::Block { body, .. } => {
            for stmt in body {
                collect_bindings(stmt, defined);
            }
        }
        _ => {}
    }
}

fn is_known(name: &str, defined: &HashSet<String>) -> bool {
    defined.contains(name) || is_builtin(name)
}

fn undefined(name: &str, stmt: &Stmt, rule_id: &'static str) -> ValidationError {
    ValidationError::warning(stmt.span(), format!("'{}' may be undefined", name), rule_id)
}
