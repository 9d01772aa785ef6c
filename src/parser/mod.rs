//! PEST-based parser for the snippet dialect
//!
//! Produces the executor AST with span information for error reporting.
//! A snippet is parsed either as a single expression or as a block of
//! statements; [`crate::compiler`] decides which.

use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;

use crate::executor::types::ast::{BinaryOp, Expr, MemberAccess, Span, Stmt, UnaryOp};

pub mod semantic_validator;


/* ===================== PEST Parser ===================== */

#[derive(Parser)]
#[grammar = "parser/snippet.pest"]
struct SnippetParser;

/* ===================== Error Types ===================== */

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    PestError(String, Option<Span>),
    BuildError(String, Option<Span>),
}

impl ParseError {
    pub fn span(&self) -> Option<Span> {
        match self {
            ParseError::PestError(_, span) => *span,
            ParseError::BuildError(_, span) => *span,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ParseError::PestError(msg, _) => msg,
            ParseError::BuildError(msg, _) => msg,
        }
    }

    /// 1-based line the error points at
    pub fn line(&self) -> Option<usize> {
        self.span().map(|s| s.line())
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ParseError {}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        let span = match err.line_col {
            pest::error::LineColLocation::Pos((line, col)) => Some(Span {
                start: 0,
                end: 0,
                start_line: line.saturating_sub(1),
                start_col: col.saturating_sub(1),
                end_line: line.saturating_sub(1),
                end_col: col,
            }),
            pest::error::LineColLocation::Span((start_line, start_col), (end_line, end_col)) => {
                Some(Span {
                    start: 0,
                    end: 0,
                    start_line: start_line.saturating_sub(1),
                    start_col: start_col.saturating_sub(1),
                    end_line: end_line.saturating_sub(1),
                    end_col: end_col.saturating_sub(1),
                })
            }
        };
        let err = err.renamed_rules(describe_rule);
        ParseError::PestError(err.variant.message().into_owned(), span)
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Human wording for the rules pest lists as expected
fn describe_rule(rule: &Rule) -> String {
    match rule {
        Rule::EOI => "end of input".to_string(),
        Rule::expression | Rule::conditional | Rule::or_expr => "expression".to_string(),
        Rule::statement => "statement".to_string(),
        Rule::identifier => "name".to_string(),
        Rule::block => "'{'".to_string(),
        Rule::inline_suite => "':'".to_string(),
        Rule::op_eq => "'=='".to_string(),
        Rule::op_ne => "'!='".to_string(),
        Rule::op_lt => "'<'".to_string(),
        Rule::op_lte => "'<='".to_string(),
        Rule::op_gt => "'>'".to_string(),
        Rule::op_gte => "'>='".to_string(),
        Rule::op_add => "'+'".to_string(),
        Rule::op_sub => "'-'".to_string(),
        Rule::op_mul => "'*'".to_string(),
        Rule::op_div => "'/'".to_string(),
        Rule::op_mod => "'%'".to_string(),
        Rule::op_and => "'and'".to_string(),
        Rule::op_or => "'or'".to_string(),
        Rule::call_suffix => "'('".to_string(),
        Rule::member_suffix => "'.'".to_string(),
        Rule::index_suffix => "'['".to_string(),
        other => format!("{:?}", other),
    }
}

/* ===================== Span Helpers ===================== */

/// Convert a PEST pair's span to our Span type
fn pair_to_span(pair: &Pair<Rule>, source: &str) -> Span {
    let pest_span = pair.as_span();
    let start = pest_span.start();
    let end = pest_span.end();

    let (start_line, start_col) = offset_to_line_col(source, start);
    let (end_line, end_col) = offset_to_line_col(source, end);

    Span::new(start, end, start_line, start_col, end_line, end_col)
}

/// Convert byte offset to (line, column) - 0-indexed
fn offset_to_line_col(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 0;
    let mut col = 0;

    for (idx, ch) in source.char_indices() {
        if idx >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 0;
        } else {
            col += 1;
        }
    }

    (line, col)
}

/// Take the next child pair, or fail with a build error naming what was missing
fn next_pair<'i>(inner: &mut Pairs<'i, Rule>, what: &str, span: Span) -> ParseResult<Pair<'i, Rule>> {
    inner
        .next()
        .ok_or_else(|| ParseError::BuildError(format!("Missing {}", what), Some(span)))
}

/* ===================== Public API ===================== */

/// Parse source consisting of exactly one expression
pub fn parse_expression(source: &str) -> ParseResult<Expr> {
    let mut pairs = SnippetParser::parse(Rule::expression_unit, source)?;
    let unit = next_pair(&mut pairs, "expression unit", Span::default())?;
    let span = pair_to_span(&unit, source);
    let expr = next_pair(&mut unit.into_inner(), "expression", span)?;
    build_expression(expr, source)
}

/// Parse source as a sequence of statements, returned as a `Stmt::Block`
pub fn parse_block(source: &str) -> ParseResult<Stmt> {
    let mut pairs = SnippetParser::parse(Rule::block_unit, source)?;
    let unit = next_pair(&mut pairs, "block unit", Span::default())?;
    let span = pair_to_span(&unit, source);

    let mut body = Vec::new();
    for pair in unit.into_inner() {
        match pair.as_rule() {
            Rule::statement => body.push(build_statement(pair, source)?),
            Rule::EOI => {}
            other => {
                return Err(ParseError::BuildError(
                    format!("Unexpected block content: {:?}", other),
                    Some(pair_to_span(&pair, source)),
                ))
            }
        }
    }

    Ok(Stmt::Block { body, span })
}

/* ===================== Statement Builder ===================== */

fn build_statement(pair: Pair<Rule>, source: &str) -> ParseResult<Stmt> {
    let span = pair_to_span(&pair, source);
    match pair.as_rule() {
        Rule::statement | Rule::inline_suite => {
            let inner = next_pair(&mut pair.into_inner(), "statement", span)?;
            build_statement(inner, source)
        }
        Rule::block => build_block(pair, source),
        Rule::if_stmt => build_if_stmt(pair, source),
        Rule::while_stmt => build_while_stmt(pair, source),
        Rule::for_stmt => build_for_stmt(pair, source),
        Rule::try_stmt => build_try_stmt(pair, source),
        Rule::assign_stmt => build_assign_stmt(pair, source),
        Rule::return_stmt => {
            let value = match pair.into_inner().next() {
                Some(expr) => Some(build_expression(expr, source)?),
                None => None,
            };
            Ok(Stmt::Return { value, span })
        }
        Rule::yield_stmt => {
            let expr = next_pair(&mut pair.into_inner(), "yield value", span)?;
            Ok(Stmt::Yield {
                value: build_expression(expr, source)?,
                implicit: false,
                span,
            })
        }
        Rule::throw_stmt => {
            let expr = next_pair(&mut pair.into_inner(), "throw value", span)?;
            Ok(Stmt::Throw {
                value: build_expression(expr, source)?,
                span,
            })
        }
        Rule::del_stmt => {
            let name = next_pair(&mut pair.into_inner(), "name to delete", span)?;
            Ok(Stmt::Delete {
                name: name.as_str().to_string(),
                span,
            })
        }
        Rule::break_stmt => Ok(Stmt::Break { span }),
        Rule::continue_stmt => Ok(Stmt::Continue { span }),
        Rule::expr_stmt => {
            let expr = next_pair(&mut pair.into_inner(), "expression", span)?;
            Ok(Stmt::Expr {
                expr: build_expression(expr, source)?,
                span,
            })
        }
        other => Err(ParseError::BuildError(
            format!("Unexpected statement rule: {:?}", other),
            Some(span),
        )),
    }
}

fn build_block(pair: Pair<Rule>, source: &str) -> ParseResult<Stmt> {
    let span = pair_to_span(&pair, source);
    let body = pair
        .into_inner()
        .map(|stmt_pair| build_statement(stmt_pair, source))
        .collect::<ParseResult<Vec<Stmt>>>()?;

    Ok(Stmt::Block { body, span })
}

fn build_if_stmt(pair: Pair<Rule>, source: &str) -> ParseResult<Stmt> {
    let span = pair_to_span(&pair, source);
    let mut inner = pair.into_inner();

    let test = build_expression(next_pair(&mut inner, "if condition", span)?, source)?;
    let then_s = build_statement(next_pair(&mut inner, "if body", span)?, source)?;

    let mut elifs = Vec::new();
    let mut else_s = None;
    for clause in inner {
        let clause_span = pair_to_span(&clause, source);
        match clause.as_rule() {
            Rule::elif_clause => {
                let mut clause_inner = clause.into_inner();
                let test = build_expression(
                    next_pair(&mut clause_inner, "elif condition", clause_span)?,
                    source,
                )?;
                let body = build_statement(
                    next_pair(&mut clause_inner, "elif body", clause_span)?,
                    source,
                )?;
                elifs.push((clause_span, test, body));
            }
            Rule::else_clause => {
                let body = next_pair(&mut clause.into_inner(), "else body", clause_span)?;
                else_s = Some(Box::new(build_statement(body, source)?));
            }
            other => {
                return Err(ParseError::BuildError(
                    format!("Unexpected if clause: {:?}", other),
                    Some(clause_span),
                ))
            }
        }
    }

    // `elif` chains become nested ifs in the else branch
    for (clause_span, test, body) in elifs.into_iter().rev() {
        else_s = Some(Box::new(Stmt::If {
            test,
            then_s: Box::new(body),
            else_s,
            span: clause_span,
        }));
    }

    Ok(Stmt::If {
        test,
        then_s: Box::new(then_s),
        else_s,
        span,
    })
}

fn build_while_stmt(pair: Pair<Rule>, source: &str) -> ParseResult<Stmt> {
    let span = pair_to_span(&pair, source);
    let mut inner = pair.into_inner();

    let test = build_expression(next_pair(&mut inner, "while condition", span)?, source)?;
    let body = build_statement(next_pair(&mut inner, "while body", span)?, source)?;

    Ok(Stmt::While {
        test,
        body: Box::new(body),
        span,
    })
}

fn build_for_stmt(pair: Pair<Rule>, source: &str) -> ParseResult<Stmt> {
    let span = pair_to_span(&pair, source);
    let mut inner = pair.into_inner();

    let binding_pair = next_pair(&mut inner, "loop variable", span)?;
    let binding_span = pair_to_span(&binding_pair, source);
    let binding = binding_pair.as_str().to_string();

    let iterable = build_expression(next_pair(&mut inner, "iterable", span)?, source)?;
    let body = build_statement(next_pair(&mut inner, "for body", span)?, source)?;

    Ok(Stmt::ForLoop {
        binding,
        binding_span,
        iterable,
        body: Box::new(body),
        span,
    })
}

fn build_try_stmt(pair: Pair<Rule>, source: &str) -> ParseResult<Stmt> {
    let span = pair_to_span(&pair, source);
    let mut inner = pair.into_inner();

    let body = build_statement(next_pair(&mut inner, "try body", span)?, source)?;

    let catch_var_pair = next_pair(&mut inner, "catch variable", span)?;
    let catch_var_span = pair_to_span(&catch_var_pair, source);
    let catch_var = catch_var_pair.as_str().to_string();

    let catch_body = build_statement(next_pair(&mut inner, "catch body", span)?, source)?;

    Ok(Stmt::Try {
        body: Box::new(body),
        catch_var,
        catch_var_span,
        catch_body: Box::new(catch_body),
        span,
    })
}

fn build_assign_stmt(pair: Pair<Rule>, source: &str) -> ParseResult<Stmt> {
    let span = pair_to_span(&pair, source);
    let mut inner = pair.into_inner();

    let var_pair = next_pair(&mut inner, "assignment target", span)?;
    let var_span = pair_to_span(&var_pair, source);
    let var = var_pair.as_str().to_string();

    let mut path = Vec::new();
    let mut value = None;

    for pair in inner {
        match pair.as_rule() {
            Rule::assign_path_segment => {
                let segment_span = pair_to_span(&pair, source);
                let segment = next_pair(&mut pair.into_inner(), "path segment", segment_span)?;
                match segment.as_rule() {
                    Rule::identifier => path.push(MemberAccess::Prop {
                        property: segment.as_str().to_string(),
                        span: segment_span,
                    }),
                    _ => path.push(MemberAccess::Index {
                        expr: build_expression(segment, source)?,
                        span: segment_span,
                    }),
                }
            }
            _ => {
                value = Some(build_expression(pair, source)?);
                break;
            }
        }
    }

    let value = value.ok_or_else(|| {
        ParseError::BuildError("Missing assigned value".to_string(), Some(span))
    })?;

    Ok(Stmt::Assign {
        var,
        var_span,
        path,
        value,
        span,
    })
}

/* ===================== Expression Builder ===================== */

fn build_expression(pair: Pair<Rule>, source: &str) -> ParseResult<Expr> {
    let span = pair_to_span(&pair, source);
    match pair.as_rule() {
        Rule::expression | Rule::paren_expr => {
            let inner = next_pair(&mut pair.into_inner(), "expression", span)?;
            build_expression(inner, source)
        }

        Rule::await_expr => {
            let inner = next_pair(&mut pair.into_inner(), "awaited expression", span)?;
            Ok(Expr::Await {
                inner: Box::new(build_expression(inner, source)?),
                span,
            })
        }

        Rule::conditional => {
            let mut inner = pair.into_inner();
            let consequent = build_expression(next_pair(&mut inner, "expression", span)?, source)?;
            match inner.next() {
                None => Ok(consequent),
                Some(condition) => {
                    let condition = build_expression(condition, source)?;
                    let alternate =
                        build_expression(next_pair(&mut inner, "else branch", span)?, source)?;
                    Ok(Expr::Ternary {
                        condition: Box::new(condition),
                        consequent: Box::new(consequent),
                        alternate: Box::new(alternate),
                        span,
                    })
                }
            }
        }

        Rule::or_expr | Rule::and_expr | Rule::additive_expr | Rule::multiplicative_expr => {
            build_binary_expr(pair, source)
        }

        Rule::comparison_expr => build_comparison_expr(pair, source),

        Rule::not_expr | Rule::unary_expr => {
            let mut inner = pair.into_inner();
            let first = next_pair(&mut inner, "operand", span)?;
            let op = match first.as_rule() {
                Rule::op_not => UnaryOp::Not,
                Rule::op_neg => UnaryOp::Neg,
                _ => return build_expression(first, source),
            };
            let operand = build_expression(next_pair(&mut inner, "operand", span)?, source)?;
            Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
                span,
            })
        }

        Rule::postfix_expr => build_postfix_expr(pair, source),

        Rule::list_lit => {
            let elements = pair
                .into_inner()
                .map(|p| build_expression(p, source))
                .collect::<ParseResult<Vec<Expr>>>()?;
            Ok(Expr::LitList { elements, span })
        }

        Rule::object_lit => {
            let mut properties = Vec::new();
            for prop in pair.into_inner() {
                let prop_span = pair_to_span(&prop, source);
                let mut prop_inner = prop.into_inner();
                let key_pair = next_pair(&mut prop_inner, "property key", prop_span)?;
                let key_span = pair_to_span(&key_pair, source);
                let key = match key_pair.as_rule() {
                    Rule::string => build_string(key_pair, source)?,
                    _ => key_pair.as_str().to_string(),
                };
                let value =
                    build_expression(next_pair(&mut prop_inner, "property value", prop_span)?, source)?;
                properties.push((key, key_span, value));
            }
            Ok(Expr::LitObj { properties, span })
        }

        Rule::boolean => Ok(Expr::LitBool {
            v: pair.as_str() == "true",
            span,
        }),

        Rule::null => Ok(Expr::LitNull { span }),

        Rule::number => {
            let v = pair.as_str().parse::<f64>().map_err(|e| {
                ParseError::BuildError(format!("Invalid number literal: {}", e), Some(span))
            })?;
            Ok(Expr::LitNum { v, span })
        }

        Rule::string => Ok(Expr::LitStr {
            v: build_string(pair, source)?,
            span,
        }),

        Rule::identifier => Ok(Expr::Ident {
            name: pair.as_str().to_string(),
            span,
        }),

        other => Err(ParseError::BuildError(
            format!("Unexpected expression rule: {:?}", other),
            Some(span),
        )),
    }
}

/// Left-associative chain: operand (op operand)*
fn build_binary_expr(pair: Pair<Rule>, source: &str) -> ParseResult<Expr> {
    let span = pair_to_span(&pair, source);
    let mut inner = pair.into_inner();

    let mut left = build_expression(next_pair(&mut inner, "operand", span)?, source)?;

    while let Some(op_pair) = inner.next() {
        let op = binary_op_for(&op_pair, source)?;
        let right = build_expression(
            next_pair(&mut inner, "right operand after operator", span)?,
            source,
        )?;
        let new_span = left.span().merge(&right.span());
        left = Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
            span: new_span,
        };
    }

    Ok(left)
}

/// Comparisons chain: `a < b < c` means `a < b and b < c`
fn build_comparison_expr(pair: Pair<Rule>, source: &str) -> ParseResult<Expr> {
    let span = pair_to_span(&pair, source);
    let mut inner = pair.into_inner();

    let mut left = build_expression(next_pair(&mut inner, "operand", span)?, source)?;
    let mut chain: Option<Expr> = None;

    while let Some(op_pair) = inner.next() {
        let op = binary_op_for(&op_pair, source)?;
        let right = build_expression(
            next_pair(&mut inner, "right operand after operator", span)?,
            source,
        )?;
        let cmp = Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right.clone()),
            span,
        };
        chain = Some(match chain {
            None => cmp,
            Some(prev) => Expr::BinaryOp {
                op: BinaryOp::And,
                left: Box::new(prev),
                right: Box::new(cmp),
                span,
            },
        });
        left = right;
    }

    Ok(chain.unwrap_or(left))
}

fn binary_op_for(pair: &Pair<Rule>, source: &str) -> ParseResult<BinaryOp> {
    let op = match pair.as_rule() {
        Rule::op_or => BinaryOp::Or,
        Rule::op_and => BinaryOp::And,
        Rule::op_eq => BinaryOp::Eq,
        Rule::op_ne => BinaryOp::Ne,
        Rule::op_lt => BinaryOp::Lt,
        Rule::op_lte => BinaryOp::Lte,
        Rule::op_gt => BinaryOp::Gt,
        Rule::op_gte => BinaryOp::Gte,
        Rule::op_add => BinaryOp::Add,
        Rule::op_sub => BinaryOp::Sub,
        Rule::op_mul => BinaryOp::Mul,
        Rule::op_div => BinaryOp::Div,
        Rule::op_mod => BinaryOp::Mod,
        other => {
            return Err(ParseError::BuildError(
                format!("Unknown operator: {:?}", other),
                Some(pair_to_span(pair, source)),
            ))
        }
    };
    Ok(op)
}

fn build_postfix_expr(pair: Pair<Rule>, source: &str) -> ParseResult<Expr> {
    let span = pair_to_span(&pair, source);
    let mut inner = pair.into_inner();

    let mut expr = build_expression(next_pair(&mut inner, "primary expression", span)?, source)?;

    for suffix in inner {
        let suffix_span = pair_to_span(&suffix, source);
        let full_span = expr.span().merge(&suffix_span);
        expr = match suffix.as_rule() {
            Rule::call_suffix => {
                let args = suffix
                    .into_inner()
                    .map(|p| build_expression(p, source))
                    .collect::<ParseResult<Vec<Expr>>>()?;
                Expr::Call {
                    callee: Box::new(expr),
                    args,
                    span: full_span,
                }
            }
            Rule::member_suffix => {
                let property = next_pair(&mut suffix.into_inner(), "property name", suffix_span)?;
                Expr::Member {
                    object: Box::new(expr),
                    property: property.as_str().to_string(),
                    property_span: pair_to_span(&property, source),
                    span: full_span,
                }
            }
            Rule::index_suffix => {
                let index = next_pair(&mut suffix.into_inner(), "index", suffix_span)?;
                Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(build_expression(index, source)?),
                    span: full_span,
                }
            }
            other => {
                return Err(ParseError::BuildError(
                    format!("Unexpected postfix rule: {:?}", other),
                    Some(suffix_span),
                ))
            }
        };
    }

    Ok(expr)
}

fn build_string(pair: Pair<Rule>, source: &str) -> ParseResult<String> {
    let span = pair_to_span(&pair, source);
    let raw = next_pair(&mut pair.into_inner(), "string contents", span)?;
    Ok(unescape(raw.as_str()))
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
