//! Type definitions for the executor
//!
//! This module contains all the core types used by the executor:
//! - AST nodes (Stmt, Expr)
//! - Runtime values (Val, Awaitable)
//! - Control flow (Control, Frame, FrameKind)
//! - Execution phases for each statement type

pub mod ast;
pub mod control;
pub mod phase;
pub mod values;

pub use ast::{BinaryOp, Expr, MemberAccess, Span, Stmt, UnaryOp};
pub use control::{Control, Frame, FrameKind};
pub use phase::*;
pub use values::{Awaitable, Val};
