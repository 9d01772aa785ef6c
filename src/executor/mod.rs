//! Snippet executor
//!
//! A resumable, stack-driven interpreter. Every active statement is a frame
//! on an explicit stack, so execution can stop after any step and pick up
//! later. That is what lets the async driver in [`crate::execution`] yield to
//! the runtime between steps, deliver produced values one at a time, and
//! cancel a snippet that never awaits.

pub mod errors;
pub mod exec_loop;
pub mod expressions;
pub mod statements;
pub mod stdlib;
pub mod types;
pub mod vm;

#[cfg(test)]
mod tests;

pub use errors::{ErrorInfo, RuntimeError, TraceEntry};
pub use exec_loop::{run_for, run_until_done, step};
pub use expressions::{eval_expr, EvalResult};
pub use stdlib::StdlibFunc;
pub use types::{Awaitable, Control, Expr, Frame, FrameKind, Span, Stmt, Val};
pub use vm::{Env, Step, VM};
