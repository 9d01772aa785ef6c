//! Control flow and execution frame types

use super::ast::Stmt;
use super::phase::{BlockPhase, EvalPhase, ForPhase, IfPhase, TryPhase, WhilePhase};
use super::values::{Awaitable, Val};
use std::sync::Arc;

/* ===================== Control Flow ===================== */

/// Control flow state
///
/// When control != None the VM either unwinds the stack (break, continue,
/// return, throw) or stops and hands control to the driver (yield, suspend).
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    None,
    Break,
    Continue,
    /// Optional final value produced before execution stops
    Return(Option<Val>),
    Throw(Val),
    /// A value was produced; the driver must deliver it before resuming
    Yield(Val),
    /// Execution is waiting on an awaitable; the frame stays on the stack
    Suspend(Awaitable),
}

/* ===================== Frames ===================== */

/// Frame kind - the type and state of a statement being executed
#[derive(Debug, Clone, PartialEq)]
pub enum FrameKind {
    Block { phase: BlockPhase, idx: usize },
    Expr { phase: EvalPhase },
    Assign { phase: EvalPhase },
    Delete { phase: EvalPhase },
    If { phase: IfPhase },
    While { phase: WhilePhase },
    ForLoop { phase: ForPhase, idx: usize },
    Return { phase: EvalPhase },
    Yield { phase: EvalPhase },
    Throw { phase: EvalPhase },
    Try { phase: TryPhase },
    Break,
    Continue,
}

impl FrameKind {
    pub fn is_loop(&self) -> bool {
        matches!(self, FrameKind::While { .. } | FrameKind::ForLoop { .. })
    }
}

/// Execution frame - one per active statement
///
/// The frame stack replaces the system call stack, which is what lets a
/// running snippet stop at any statement and be resumed later.
#[derive(Debug, Clone)]
pub struct Frame {
    /// The kind and state of this frame
    pub kind: FrameKind,

    /// The AST node (statement) this frame represents
    pub node: Arc<Stmt>,

    /// Materialized items of a `for` loop iterable
    pub items: Vec<Val>,
}

impl Frame {
    /// 1-based source line of the statement this frame executes
    pub fn line(&self) -> usize {
        self.node.span().line()
    }
}
