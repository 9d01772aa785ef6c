//! Virtual Machine state
//!
//! The VM holds all execution state:
//! - frames: Stack of active statements
//! - control: Current control flow state (return, break, yield, etc.)
//! - env: The snippet's scope layered over the builtin functions

use super::stdlib::builtins;
use super::types::{
    BlockPhase, Control, EvalPhase, ForPhase, Frame, FrameKind, IfPhase, Stmt, TryPhase, Val,
    WhilePhase,
};
use crate::scope::Scope;
use std::collections::HashMap;
use std::sync::Arc;

/* ===================== Environment ===================== */

/// Name resolution for a running snippet
///
/// Scope bindings shadow builtins. Builtins are never written into the scope,
/// so a scope handed back to a session only contains what the snippet and
/// the caller put there.
#[derive(Debug, Clone)]
pub struct Env {
    pub scope: Scope,
    pub builtins: HashMap<String, Val>,
}

impl Env {
    pub fn lookup(&self, name: &str) -> Option<&Val> {
        self.scope.get(name).or_else(|| self.builtins.get(name))
    }
}

/* ===================== VM ===================== */

/// Virtual Machine state
///
/// This contains everything needed to execute (and pause/resume) a snippet.
#[derive(Debug, Clone)]
pub struct VM {
    /// Stack of execution frames
    pub frames: Vec<Frame>,

    /// Current control flow state
    pub control: Control,

    /// Scope and builtins
    pub env: Env,

    /// Value an awaiting frame receives when it is resumed
    pub resume_value: Option<Val>,

    /// Source lines of the active frames at the point the last error was raised
    pub fault_lines: Vec<usize>,
}

impl VM {
    /// Create a new VM with a program
    ///
    /// The program is wrapped in a root frame; nothing runs until stepped.
    pub fn new(program: Stmt, scope: Scope) -> Self {
        let mut vm = VM {
            frames: vec![],
            control: Control::None,
            env: Env {
                scope,
                builtins: builtins(),
            },
            resume_value: None,
            fault_lines: vec![],
        };

        push_stmt(&mut vm, &program);

        vm
    }

    /// True once no frames remain
    pub fn is_finished(&self) -> bool {
        self.frames.is_empty()
    }

    /// Clear a yield or suspend so execution can continue
    ///
    /// `value` is what the suspended `await` expression evaluates to.
    pub fn resume(&mut self, value: Option<Val>) {
        self.control = Control::None;
        self.resume_value = value;
    }

    /// Consume the VM, handing back its scope
    pub fn into_scope(self) -> Scope {
        self.env.scope
    }
}

/* ===================== Frame Management ===================== */

/// Push a new frame for a statement onto the stack
///
/// This determines the initial phase based on the statement type.
pub fn push_stmt(vm: &mut VM, stmt: &Stmt) {
    let kind = match stmt {
        Stmt::Block { .. } => FrameKind::Block {
            phase: BlockPhase::Execute,
            idx: 0,
        },
        Stmt::Expr { .. } => FrameKind::Expr {
            phase: EvalPhase::Eval,
        },
        Stmt::Assign { .. } => FrameKind::Assign {
            phase: EvalPhase::Eval,
        },
        Stmt::Delete { .. } => FrameKind::Delete {
            phase: EvalPhase::Eval,
        },
        Stmt::If { .. } => FrameKind::If {
            phase: IfPhase::Eval,
        },
        Stmt::While { .. } => FrameKind::While {
            phase: WhilePhase::Eval,
        },
        Stmt::ForLoop { .. } => FrameKind::ForLoop {
            phase: ForPhase::Init,
            idx: 0,
        },
        Stmt::Return { .. } => FrameKind::Return {
            phase: EvalPhase::Eval,
        },
        Stmt::Yield { .. } => FrameKind::Yield {
            phase: EvalPhase::Eval,
        },
        Stmt::Throw { .. } => FrameKind::Throw {
            phase: EvalPhase::Eval,
        },
        Stmt::Try { .. } => FrameKind::Try {
            phase: TryPhase::Start,
        },
        Stmt::Break { .. } => FrameKind::Break,
        Stmt::Continue { .. } => FrameKind::Continue,
    };

    vm.frames.push(Frame {
        kind,
        node: Arc::new(stmt.clone()),
        items: Vec::new(),
    });
}

/// Replace the kind of the top frame
pub fn set_top_kind(vm: &mut VM, kind: FrameKind) {
    if let Some(frame) = vm.frames.last_mut() {
        frame.kind = kind;
    }
}

/* ===================== Step Result ===================== */

/// Result of executing one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Continue to next step
    Continue,
    /// Execution stopped: finished, or waiting on the driver (see `vm.control`)
    Done,
}
