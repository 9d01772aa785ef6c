//! Core execution loop
//!
//! This module contains the step() function - the heart of the interpreter.
//! It processes one frame at a time, advancing execution phases and managing the frame stack.
//!
//! ## Function Organization
//! 1. run_until_done() / run_for() - Drivers (call step repeatedly)
//! 2. step() - Main execution loop (dispatches to statement handlers)
//! 3. unwind() - Control flow propagation

use super::statements::{
    execute_assign, execute_block, execute_delete, execute_expr, execute_for, execute_if,
    execute_loop_control, execute_return, execute_throw, execute_try, execute_while,
    execute_yield,
};
use super::types::{Control, FrameKind, Stmt, TryPhase};
use super::vm::{push_stmt, set_top_kind, Step, VM};

/* ===================== Public API ===================== */

/// Run the VM until it stops
///
/// After it returns, inspect `vm.control`: `Yield`/`Suspend` mean the driver
/// must act and resume; anything else with no frames left means the program ended.
pub fn run_until_done(vm: &mut VM) {
    while step(vm) == Step::Continue {}
}

/// Run at most `budget` steps
///
/// Returns `Step::Continue` if the budget ran out before the VM stopped.
pub fn run_for(vm: &mut VM, budget: usize) -> Step {
    for _ in 0..budget {
        if step(vm) == Step::Done {
            return Step::Done;
        }
    }
    Step::Continue
}

/// Execute one step of the VM
pub fn step(vm: &mut VM) -> Step {
    if vm.control != Control::None {
        return unwind(vm);
    }

    let Some(frame) = vm.frames.last() else {
        return Step::Done;
    };

    // The node is shared, so holding it does not borrow the VM
    let kind = frame.kind.clone();
    let node = frame.node.clone();

    match (kind, node.as_ref()) {
        (FrameKind::Block { phase, idx }, Stmt::Block { body, .. }) => {
            execute_block(vm, phase, idx, body)
        }

        (FrameKind::Expr { .. }, Stmt::Expr { expr, .. }) => execute_expr(vm, expr),

        (
            FrameKind::Assign { .. },
            Stmt::Assign {
                var, path, value, ..
            },
        ) => execute_assign(vm, var, path, value),

        (FrameKind::Delete { .. }, Stmt::Delete { name, .. }) => execute_delete(vm, name),

        (
            FrameKind::If { phase },
            Stmt::If {
                test,
                then_s,
                else_s,
                ..
            },
        ) => execute_if(vm, phase, test, then_s, else_s.as_deref()),

        (FrameKind::While { .. }, Stmt::While { test, body, .. }) => {
            execute_while(vm, test, body)
        }

        (
            FrameKind::ForLoop { phase, idx },
            Stmt::ForLoop {
                binding,
                iterable,
                body,
                ..
            },
        ) => execute_for(vm, phase, idx, binding, iterable, body),

        (FrameKind::Return { .. }, Stmt::Return { value, .. }) => {
            execute_return(vm, value.as_ref())
        }

        (FrameKind::Yield { .. }, Stmt::Yield { value, .. }) => execute_yield(vm, value),

        (FrameKind::Throw { .. }, Stmt::Throw { value, .. }) => execute_throw(vm, value),

        (FrameKind::Try { phase }, Stmt::Try { body, .. }) => execute_try(vm, phase, body),

        (FrameKind::Break, Stmt::Break { .. }) => execute_loop_control(vm, Control::Break),

        (FrameKind::Continue, Stmt::Continue { .. }) => {
            execute_loop_control(vm, Control::Continue)
        }

        // push_stmt always pairs a kind with its node; drop a mismatched frame
        _ => {
            vm.frames.pop();
            Step::Continue
        }
    }
}

/* ===================== Control Flow ===================== */

/// Propagate active control flow
///
/// - Break/Continue pop frames up to the innermost loop.
/// - Return clears the stack.
/// - Throw pops frames until a Try frame running its try body catches it.
/// - Yield/Suspend are left for the driver.
fn unwind(vm: &mut VM) -> Step {
    match vm.control.clone() {
        Control::None => Step::Continue,

        Control::Yield(_) | Control::Suspend(_) => Step::Done,

        Control::Return(_) => {
            vm.frames.clear();
            Step::Done
        }

        Control::Break | Control::Continue => {
            while let Some(frame) = vm.frames.last() {
                if frame.kind.is_loop() {
                    if vm.control == Control::Break {
                        vm.frames.pop();
                    }
                    vm.control = Control::None;
                    return Step::Continue;
                }
                vm.frames.pop();
            }
            // Rejected at compile time; without a loop the program just ends
            vm.control = Control::None;
            Step::Done
        }

        Control::Throw(error) => {
            while let Some(frame) = vm.frames.last() {
                let catch = match (&frame.kind, frame.node.as_ref()) {
                    (
                        FrameKind::Try {
                            phase: TryPhase::ExecuteTry,
                        },
                        Stmt::Try {
                            catch_var,
                            catch_body,
                            ..
                        },
                    ) => Some((catch_var.clone(), catch_body.as_ref().clone())),
                    _ => None,
                };

                if let Some((catch_var, catch_body)) = catch {
                    vm.control = Control::None;
                    vm.fault_lines.clear();
                    vm.env.scope.set(catch_var, error);
                    set_top_kind(
                        vm,
                        FrameKind::Try {
                            phase: TryPhase::ExecuteCatch,
                        },
                    );
                    push_stmt(vm, &catch_body);
                    return Step::Continue;
                }
                vm.frames.pop();
            }
            Step::Done
        }
    }
}
