//! Statement execution handlers
//!
//! Each statement type has its own handler function that processes
//! the statement based on its current execution phase.

use super::errors::{ErrorInfo, INDEX_ERROR, KEY_ERROR, NAME_ERROR, TYPE_ERROR};
use super::expressions::{eval_expr, resolve_index, EvalResult};
use super::types::{
    BlockPhase, Control, Expr, ForPhase, FrameKind, IfPhase, MemberAccess, Stmt, TryPhase, Val,
};
use super::vm::{push_stmt, set_top_kind, Step, VM};

/* ===================== Error Raising ===================== */

/// Start unwinding with `error`, recording where it was raised
pub fn raise(vm: &mut VM, error: Val) -> Step {
    vm.fault_lines = vm
        .frames
        .iter()
        .filter(|f| !matches!(f.kind, FrameKind::Block { .. }))
        .map(|f| f.line())
        .collect();
    vm.fault_lines.dedup();
    vm.control = Control::Throw(error);
    Step::Continue
}

fn raise_info(vm: &mut VM, code: &str, message: impl Into<String>) -> Step {
    raise(vm, Val::Error(ErrorInfo::new(code, message)))
}

/// Evaluate `expr` for the top frame
///
/// Returns `Err(step)` when the frame must stop here: the expression suspended
/// (frame stays on the stack) or threw (unwinding starts).
fn eval_for_frame(vm: &mut VM, expr: &Expr) -> Result<Val, Step> {
    match eval_expr(expr, &vm.env, &mut vm.resume_value) {
        EvalResult::Value { v } => Ok(v),
        EvalResult::Suspend { awaitable } => {
            vm.control = Control::Suspend(awaitable);
            Err(Step::Done)
        }
        EvalResult::Throw { error } => Err(raise(vm, error)),
    }
}

/* ===================== Statement Handlers ===================== */

/// Execute Block statement
pub fn execute_block(vm: &mut VM, phase: BlockPhase, idx: usize, body: &[Stmt]) -> Step {
    match phase {
        BlockPhase::Execute => {
            let Some(child) = body.get(idx) else {
                vm.frames.pop();
                return Step::Continue;
            };

            set_top_kind(
                vm,
                FrameKind::Block {
                    phase: BlockPhase::Execute,
                    idx: idx + 1,
                },
            );
            push_stmt(vm, child);

            Step::Continue
        }
    }
}

/// Execute an expression statement; the value is discarded
pub fn execute_expr(vm: &mut VM, expr: &Expr) -> Step {
    match eval_for_frame(vm, expr) {
        Ok(_) => {
            vm.frames.pop();
            Step::Continue
        }
        Err(step) => step,
    }
}

/// Execute Assign statement (`x = v`, `x.a = v`, `x[i] = v`)
pub fn execute_assign(vm: &mut VM, var: &str, path: &[MemberAccess], value: &Expr) -> Step {
    let v = match eval_for_frame(vm, value) {
        Ok(v) => v,
        Err(step) => return step,
    };

    if path.is_empty() {
        vm.env.scope.set(var, v);
        vm.frames.pop();
        return Step::Continue;
    }

    // Resolve index expressions before borrowing the target mutably
    let mut keys = Vec::with_capacity(path.len());
    for segment in path {
        match segment {
            MemberAccess::Prop { property, .. } => keys.push(Val::Str(property.clone())),
            MemberAccess::Index { expr, .. } => match eval_for_frame(vm, expr) {
                Ok(k) => keys.push(k),
                Err(step) => return step,
            },
        }
    }

    let result = match vm.env.scope.get_mut(var) {
        Some(target) => assign_path(target, &keys, v),
        None => Err(ErrorInfo::new(
            NAME_ERROR,
            format!("name '{}' is not defined", var),
        )),
    };

    match result {
        Ok(()) => {
            vm.frames.pop();
            Step::Continue
        }
        Err(info) => raise(vm, Val::Error(info)),
    }
}

fn assign_path(target: &mut Val, keys: &[Val], value: Val) -> Result<(), ErrorInfo> {
    let Some((key, rest)) = keys.split_first() else {
        *target = value;
        return Ok(());
    };

    let slot = match (target, key) {
        (Val::Obj(map), Val::Str(k)) => {
            if rest.is_empty() {
                map.insert(k.clone(), value);
                return Ok(());
            }
            map.get_mut(k)
                .ok_or_else(|| ErrorInfo::new(KEY_ERROR, Val::Str(k.clone()).repr()))?
        }
        (Val::List(items), Val::Num(n)) => {
            let len = items.len();
            let i = resolve_index(*n, len).ok_or_else(|| {
                ErrorInfo::new(INDEX_ERROR, "list assignment index out of range")
            })?;
            &mut items[i]
        }
        (other, key) => {
            return Err(ErrorInfo::new(
                TYPE_ERROR,
                format!(
                    "'{}' object does not support item assignment with '{}' keys",
                    other.type_name(),
                    key.type_name()
                ),
            ))
        }
    };
    assign_path(slot, rest, value)
}

/// Execute Delete statement
pub fn execute_delete(vm: &mut VM, name: &str) -> Step {
    if vm.env.scope.remove(name).is_none() {
        return raise_info(vm, NAME_ERROR, format!("name '{}' is not defined", name));
    }
    vm.frames.pop();
    Step::Continue
}

/// Execute If statement
pub fn execute_if(
    vm: &mut VM,
    phase: IfPhase,
    test: &Expr,
    then_s: &Stmt,
    else_s: Option<&Stmt>,
) -> Step {
    match phase {
        IfPhase::Eval => {
            let v = match eval_for_frame(vm, test) {
                Ok(v) => v,
                Err(step) => return step,
            };

            let branch = if v.is_truthy() { Some(then_s) } else { else_s };
            match branch {
                Some(stmt) => {
                    set_top_kind(
                        vm,
                        FrameKind::If {
                            phase: IfPhase::Branch,
                        },
                    );
                    push_stmt(vm, stmt);
                }
                None => {
                    vm.frames.pop();
                }
            }
            Step::Continue
        }
        IfPhase::Branch => {
            vm.frames.pop();
            Step::Continue
        }
    }
}

/// Execute While statement; the frame stays while the test holds
pub fn execute_while(vm: &mut VM, test: &Expr, body: &Stmt) -> Step {
    let v = match eval_for_frame(vm, test) {
        Ok(v) => v,
        Err(step) => return step,
    };

    if v.is_truthy() {
        push_stmt(vm, body);
    } else {
        vm.frames.pop();
    }
    Step::Continue
}

/// Execute For statement
///
/// Lists iterate over items, strings over characters and objects over keys.
pub fn execute_for(
    vm: &mut VM,
    phase: ForPhase,
    idx: usize,
    binding: &str,
    iterable: &Expr,
    body: &Stmt,
) -> Step {
    match phase {
        ForPhase::Init => {
            let v = match eval_for_frame(vm, iterable) {
                Ok(v) => v,
                Err(step) => return step,
            };

            let items = match v {
                Val::List(items) => items,
                Val::Str(s) => s.chars().map(|c| Val::Str(c.to_string())).collect(),
                Val::Obj(map) => map.into_keys().map(Val::Str).collect(),
                other => {
                    return raise_info(
                        vm,
                        TYPE_ERROR,
                        format!("'{}' object is not iterable", other.type_name()),
                    )
                }
            };

            if let Some(frame) = vm.frames.last_mut() {
                frame.items = items;
                frame.kind = FrameKind::ForLoop {
                    phase: ForPhase::Iterate,
                    idx: 0,
                };
            }
            Step::Continue
        }
        ForPhase::Iterate => {
            let next = vm.frames.last().and_then(|f| f.items.get(idx).cloned());
            let Some(item) = next else {
                vm.frames.pop();
                return Step::Continue;
            };

            vm.env.scope.set(binding, item);
            set_top_kind(
                vm,
                FrameKind::ForLoop {
                    phase: ForPhase::Iterate,
                    idx: idx + 1,
                },
            );
            push_stmt(vm, body);
            Step::Continue
        }
    }
}

/// Execute Return statement
pub fn execute_return(vm: &mut VM, value: Option<&Expr>) -> Step {
    let val = match value {
        Some(expr) => match eval_for_frame(vm, expr) {
            Ok(v) => Some(v),
            Err(step) => return step,
        },
        None => None,
    };

    vm.control = Control::Return(val);
    vm.frames.pop();
    Step::Continue
}

/// Execute Yield statement: hand the value to the driver and stop
pub fn execute_yield(vm: &mut VM, value: &Expr) -> Step {
    match eval_for_frame(vm, value) {
        Ok(v) => {
            vm.frames.pop();
            vm.control = Control::Yield(v);
            Step::Done
        }
        Err(step) => step,
    }
}

/// Execute Throw statement
pub fn execute_throw(vm: &mut VM, value: &Expr) -> Step {
    match eval_for_frame(vm, value) {
        Ok(v) => raise(vm, v),
        Err(step) => step,
    }
}

/// Execute Try statement
///
/// Catching happens during unwinding; this handler only pushes bodies and
/// pops the frame once the active body completes normally.
pub fn execute_try(vm: &mut VM, phase: TryPhase, body: &Stmt) -> Step {
    match phase {
        TryPhase::Start => {
            set_top_kind(
                vm,
                FrameKind::Try {
                    phase: TryPhase::ExecuteTry,
                },
            );
            push_stmt(vm, body);
            Step::Continue
        }
        TryPhase::ExecuteTry | TryPhase::ExecuteCatch => {
            vm.frames.pop();
            Step::Continue
        }
    }
}

/// Execute Break/Continue: set control and let unwinding find the loop
pub fn execute_loop_control(vm: &mut VM, control: Control) -> Step {
    vm.frames.pop();
    vm.control = control;
    Step::Continue
}
