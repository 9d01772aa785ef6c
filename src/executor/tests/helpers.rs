//! Test helpers for executor tests
//!
//! Common utilities for compiling snippets and driving a VM synchronously

use crate::compiler::compile;
use crate::executor::{run_until_done, Control, Stmt, Val, VM};
use crate::scope::Scope;

/// Compile a snippet, round-trip its program through JSON, and build a VM
pub fn build_vm(source: &str, scope: Scope) -> VM {
    let unit = compile(source, &scope).expect("Compile failed");
    let json = serde_json::to_string(&unit.program()).expect("Serialization failed");
    let program: Stmt = serde_json::from_str(&json).expect("Deserialization failed");
    VM::new(program, scope)
}

/// Drive a VM to the end, collecting produced values
///
/// Awaits resolve immediately to `null`. A `return` value is collected as the
/// final value. Stops at an uncaught throw, leaving it in `vm.control`.
pub fn drive(vm: &mut VM) -> Vec<Val> {
    let mut produced = Vec::new();
    loop {
        run_until_done(vm);
        match vm.control.clone() {
            Control::Yield(v) => {
                produced.push(v);
                vm.resume(None);
            }
            Control::Suspend(_) => vm.resume(Some(Val::Null)),
            Control::Return(v) => {
                produced.extend(v);
                return produced;
            }
            _ => return produced,
        }
    }
}

/// Compile and run a snippet in an empty scope
pub fn run(source: &str) -> Vec<Val> {
    let mut vm = build_vm(source, Scope::new());
    let produced = drive(&mut vm);
    if let Control::Throw(err) = &vm.control {
        panic!("Unexpected throw from {:?}: {:?}", source, err);
    }
    produced
}

/// Compile and run a snippet, expecting exactly one produced value
pub fn eval(source: &str) -> Val {
    let mut produced = run(source);
    assert_eq!(produced.len(), 1, "Expected one value from {:?}", source);
    produced.remove(0)
}

/// Compile and run a snippet, returning the VM after it stops
pub fn run_vm(source: &str, scope: Scope) -> (VM, Vec<Val>) {
    let mut vm = build_vm(source, scope);
    let produced = drive(&mut vm);
    (vm, produced)
}

pub fn num(n: f64) -> Val {
    Val::Num(n)
}

pub fn s(v: &str) -> Val {
    Val::Str(v.to_string())
}
