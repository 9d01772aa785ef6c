//! Basic tests for expressions, assignment and the scope

use super::helpers::{eval, num, run, run_vm, s};
use crate::executor::Val;
use crate::scope::Scope;
use maplit::btreemap;

#[test]
fn test_expression_produces_single_value() {
    assert_eq!(eval("3 + 4"), num(7.0));
}

#[test]
fn test_arithmetic_precedence() {
    assert_eq!(eval("2 + 3 * 4 - 10 / 5"), num(12.0));
    assert_eq!(eval("(2 + 3) * 4"), num(20.0));
}

#[test]
fn test_modulo_follows_divisor_sign() {
    assert_eq!(eval("-7 % 3"), num(2.0));
    assert_eq!(eval("7 % -3"), num(-2.0));
}

#[test]
fn test_string_operations() {
    assert_eq!(eval("'ab' + 'cd'"), s("abcd"));
    assert_eq!(eval("'ab' * 3"), s("ababab"));
    assert_eq!(eval("'abc'[-1]"), s("c"));
}

#[test]
fn test_repeating_empty_sequences() {
    assert_eq!(eval("[] * 1e18"), Val::List(vec![]));
    assert_eq!(eval("1e18 * []"), Val::List(vec![]));
    assert_eq!(eval("'' * 1e18"), s(""));
    assert_eq!(eval("[1, 2] * 0"), Val::List(vec![]));
    assert_eq!(eval("[1] * 2"), Val::List(vec![num(1.0), num(1.0)]));
}

#[test]
fn test_list_and_object_literals() {
    assert_eq!(
        eval("[1, 'two', null]"),
        Val::List(vec![num(1.0), s("two"), Val::Null])
    );
    assert_eq!(
        eval("{a: 1, 'b c': true}"),
        Val::Obj(btreemap! {
            "a".to_string() => num(1.0),
            "b c".to_string() => Val::Bool(true),
        })
    );
}

#[test]
fn test_logical_operators_return_operands() {
    assert_eq!(eval("0 or 'fallback'"), s("fallback"));
    assert_eq!(eval("'x' and 5"), num(5.0));
    assert_eq!(eval("null and missing"), Val::Null);
    assert_eq!(eval("not []"), Val::Bool(true));
}

#[test]
fn test_chained_comparison() {
    assert_eq!(eval("1 < 2 <= 2"), Val::Bool(true));
    assert_eq!(eval("1 < 3 < 2"), Val::Bool(false));
}

#[test]
fn test_structural_equality() {
    assert_eq!(eval("[1, {a: 2}] == [1, {a: 2}]"), Val::Bool(true));
    assert_eq!(eval("1 != '1'"), Val::Bool(true));
}

#[test]
fn test_ternary() {
    assert_eq!(eval("'big' if 10 > 3 else 'small'"), s("big"));
}

#[test]
fn test_block_implicit_result() {
    assert_eq!(run("x = 3\ny = x * 2\ny + 1"), vec![num(7.0)]);
}

#[test]
fn test_block_without_result_produces_nothing() {
    assert!(run("x = 1\ny = 2").is_empty());
}

#[test]
fn test_assignment_persists_in_scope() {
    let (vm, _) = run_vm("total = 0\nfor n in [1, 2, 3]: total = total + n", Scope::new());
    let scope = vm.into_scope();
    assert_eq!(scope.get("total"), Some(&num(6.0)));
    assert_eq!(scope.get("n"), Some(&num(3.0)));
}

#[test]
fn test_scope_values_are_visible() {
    let mut scope = Scope::new();
    scope.set("_author", s("alice"));
    let (_, produced) = run_vm("upper(_author)", scope);
    assert_eq!(produced, vec![s("ALICE")]);
}

#[test]
fn test_scope_shadows_builtins() {
    let mut scope = Scope::new();
    scope.set("len", num(99.0));
    let (vm, produced) = run_vm("len", scope);
    assert_eq!(produced, vec![num(99.0)]);

    // Deleting the binding uncovers the builtin again
    let (_, produced) = run_vm("del len\ntype(len)", vm.into_scope());
    assert_eq!(produced, vec![s("builtin")]);
}

#[test]
fn test_path_assignment() {
    let source = r#"
cfg = {items: [1, 2, 3], name: "a"}
cfg.items[1] = 20
cfg.name = "b"
cfg["extra"] = true
cfg
"#;
    assert_eq!(
        run(source),
        vec![Val::Obj(btreemap! {
            "extra".to_string() => Val::Bool(true),
            "items".to_string() => Val::List(vec![num(1.0), num(20.0), num(3.0)]),
            "name".to_string() => s("b"),
        })]
    );
}

#[test]
fn test_builtins_not_written_into_scope() {
    let (vm, _) = run_vm("x = len([1])", Scope::new());
    let scope = vm.into_scope();
    assert_eq!(scope.names().collect::<Vec<_>>(), vec!["x"]);
}
