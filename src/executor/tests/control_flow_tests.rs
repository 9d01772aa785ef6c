//! Tests for if/while/for, break/continue and try/catch

use super::helpers::{num, run, s};
use crate::executor::Val;

#[test]
fn test_if_elif_else() {
    let source = r#"
out = []
for n in [-1, 0, 5] {
    if n < 0 { out = append(out, "neg") }
    elif n == 0 { out = append(out, "zero") }
    else { out = append(out, "pos") }
}
out
"#;
    assert_eq!(
        run(source),
        vec![Val::List(vec![s("neg"), s("zero"), s("pos")])]
    );
}

#[test]
fn test_while_loop() {
    assert_eq!(run("n = 0\nwhile n < 5: n = n + 1\nn"), vec![num(5.0)]);
}

#[test]
fn test_break_and_continue() {
    let source = r#"
for i in range(10) {
    if i % 2 == 0: continue
    if i > 6: break
    yield i
}
"#;
    assert_eq!(run(source), vec![num(1.0), num(3.0), num(5.0)]);
}

#[test]
fn test_break_only_leaves_inner_loop() {
    let source = r#"
count = 0
for i in range(3) {
    while true {
        count = count + 1
        break
    }
}
count
"#;
    assert_eq!(run(source), vec![num(3.0)]);
}

#[test]
fn test_for_over_string_and_object() {
    assert_eq!(run("for c in 'hi': yield c"), vec![s("h"), s("i")]);
    assert_eq!(run("for k in {b: 1, a: 2}: yield k"), vec![s("a"), s("b")]);
}

#[test]
fn test_try_catches_runtime_error() {
    let source = r#"
try {
    x = 1 / 0
} catch err {
    yield err.code
    yield err.message
}
"#;
    assert_eq!(run(source), vec![s("ZeroDivisionError"), s("division by zero")]);
}

#[test]
fn test_try_catches_thrown_value() {
    let source = "try { throw {reason: 'nope'} } catch e { yield e.reason }";
    assert_eq!(run(source), vec![s("nope")]);
}

#[test]
fn test_try_body_without_error_skips_catch() {
    assert_eq!(run("try { yield 1 } catch e { yield 2 }\n3"), vec![num(1.0), num(3.0)]);
}

#[test]
fn test_error_in_catch_propagates_to_outer_try() {
    let source = r#"
try {
    try { throw 'inner' } catch e { throw e + '!' }
} catch outer {
    yield outer
}
"#;
    assert_eq!(run(source), vec![s("inner!")]);
}

#[test]
fn test_break_out_of_try_inside_loop() {
    let source = r#"
for i in range(5) {
    try {
        if i == 2: break
        yield i
    } catch e {
        yield 'unreachable'
    }
}
"#;
    assert_eq!(run(source), vec![num(0.0), num(1.0)]);
}
