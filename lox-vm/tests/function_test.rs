// lox-vm - Function and closure tests
// Copyright (c) 2025 Tom Waddington. MIT licensed.

mod common;
use common::*;

#[test]
fn test_call_and_return() {
    assert_prints("fun add(a, b) { return a + b; } print add(1, 2);", &["3"]);
    assert_prints("fun id(x) { return x; } print id(\"v\");", &["v"]);
}

#[test]
fn test_implicit_nil_return() {
    assert_prints("fun f() {} print f();", &["nil"]);
    assert_prints("fun f() { return; } print f();", &["nil"]);
}

#[test]
fn test_function_values_print() {
    assert_prints("fun f() {} print f;", &["<fn f>"]);
    assert_prints("print clock;", &["<native fn>"]);
}

#[test]
fn test_recursion() {
    assert_prints(
        "fun fib(n) { if (n < 2) return n; return fib(n - 2) + fib(n - 1); } print fib(10);",
        &["55"],
    );
}

#[test]
fn test_forward_reference_between_globals() {
    // Globals are late-bound by name, so a() may call b() declared later.
    assert_prints(
        "fun a() { return b(); } fun b() { return 42; } print a();",
        &["42"],
    );
}

#[test]
fn test_higher_order_functions() {
    assert_prints(
        "fun twice(f, x) { return f(f(x)); } fun inc(n) { return n + 1; } print twice(inc, 5);",
        &["7"],
    );
}

#[test]
fn test_closure_captures_argument() {
    assert_prints(
        "fun make(x) { fun g() { return x; } return g; } var f = make(42); print f();",
        &["42"],
    );
}

#[test]
fn test_closure_counter_has_private_cell() {
    assert_prints(
        "fun make_counter() {
           var count = 0;
           fun inc() { count = count + 1; return count; }
           return inc;
         }
         var c = make_counter();
         print c();
         print c();
         var d = make_counter();
         print d();",
        &["1", "2", "1"],
    );
}

#[test]
fn test_sibling_closures_share_one_cell() {
    // Reads and writes through captures observe the same underlying cell.
    assert_prints(
        "var get; var set;
         fun make() {
           var value = 0;
           fun g() { return value; }
           fun s(v) { value = v; }
           get = g;
           set = s;
         }
         make();
         set(42);
         print get();",
        &["42"],
    );
}

#[test]
fn test_loop_variable_captured_by_reference() {
    // Every iteration's closure captures the same loop variable cell; the
    // value observed after the loop is the final one.
    assert_prints(
        "fun make() {
           var xs;
           for (var i = 0; i < 3; i = i + 1) {
             fun c() { return i; }
             xs = c;
           }
           return xs;
         }
         print make()();",
        &["3"],
    );
}

#[test]
fn test_transitive_capture_through_middle_function() {
    // The middle function never mentions x, but must still thread it.
    assert_prints(
        "fun outer() {
           var x = \"value\";
           fun middle() {
             fun inner() { return x; }
             return inner;
           }
           return middle();
         }
         print outer()();",
        &["value"],
    );
}

#[test]
fn test_capture_survives_scope_exit() {
    assert_prints(
        "var f;
         {
           var local = \"kept\";
           fun g() { return local; }
           f = g;
         }
         print f();",
        &["kept"],
    );
}

#[test]
fn test_closure_writes_after_close() {
    assert_prints(
        "fun make() {
           var v = 1;
           fun set(n) { v = n; }
           fun get() { return v; }
           set(10);
           print get();
           return get;
         }
         var g = make();
         print g();",
        &["10", "10"],
    );
}

#[test]
fn test_native_clock() {
    assert_prints("print clock() >= 0;", &["true"]);
    assert_prints("var a = clock(); var b = clock(); print b >= a;", &["true"]);
}

#[test]
fn test_native_arity_checked() {
    let err = run_err("clock(1);");
    assert!(err.contains("Expected 0 arguments but got 1."), "{}", err);
}

#[test]
fn test_wrong_arity() {
    let err = run_err("fun f(a) {} f();");
    assert!(err.contains("Expected 1 arguments but got 0."), "{}", err);
    let err = run_err("fun f() {} f(1, 2);");
    assert!(err.contains("Expected 0 arguments but got 2."), "{}", err);
}

#[test]
fn test_call_non_callable() {
    let err = run_err("var x = 3; x();");
    assert!(err.contains("Can only call functions and classes."), "{}", err);
    let err = run_err("\"str\"();");
    assert!(err.contains("Can only call functions and classes."), "{}", err);
}

#[test]
fn test_stack_overflow() {
    let err = run_err("fun f() { f(); } f();");
    assert!(err.contains("Stack overflow."), "{}", err);
}

#[test]
fn test_many_arguments() {
    assert_prints(
        "fun sum8(a, b, c, d, e, f, g, h) { return a + b + c + d + e + f + g + h; }
         print sum8(1, 2, 3, 4, 5, 6, 7, 8);",
        &["36"],
    );
}
