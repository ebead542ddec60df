// lox-vm - Class, instance, and inheritance tests
// Copyright (c) 2025 Tom Waddington. MIT licensed.

mod common;
use common::*;

#[test]
fn test_class_and_instance_printing() {
    assert_prints("class A {} print A;", &["A"]);
    assert_prints("class A {} print A();", &["A instance"]);
}

#[test]
fn test_fields() {
    assert_prints("class A {} var a = A(); a.x = 1; print a.x;", &["1"]);
    assert_prints(
        "class A {} var a = A(); a.x = 1; a.x = a.x + 1; print a.x;",
        &["2"],
    );
    // Fields are per-instance.
    assert_prints(
        "class A {} var a = A(); var b = A(); a.x = 1; b.x = 2; print a.x; print b.x;",
        &["1", "2"],
    );
    // Field assignment is an expression yielding the value.
    assert_prints("class A {} var a = A(); print a.x = 7;", &["7"]);
}

#[test]
fn test_methods_and_this() {
    assert_prints(
        "class Person {
           greet() { return \"Hi, \" + this.name; }
         }
         var p = Person();
         p.name = \"Ada\";
         print p.greet();",
        &["Hi, Ada"],
    );
}

#[test]
fn test_bound_method_remembers_receiver() {
    assert_prints(
        "class Person {
           greet() { return \"Hi, \" + this.name; }
         }
         var p = Person();
         p.name = \"Ada\";
         var m = p.greet;
         print m();",
        &["Hi, Ada"],
    );
    assert_prints(
        "class A { m() { return this; } }
         var a = A();
         print a.m() == a;",
        &["true"],
    );
}

#[test]
fn test_init_runs_with_arguments() {
    assert_prints(
        "class Point {
           init(x, y) { this.x = x; this.y = y; }
         }
         var p = Point(3, 4);
         print p.x + p.y;",
        &["7"],
    );
}

#[test]
fn test_init_always_yields_instance() {
    assert_prints(
        "class C { init() { this.v = 1; } } print C().v;",
        &["1"],
    );
    // A bare return inside init still yields the instance.
    assert_prints(
        "class D {
           init(flag) {
             this.v = 1;
             if (flag) return;
             this.v = 2;
           }
         }
         print D(true).v;
         print D(false).v;",
        &["1", "2"],
    );
    // Calling init explicitly re-runs it and returns the instance.
    assert_prints(
        "class E { init() { this.n = 0; } }
         var e = E();
         print e.init() == e;",
        &["true"],
    );
}

#[test]
fn test_class_call_arity() {
    let err = run_err("class A {} A(3);");
    assert!(err.contains("Expected 0 arguments but got 1."), "{}", err);
    let err = run_err("class B { init(n) {} } B(1, 2);");
    assert!(err.contains("Expected 1 arguments but got 2."), "{}", err);
}

#[test]
fn test_inherited_methods() {
    assert_prints(
        "class A { m() { return \"a\"; } }
         class B < A {}
         print B().m();",
        &["a"],
    );
}

#[test]
fn test_override_and_super() {
    assert_prints(
        "class A { m() { return \"A\"; } }
         class B < A { m() { return super.m() + \"B\"; } }
         print B().m();",
        &["AB"],
    );
}

#[test]
fn test_super_init_chain() {
    assert_prints(
        "class A { init(n) { this.n = n; } }
         class B < A { init(n) { super.init(n); this.n = this.n + 1; } }
         print B(10).n;",
        &["11"],
    );
}

#[test]
fn test_super_resolves_statically() {
    // super dispatches on the superclass of the class declaring the
    // method, not the receiver's class.
    assert_prints(
        "class A { m() { return \"A\"; } }
         class B < A { m() { return super.m(); } }
         class C < B {}
         print C().m();",
        &["A"],
    );
}

#[test]
fn test_super_as_bound_value() {
    assert_prints(
        "class A { m() { return \"from A\"; } }
         class B < A {
           grab() { return super.m; }
         }
         print B().grab()();",
        &["from A"],
    );
}

#[test]
fn test_field_shadows_method() {
    // Field lookup wins over methods on the invoke fast path.
    assert_prints(
        "class F { m() { return \"method\"; } }
         fun replacement() { return \"field\"; }
         var f = F();
         print f.m();
         f.m = replacement;
         print f.m();",
        &["method", "field"],
    );
}

#[test]
fn test_field_shadowing_non_callable_errors_at_call() {
    let err = run_err(
        "class F { m() { return 1; } }
         var f = F();
         f.m = 3;
         f.m();",
    );
    assert!(err.contains("Can only call functions and classes."), "{}", err);
}

#[test]
fn test_methods_on_all_instances() {
    assert_prints(
        "class A { tag() { return this.id; } }
         var x = A(); x.id = 1;
         var y = A(); y.id = 2;
         print x.tag();
         print y.tag();",
        &["1", "2"],
    );
}

#[test]
fn test_undefined_property() {
    let err = run_err("class A {} A().missing;");
    assert!(err.contains("Undefined property 'missing'."), "{}", err);
    let err = run_err("class A {} A().missing();");
    assert!(err.contains("Undefined property 'missing'."), "{}", err);
}

#[test]
fn test_property_access_on_non_instances() {
    let err = run_err("var s = \"str\"; s.length;");
    assert!(err.contains("Only instances have properties."), "{}", err);
    let err = run_err("3.x = 1;");
    assert!(err.contains("Only instances have fields."), "{}", err);
    let err = run_err("var n = 5; n.foo();");
    assert!(err.contains("Only instances have methods."), "{}", err);
}

#[test]
fn test_inherit_from_non_class() {
    let err = run_err("var NotClass = 3; class Sub < NotClass {}");
    assert!(err.contains("Superclass must be a class."), "{}", err);
}

#[test]
fn test_instance_equality_is_identity() {
    assert_prints(
        "class A {} var a = A(); var b = A(); print a == b; print a == a;",
        &["false", "true"],
    );
}

#[test]
fn test_methods_can_recurse_through_this() {
    assert_prints(
        "class Counter {
           init() { this.n = 0; }
           bump(times) {
             if (times <= 0) return this.n;
             this.n = this.n + 1;
             return this.bump(times - 1);
           }
         }
         print Counter().bump(5);",
        &["5"],
    );
}
