// lox-vm - Expression evaluation tests
// Copyright (c) 2025 Tom Waddington. MIT licensed.

mod common;
use common::*;

#[test]
fn test_literals() {
    assert_prints("print 42;", &["42"]);
    assert_prints("print 3.14;", &["3.14"]);
    assert_prints("print true;", &["true"]);
    assert_prints("print false;", &["false"]);
    assert_prints("print nil;", &["nil"]);
    assert_prints("print \"hello\";", &["hello"]);
}

#[test]
fn test_arithmetic_precedence() {
    assert_prints("print 1 + 2 * 3;", &["7"]);
    assert_prints("print 2 + 3 * 4 - 6 / 2;", &["11"]);
    assert_prints("print (2 + 3) * 4;", &["20"]);
    assert_prints("print 7 / 2;", &["3.5"]);
    assert_prints("print 2.5 + 2.5;", &["5"]);
}

#[test]
fn test_unary() {
    assert_prints("print -3;", &["-3"]);
    assert_prints("print -(3 - 5);", &["2"]);
    assert_prints("print --3;", &["3"]);
    assert_prints("print !true;", &["false"]);
    assert_prints("print !nil;", &["true"]);
    assert_prints("print !0;", &["false"]);
    assert_prints("print !!nil;", &["false"]);
}

#[test]
fn test_string_concatenation() {
    assert_prints(
        "var a = \"st\"; var b = \"r\"; print a + b + \"ing\";",
        &["string"],
    );
    assert_prints("print \"\" + \"\";", &[""]);
}

#[test]
fn test_comparison() {
    assert_prints("print 1 < 2;", &["true"]);
    assert_prints("print 2 <= 1;", &["false"]);
    assert_prints("print 2 <= 2;", &["true"]);
    assert_prints("print 3 > 2;", &["true"]);
    assert_prints("print 2 >= 3;", &["false"]);
}

#[test]
fn test_equality() {
    assert_prints("print nil == nil;", &["true"]);
    assert_prints("print true == true;", &["true"]);
    assert_prints("print true == false;", &["false"]);
    assert_prints("print 1 == 1;", &["true"]);
    assert_prints("print 1 == 2;", &["false"]);
    assert_prints("print 1 != 2;", &["true"]);
    // Different kinds are never equal.
    assert_prints("print 0 == false;", &["false"]);
    assert_prints("print nil == false;", &["false"]);
    assert_prints("print \"1\" == 1;", &["false"]);
    // Equality binds looser than comparison and arithmetic.
    assert_prints("print 1 + 2 == 3;", &["true"]);
    assert_prints("print 1 < 2 == true;", &["true"]);
}

#[test]
fn test_string_equality_is_identity() {
    assert_prints("print \"a\" == \"a\";", &["true"]);
    assert_prints("print \"a\" == \"b\";", &["false"]);
    // Concatenation interns, so a computed string is identical to a literal.
    assert_prints("print \"hello\" == \"hel\" + \"lo\";", &["true"]);
}

#[test]
fn test_grouping_and_nesting() {
    assert_prints("print ((1));", &["1"]);
    assert_prints("print (1 + 2) * (3 + 4);", &["21"]);
}

#[test]
fn test_expression_statement_discards_value() {
    assert_prints("1 + 2; print 3;", &["3"]);
}

#[test]
fn test_global_variables() {
    assert_prints("var a = 1; print a;", &["1"]);
    assert_prints("var a; print a;", &["nil"]);
    assert_prints("var a = 1; a = 2; print a;", &["2"]);
    // Assignment is an expression yielding the assigned value.
    assert_prints("var a = 1; print a = 5;", &["5"]);
}

#[test]
fn test_local_variables_and_shadowing() {
    assert_prints("{ var a = 1; print a; }", &["1"]);
    assert_prints("var a = 1; { var a = 2; print a; } print a;", &["2", "1"]);
    assert_prints("{ var a = 1; { var b = a + 1; print b; } }", &["2"]);
    assert_prints("{ var a = 1; a = a + 1; print a; }", &["2"]);
}
