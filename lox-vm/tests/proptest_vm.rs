// lox-vm - Property-based tests
// Copyright (c) 2025 Tom Waddington. MIT licensed.

mod common;
use common::*;

use proptest::prelude::*;

use lox_syntax::{Scanner, TokenKind};
use lox_vm::heap::Heap;
use lox_vm::value::format_number;

proptest! {
    /// Arithmetic over small integers matches IEEE double arithmetic
    /// (which is exact in this range).
    #[test]
    fn prop_arithmetic_matches_f64(a in -1000i32..1000, b in -1000i32..1000, c in -1000i32..1000) {
        let source = format!("print {} + {} * {};", a, b, c);
        let expected = a as f64 + b as f64 * c as f64;
        prop_assert_eq!(run_ok(&source), format!("{}\n", format_number(expected)));
    }

    /// Subtraction and grouping associate the way the precedence table
    /// says they do.
    #[test]
    fn prop_subtraction_left_associates(a in -1000i32..1000, b in -1000i32..1000, c in -1000i32..1000) {
        let source = format!("print {} - {} - {};", a, b, c);
        let expected = (a as f64 - b as f64) - c as f64;
        prop_assert_eq!(run_ok(&source), format!("{}\n", format_number(expected)));
    }

    /// Comparison chains agree with Rust's ordering on the same doubles.
    #[test]
    fn prop_comparison_agrees(a in -1000i32..1000, b in -1000i32..1000) {
        let source = format!("print {} < {}; print {} <= {}; print {} == {};", a, b, a, b, a, b);
        let expected = format!("{}\n{}\n{}\n", a < b, a <= b, a == b);
        prop_assert_eq!(run_ok(&source), expected);
    }

    /// The scanner terminates on arbitrary input (including non-ASCII and
    /// unmatched quotes) and never panics; unknown bytes become error
    /// tokens, not crashes.
    #[test]
    fn prop_scanner_total(source in "\\PC{0,200}") {
        let mut scanner = Scanner::new(&source);
        for _ in 0..10_000 {
            if scanner.scan_token().kind == TokenKind::Eof {
                return Ok(());
            }
        }
        prop_assert!(false, "scanner failed to reach EOF");
    }

    /// Interning is an identity: equal bytes yield the same handle,
    /// different bytes never do.
    #[test]
    fn prop_interning_identity(a in "[a-z]{0,12}", b in "[a-z]{0,12}") {
        let mut heap = Heap::new();
        let ra = heap.intern(&a);
        let rb = heap.intern(&b);
        prop_assert_eq!(ra == rb, a == b);
        // Re-interning is stable.
        prop_assert_eq!(heap.intern(&a), ra);
        prop_assert_eq!(heap.intern(&b), rb);
    }

    /// Stress-mode collection is observationally invisible: a program of
    /// string appends and closure calls prints the same under both modes.
    #[test]
    fn prop_stress_gc_equivalence(parts in proptest::collection::vec("[a-c]{1,3}", 1..8)) {
        let mut body = String::from("var s = \"\";\n");
        for part in &parts {
            body.push_str(&format!("s = s + \"{}\";\n", part));
        }
        body.push_str(
            "fun wrap() { fun get() { return s; } return get; }\n\
             print wrap()();\n\
             print s;\n",
        );
        let normal = run(&body);
        let stressed = run_stressed(&body);
        prop_assert_eq!(normal, stressed);
    }
}
