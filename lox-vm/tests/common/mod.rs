// lox-vm - Common test utilities
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Shared helpers for the Lox VM integration tests.
//!
//! # Usage
//!
//! In your test file, add:
//! ```ignore
//! mod common;
//! use common::*;
//! ```
//!
//! # Available Helpers
//!
//! - [`run`] - Interpret source in a fresh VM, returning captured stdout
//! - [`run_stressed`] - Same, with collect-before-every-allocation enabled
//! - [`run_ok`] - Interpret and panic on any error (for happy-path tests)
//! - [`run_err`] - Interpret and return the rendered error
//! - [`compile_errors`] - Compile only, returning the error list

use lox_vm::vm::Vm;
use lox_vm::{CompileError, compile, heap::Heap};

/// Interpret `source` in a fresh VM. Returns captured stdout on success,
/// or the rendered error.
pub fn run(source: &str) -> Result<String, String> {
    run_with_vm(&mut Vm::new(), source)
}

/// Interpret `source` with GC stress mode on: the collector runs before
/// every runtime allocation.
pub fn run_stressed(source: &str) -> Result<String, String> {
    let mut vm = Vm::new();
    vm.set_stress_gc(true);
    run_with_vm(&mut vm, source)
}

/// Interpret `source` against an existing VM (for REPL-style tests where
/// state persists across runs).
pub fn run_with_vm(vm: &mut Vm, source: &str) -> Result<String, String> {
    let mut out = Vec::new();
    match vm.interpret(source, &mut out) {
        Ok(()) => Ok(String::from_utf8(out).expect("program output was not UTF-8")),
        Err(e) => Err(e.to_string()),
    }
}

/// Interpret `source` and return stdout, panicking on any error.
#[allow(dead_code)]
pub fn run_ok(source: &str) -> String {
    match run(source) {
        Ok(output) => output,
        Err(e) => panic!("program failed:\n{}\nsource:\n{}", e, source),
    }
}

/// Interpret `source` and return the rendered error, panicking if it
/// unexpectedly succeeds.
#[allow(dead_code)]
pub fn run_err(source: &str) -> String {
    match run(source) {
        Ok(output) => panic!(
            "expected an error but program succeeded with output:\n{}",
            output
        ),
        Err(e) => e,
    }
}

/// Compile `source` without running it, returning the reported errors
/// (empty on success).
#[allow(dead_code)]
pub fn compile_errors(source: &str) -> Vec<CompileError> {
    let mut heap = Heap::new();
    match compile(source, &mut heap) {
        Ok(_) => Vec::new(),
        Err(errors) => errors,
    }
}

/// Assert that a program prints exactly the given lines.
#[allow(dead_code)]
pub fn assert_prints(source: &str, expected_lines: &[&str]) {
    let output = run_ok(source);
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(
        lines, expected_lines,
        "unexpected output for source:\n{}",
        source
    );
}
