// lox-vm - Bytecode compiler and virtual machine for the Lox programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Native function bindings exposed to Lox programs.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::object::NativeFn;
use crate::value::Value;

/// The default native bindings: name, required arity, implementation.
pub fn default_natives() -> &'static [(&'static str, Option<u8>, NativeFn)] {
    &[("clock", Some(0), clock)]
}

/// `clock()` - seconds since an unspecified epoch, as a number.
fn clock(_args: &[Value]) -> Value {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    Value::Number(elapsed.as_secs_f64())
}
